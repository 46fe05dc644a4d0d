use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    interpretation::{
        types::{InterpretationRequest, Mode},
        validator::ValidationBounds,
    },
    stream::{
        consumer::{Lane, LaneView},
        transport::InterpretTransport,
    },
};

/// Owns the inbound and outbound lanes. Switching the active lane never
/// touches the other lane's state.
pub struct InterpretationController {
    inbound: Lane,
    outbound: Lane,
    active: Mode,
}

impl InterpretationController {
    pub fn new(transport: Arc<dyn InterpretTransport>, max_emotions: usize) -> Self {
        Self::with_bounds(
            transport,
            ValidationBounds {
                max_emotions,
                ..ValidationBounds::default()
            },
        )
    }

    pub fn with_bounds(transport: Arc<dyn InterpretTransport>, bounds: ValidationBounds) -> Self {
        Self {
            inbound: Lane::with_bounds(Mode::Inbound, Arc::clone(&transport), bounds),
            outbound: Lane::with_bounds(Mode::Outbound, transport, bounds),
            active: Mode::Inbound,
        }
    }

    pub fn active(&self) -> Mode {
        self.active
    }

    pub fn switch_to(&mut self, mode: Mode) {
        self.active = mode;
    }

    /// Routes the request to its mode's lane and makes that lane active.
    pub fn submit(&mut self, request: InterpretationRequest) -> u64 {
        self.active = request.mode;
        self.lane_mut(request.mode).submit(request)
    }

    pub fn cancel(&mut self, mode: Mode) {
        self.lane_mut(mode).cancel();
    }

    pub fn cancel_active(&mut self) {
        self.cancel(self.active);
    }

    pub fn lane(&self, mode: Mode) -> &Lane {
        match mode {
            Mode::Inbound => &self.inbound,
            Mode::Outbound => &self.outbound,
        }
    }

    pub fn view(&self, mode: Mode) -> LaneView {
        self.lane(mode).view()
    }

    pub fn subscribe(&self, mode: Mode) -> watch::Receiver<LaneView> {
        self.lane(mode).subscribe()
    }

    fn lane_mut(&mut self, mode: Mode) -> &mut Lane {
        match mode {
            Mode::Inbound => &mut self.inbound,
            Mode::Outbound => &mut self.outbound,
        }
    }
}
