use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    interpretation::{
        error::{InterpretError, InterpretErrorKind, parsing_error},
        types::{Interpretation, InterpretationId, InterpretationRequest, LlmMetadata, Mode},
        validator::{ValidationBounds, validate_value},
    },
    stream::{
        progressive::{LiveNarrative, PartialResult, ProgressiveReconstructor},
        sse::{SseDecoder, SseFrame},
        transport::{
            BufferedError, BufferedSuccess, GENERIC_FAILURE_CODE, GENERIC_FAILURE_MESSAGE,
            InterpretTransport, SubmitRequest, TransportError,
        },
        wire::WireEvent,
    },
};

const UPGRADE_CODES: [&str; 2] = ["LIMIT_EXCEEDED", "TRIAL_EXPIRED"];

/// Error frames shown as-is; the buffered retry would hit the same wall.
const FINAL_FRAME_KINDS: [InterpretErrorKind; 2] =
    [InterpretErrorKind::RateLimit, InterpretErrorKind::Authentication];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneStatus {
    #[default]
    Idle,
    Streaming,
    Complete,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneErrorKind {
    General,
    /// Usage limit or expired trial; shown as an upgrade prompt.
    UpgradeRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneError {
    pub kind: LaneErrorKind,
    pub code: String,
    pub message: String,
}

impl LaneError {
    fn generic() -> Self {
        Self {
            kind: LaneErrorKind::General,
            code: GENERIC_FAILURE_CODE.to_string(),
            message: GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Everything the UI renders for one lane.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaneView {
    pub status: LaneStatus,
    pub submission: u64,
    pub streaming_text: String,
    pub partial: PartialResult,
    pub live: Option<LiveNarrative>,
    pub result: Option<Interpretation>,
    pub interpretation_id: Option<InterpretationId>,
    pub metadata: Option<LlmMetadata>,
    pub messages_remaining: Option<i64>,
    /// Set while the buffered retry after a stream failure is in flight.
    pub retrying: bool,
    pub error: Option<LaneError>,
}

impl LaneView {
    pub fn is_streaming(&self) -> bool {
        self.status == LaneStatus::Streaming
    }

    pub fn is_complete(&self) -> bool {
        self.status == LaneStatus::Complete
    }

    /// Complete, or errored with nothing left to try.
    pub fn is_settled(&self) -> bool {
        match self.status {
            LaneStatus::Complete => true,
            LaneStatus::Errored => !self.retrying,
            LaneStatus::Idle | LaneStatus::Streaming => false,
        }
    }
}

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One consumer state machine with at most one live submission.
pub struct Lane {
    mode: Mode,
    transport: Arc<dyn InterpretTransport>,
    bounds: ValidationBounds,
    view: Arc<watch::Sender<LaneView>>,
    in_flight: Option<InFlight>,
    submissions: u64,
}

impl Lane {
    pub fn new(mode: Mode, transport: Arc<dyn InterpretTransport>, max_emotions: usize) -> Self {
        let bounds = ValidationBounds {
            max_emotions,
            ..ValidationBounds::default()
        };
        Self::with_bounds(mode, transport, bounds)
    }

    /// Results received by this lane are checked against `bounds` before
    /// they are shown.
    pub fn with_bounds(
        mode: Mode,
        transport: Arc<dyn InterpretTransport>,
        bounds: ValidationBounds,
    ) -> Self {
        let (view, _) = watch::channel(LaneView::default());
        Self {
            mode,
            transport,
            bounds,
            view: Arc::new(view),
            in_flight: None,
            submissions: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn subscribe(&self) -> watch::Receiver<LaneView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> LaneView {
        self.view.borrow().clone()
    }

    /// Supersedes any in-flight submission and starts a new one. Returns the
    /// submission number carried by the resulting views.
    pub fn submit(&mut self, mut request: InterpretationRequest) -> u64 {
        self.abort_in_flight();

        if request.mode != self.mode {
            tracing::warn!(
                target: "consumer",
                lane = self.mode.as_str(),
                requested = request.mode.as_str(),
                "submission_mode_overridden"
            );
            request.mode = self.mode;
        }

        self.submissions += 1;
        let submission = self.submissions;
        self.view.send_replace(LaneView {
            status: LaneStatus::Streaming,
            submission,
            ..LaneView::default()
        });

        let cancel = CancellationToken::new();
        let task = Submission {
            number: submission,
            mode: self.mode,
            same_culture: request.same_culture,
            bounds: self.bounds,
            body: SubmitRequest::from(&request),
            transport: Arc::clone(&self.transport),
            view: Arc::clone(&self.view),
            cancel: cancel.clone(),
            reconstructor: ProgressiveReconstructor::new(self.mode, self.bounds.max_emotions),
        };
        let handle = tokio::spawn(task.run());
        self.in_flight = Some(InFlight { cancel, handle });

        tracing::debug!(
            target: "consumer",
            lane = self.mode.as_str(),
            submission = submission,
            "submission_started"
        );
        submission
    }

    /// Aborts the live submission and returns to `Idle`. Settled lanes keep
    /// their state.
    pub fn cancel(&mut self) {
        if self.abort_in_flight() {
            self.view.send_modify(|view| {
                let submission = view.submission;
                *view = LaneView {
                    submission,
                    ..LaneView::default()
                };
            });
            tracing::info!(target: "consumer", lane = self.mode.as_str(), "submission_cancelled");
        }
    }

    /// Returns whether a still-running submission was stopped.
    fn abort_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                let running = !in_flight.handle.is_finished();
                in_flight.cancel.cancel();
                in_flight.handle.abort();
                running
            }
            None => false,
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.abort_in_flight();
    }
}

#[derive(Debug, Error)]
enum StreamFailure {
    #[error("stream could not be opened: {0}")]
    Open(#[source] TransportError),
    #[error("stream read failed: {0}")]
    Read(#[source] TransportError),
    #[error("server sent error frame {code}")]
    ErrorFrame { code: String, message: String },
    #[error("complete frame carried a {0} result")]
    ModeMismatch(&'static str),
    #[error("complete frame failed validation: {0}")]
    Invalid(#[source] InterpretError),
    #[error("stream ended without a terminal frame")]
    Truncated,
}

impl StreamFailure {
    /// Error frames that settle the lane without a buffered retry.
    fn final_error(&self) -> Option<LaneError> {
        let StreamFailure::ErrorFrame { code, message } = self else {
            return None;
        };
        FINAL_FRAME_KINDS
            .iter()
            .any(|kind| kind.code() == code.as_str())
            .then(|| LaneError {
                kind: LaneErrorKind::General,
                code: code.clone(),
                message: message.clone(),
            })
    }
}

enum FrameFlow {
    Continue,
    Done,
}

struct Submission {
    number: u64,
    mode: Mode,
    same_culture: bool,
    bounds: ValidationBounds,
    body: SubmitRequest,
    transport: Arc<dyn InterpretTransport>,
    view: Arc<watch::Sender<LaneView>>,
    cancel: CancellationToken,
    reconstructor: ProgressiveReconstructor,
}

impl Submission {
    /// Writes to the lane view unless this submission has been cancelled.
    /// The check runs under the watch lock so a superseded task cannot race
    /// the lane's own reset.
    fn publish(&self, update: impl FnOnce(&mut LaneView)) -> bool {
        self.view.send_if_modified(|view| {
            if self.cancel.is_cancelled() || view.submission != self.number {
                return false;
            }
            update(view);
            true
        })
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let streamed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            streamed = self.stream_attempt() => streamed,
        };

        let failure = match streamed {
            Ok(()) => return,
            Err(failure) => failure,
        };
        if let Some(error) = failure.final_error() {
            tracing::warn!(
                target: "consumer",
                lane = self.mode.as_str(),
                submission = self.number,
                code = %error.code,
                "stream_failed_without_retry"
            );
            self.publish(|view| {
                view.status = LaneStatus::Errored;
                view.retrying = false;
                view.streaming_text.clear();
                view.partial = PartialResult::default();
                view.live = None;
                view.error = Some(error);
            });
            return;
        }
        tracing::warn!(
            target: "consumer",
            lane = self.mode.as_str(),
            submission = self.number,
            error = %failure,
            "stream_failed_falling_back"
        );
        self.reconstructor.reset();
        let published = self.publish(|view| {
            view.status = LaneStatus::Errored;
            view.retrying = true;
            view.streaming_text.clear();
            view.partial = PartialResult::default();
            view.live = None;
        });
        if !published {
            return;
        }

        let buffered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            buffered = self.transport.submit_buffered(&self.body) => buffered,
        };
        self.finish_buffered(buffered);
    }

    async fn stream_attempt(&mut self) -> Result<(), StreamFailure> {
        let mut bytes = self
            .transport
            .open_stream(&self.body)
            .await
            .map_err(StreamFailure::Open)?;
        let mut decoder = SseDecoder::new();
        let mut buffer = String::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(StreamFailure::Read)?;
            for frame in decoder.push(&chunk) {
                if let FrameFlow::Done = self.handle_frame(&frame, &mut buffer)? {
                    return Ok(());
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            if let FrameFlow::Done = self.handle_frame(&frame, &mut buffer)? {
                return Ok(());
            }
        }
        Err(StreamFailure::Truncated)
    }

    fn handle_frame(
        &mut self,
        frame: &SseFrame,
        buffer: &mut String,
    ) -> Result<FrameFlow, StreamFailure> {
        if frame.data.trim().is_empty() {
            return Ok(FrameFlow::Continue);
        }
        let event = match serde_json::from_str::<WireEvent>(&frame.data) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    target: "consumer",
                    lane = self.mode.as_str(),
                    error = %err,
                    frame_chars = frame.data.len(),
                    "malformed_frame_skipped"
                );
                return Ok(FrameFlow::Continue);
            }
        };

        match event {
            WireEvent::Text { text } => {
                buffer.push_str(&text);
                self.reconstructor.update(buffer);
                let partial = self.reconstructor.partial().clone();
                let live = self.reconstructor.live().cloned();
                self.publish(|view| {
                    view.streaming_text.push_str(&text);
                    view.partial = partial;
                    view.live = live;
                });
                Ok(FrameFlow::Continue)
            }
            WireEvent::Complete {
                interpretation,
                metadata,
                interpretation_id,
            } => {
                if interpretation.mode() != self.mode {
                    return Err(StreamFailure::ModeMismatch(interpretation.mode().as_str()));
                }
                let interpretation = serde_json::to_value(&interpretation)
                    .map_err(|err| {
                        StreamFailure::Invalid(parsing_error(format!(
                            "complete frame could not be re-encoded: {}",
                            err
                        )))
                    })
                    .and_then(|value| self.checked(&value).map_err(StreamFailure::Invalid))?;
                buffer.clear();
                self.reconstructor.reset();
                self.complete(interpretation, interpretation_id, Some(metadata), None);
                Ok(FrameFlow::Done)
            }
            WireEvent::Error { error } => Err(StreamFailure::ErrorFrame {
                code: error.code,
                message: error.message,
            }),
        }
    }

    fn checked(&self, value: &serde_json::Value) -> Result<Interpretation, InterpretError> {
        validate_value(value, self.mode, self.same_culture, &self.bounds)
    }

    fn complete(
        &self,
        interpretation: Interpretation,
        interpretation_id: Option<InterpretationId>,
        metadata: Option<LlmMetadata>,
        messages_remaining: Option<i64>,
    ) {
        let partial = PartialResult::from(&interpretation);
        let completed = self.publish(|view| {
            view.status = LaneStatus::Complete;
            view.retrying = false;
            view.streaming_text.clear();
            view.partial = partial;
            view.live = None;
            view.result = Some(interpretation);
            view.interpretation_id = interpretation_id;
            view.metadata = metadata;
            view.messages_remaining = messages_remaining;
            view.error = None;
        });
        if completed {
            tracing::info!(
                target: "consumer",
                lane = self.mode.as_str(),
                submission = self.number,
                "submission_completed"
            );
        }
    }

    fn finish_buffered(&self, buffered: Result<BufferedSuccess, BufferedError>) {
        let error = match buffered {
            Ok(success) => match self.checked(&success.interpretation) {
                Ok(interpretation) => {
                    self.complete(
                        interpretation,
                        success.interpretation_id,
                        None,
                        success.messages_remaining,
                    );
                    return;
                }
                Err(err) => {
                    tracing::warn!(target: "consumer", error = %err, "buffered_result_rejected");
                    LaneError::generic()
                }
            },
            Err(err) => {
                tracing::warn!(
                    target: "consumer",
                    lane = self.mode.as_str(),
                    submission = self.number,
                    error = %err,
                    "buffered_fallback_failed"
                );
                lane_error(err)
            }
        };

        self.publish(|view| {
            view.status = LaneStatus::Errored;
            view.retrying = false;
            view.error = Some(error);
        });
    }
}

fn lane_error(err: BufferedError) -> LaneError {
    match err {
        BufferedError::Rejected {
            status,
            code,
            message,
        } => {
            let kind = if status == 403 && UPGRADE_CODES.contains(&code.as_str()) {
                LaneErrorKind::UpgradeRequired
            } else {
                LaneErrorKind::General
            };
            LaneError {
                kind,
                code,
                message,
            }
        }
        BufferedError::Transport(_) | BufferedError::InvalidBody(_) => LaneError::generic(),
    }
}
