use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use crosstalk::{
    interpretation::{
        error::{InterpretError, InterpretErrorKind, timeout_error},
        provider::ChunkStream,
        types::{Interpretation, InterpretationId, InterpretationRequest, LlmMetadata, Mode, StreamChunk},
    },
    stream::{
        framer::{PERSISTENCE_ERROR_CODE, StreamFramer},
        ports::{InterpretationStore, UsageOutcome, UsageRecorder},
        sse::SseDecoder,
        wire::WireEvent,
    },
};
use futures_util::{StreamExt, stream};

use crate::support::{INBOUND_TEXT, inbound_request, interpretation, metadata};

#[derive(Default)]
struct RecordingStore {
    fail: bool,
    persisted: Mutex<Vec<Interpretation>>,
}

#[async_trait]
impl InterpretationStore for RecordingStore {
    async fn persist(
        &self,
        _request: &InterpretationRequest,
        interpretation: &Interpretation,
        _metadata: &LlmMetadata,
    ) -> anyhow::Result<InterpretationId> {
        if self.fail {
            return Err(anyhow!("database unavailable"));
        }
        let mut persisted = self.persisted.lock().expect("persisted lock");
        persisted.push(interpretation.clone());
        Ok(format!("interp-{}", persisted.len()))
    }
}

#[derive(Default)]
struct RecordingUsage {
    outcomes: Mutex<Vec<UsageOutcome>>,
}

#[async_trait]
impl UsageRecorder for RecordingUsage {
    async fn record(&self, _request: &InterpretationRequest, outcome: UsageOutcome) {
        self.outcomes.lock().expect("outcomes lock").push(outcome);
    }
}

/// Records only after a long pause, like a slow accounting backend.
#[derive(Default)]
struct SlowUsage {
    outcomes: Mutex<Vec<UsageOutcome>>,
}

#[async_trait]
impl UsageRecorder for SlowUsage {
    async fn record(&self, _request: &InterpretationRequest, outcome: UsageOutcome) {
        tokio::time::sleep(Duration::from_secs(3)).await;
        self.outcomes.lock().expect("outcomes lock").push(outcome);
    }
}

fn chunks(items: Vec<Result<StreamChunk, InterpretError>>) -> ChunkStream {
    Box::pin(stream::iter(items))
}

async fn run(
    store: Arc<RecordingStore>,
    usage: Arc<RecordingUsage>,
    items: Vec<Result<StreamChunk, InterpretError>>,
) -> Vec<WireEvent> {
    let framer = StreamFramer::new(store, usage);
    let mut frames = framer.frame(inbound_request(), chunks(items));
    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    while let Some(bytes) = frames.next().await {
        for frame in decoder.push(&bytes) {
            events.push(serde_json::from_str(&frame.data).expect("valid wire event"));
        }
    }
    assert!(!decoder.has_pending(), "framed output must end on a frame boundary");
    events
}

fn text(text: &str) -> Result<StreamChunk, InterpretError> {
    Ok(StreamChunk::Text {
        text: text.to_string(),
    })
}

fn complete() -> Result<StreamChunk, InterpretError> {
    Ok(StreamChunk::Complete {
        interpretation: interpretation(INBOUND_TEXT, Mode::Inbound),
        metadata: metadata(),
        interpretation_id: None,
    })
}

#[tokio::test]
async fn given_successful_chunks_when_framed_then_complete_carries_persisted_id() {
    let store = Arc::new(RecordingStore::default());
    let usage = Arc::new(RecordingUsage::default());

    let events = run(
        Arc::clone(&store),
        Arc::clone(&usage),
        vec![text("{\"bottom"), text("Line\":"), complete()],
    )
    .await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        WireEvent::Text {
            text: "{\"bottom".to_string()
        }
    );
    match &events[2] {
        WireEvent::Complete {
            interpretation,
            interpretation_id,
            ..
        } => {
            assert_eq!(interpretation_id.as_deref(), Some("interp-1"));
            assert_eq!(interpretation, &crate::support::interpretation(INBOUND_TEXT, Mode::Inbound));
        }
        other => panic!("expected complete frame, got {:?}", other),
    }
    assert_eq!(store.persisted.lock().expect("lock").len(), 1);
    assert_eq!(
        *usage.outcomes.lock().expect("lock"),
        vec![UsageOutcome::Completed {
            interpretation_id: "interp-1".to_string(),
            metadata: metadata(),
        }]
    );
}

#[tokio::test]
async fn given_adapter_error_when_framed_then_single_error_frame_hides_internal_message() {
    let usage = Arc::new(RecordingUsage::default());
    let events = run(
        Arc::new(RecordingStore::default()),
        Arc::clone(&usage),
        vec![text("{\"bottomLine\""), Err(timeout_error(30_000)), text("ignored")],
    )
    .await;

    assert_eq!(events.len(), 2);
    match &events[1] {
        WireEvent::Error { error } => {
            assert_eq!(error.code, "TIMEOUT");
            assert_eq!(error.message, InterpretErrorKind::Timeout.public_message());
            assert!(!error.message.contains("30000"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }
    assert_eq!(
        *usage.outcomes.lock().expect("lock"),
        vec![UsageOutcome::Failed {
            kind: Some(InterpretErrorKind::Timeout),
            code: "TIMEOUT".to_string(),
        }]
    );
}

#[tokio::test]
async fn given_store_failure_when_framed_then_persistence_error_frame_ends_stream() {
    let store = Arc::new(RecordingStore {
        fail: true,
        ..RecordingStore::default()
    });
    let events = run(
        store,
        Arc::new(RecordingUsage::default()),
        vec![text("{}"), complete()],
    )
    .await;

    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
    assert!(matches!(
        &events[1],
        WireEvent::Error { error } if error.code == PERSISTENCE_ERROR_CODE
    ));
}

#[tokio::test]
async fn given_chunks_end_without_terminal_when_framed_then_provider_error_is_appended() {
    let events = run(
        Arc::new(RecordingStore::default()),
        Arc::new(RecordingUsage::default()),
        vec![text("{\"bottomLine\":\"cut")],
    )
    .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[1],
        WireEvent::Error { error } if error.code == "PROVIDER_ERROR"
    ));
    assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
}

#[tokio::test]
async fn given_slow_usage_recorder_when_terminal_is_sent_then_stream_ends_before_accounting() {
    let usage = Arc::new(SlowUsage::default());
    let framer = StreamFramer::new(Arc::new(RecordingStore::default()), usage.clone());
    let mut frames = framer.frame(inbound_request(), chunks(vec![text("{}"), complete()]));

    let mut decoder = SseDecoder::new();
    let mut terminal_seen = false;
    while !terminal_seen {
        let bytes = frames.next().await.expect("terminal frame should arrive");
        terminal_seen = decoder.push(&bytes).iter().any(|frame| {
            serde_json::from_str::<WireEvent>(&frame.data)
                .expect("valid wire event")
                .is_terminal()
        });
    }

    let after_terminal = tokio::time::timeout(Duration::from_millis(500), frames.next())
        .await
        .expect("stream should close right after the terminal frame");
    assert!(after_terminal.is_none());
    assert!(usage.outcomes.lock().expect("lock").is_empty());
}
