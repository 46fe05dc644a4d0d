use std::{pin::Pin, sync::Arc};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    interpretation::{
        error::InterpretErrorKind, provider::ChunkStream, types::InterpretationRequest,
        types::StreamChunk,
    },
    stream::{
        ports::{InterpretationStore, UsageOutcome, UsageRecorder},
        wire::WireEvent,
    },
};

pub const PERSISTENCE_ERROR_CODE: &str = "PERSISTENCE_ERROR";

pub type FrameStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Turns an adapter chunk stream into SSE bytes with exactly one terminal frame.
#[derive(Clone)]
pub struct StreamFramer {
    store: Arc<dyn InterpretationStore>,
    usage: Arc<dyn UsageRecorder>,
    capacity: usize,
}

impl StreamFramer {
    pub fn new(store: Arc<dyn InterpretationStore>, usage: Arc<dyn UsageRecorder>) -> Self {
        Self {
            store,
            usage,
            capacity: 64,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn frame(&self, request: InterpretationRequest, chunks: ChunkStream) -> FrameStream {
        let (tx, rx) = mpsc::channel::<Bytes>(self.capacity);
        let store = Arc::clone(&self.store);
        let usage = Arc::clone(&self.usage);

        tokio::spawn(async move {
            let terminal = run_framer(&tx, &request, chunks, store.as_ref()).await;
            if let Some((event, outcome)) = terminal {
                let _ = tx.send(event.to_frame()).await;
                // Close the client stream before accounting runs.
                drop(tx);
                usage.record(&request, outcome).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Forwards text frames and returns the terminal event, or `None` if the
/// client went away first.
async fn run_framer(
    tx: &mpsc::Sender<Bytes>,
    request: &InterpretationRequest,
    mut chunks: ChunkStream,
    store: &dyn InterpretationStore,
) -> Option<(WireEvent, UsageOutcome)> {
    let mut text_frames = 0_usize;

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(
                    target: "framer",
                    kind = ?err.kind,
                    error = %err,
                    text_frames = text_frames,
                    "stream_failed"
                );
                let outcome = UsageOutcome::Failed {
                    kind: Some(err.kind),
                    code: err.code().to_string(),
                };
                return Some((WireEvent::from(&err), outcome));
            }
        };

        match chunk {
            StreamChunk::Text { text } => {
                text_frames += 1;
                if tx.send(WireEvent::Text { text }.to_frame()).await.is_err() {
                    tracing::debug!(target: "framer", text_frames = text_frames, "client_disconnected");
                    return None;
                }
            }
            StreamChunk::Complete {
                interpretation,
                metadata,
                interpretation_id,
            } => {
                let interpretation_id = match interpretation_id {
                    Some(id) => id,
                    None => match store.persist(request, &interpretation, &metadata).await {
                        Ok(id) => id,
                        Err(err) => {
                            tracing::error!(target: "framer", error = %err, "persist_failed");
                            return Some((
                                WireEvent::error(
                                    PERSISTENCE_ERROR_CODE,
                                    "We could not save this interpretation. Please try again.",
                                ),
                                UsageOutcome::Failed {
                                    kind: None,
                                    code: PERSISTENCE_ERROR_CODE.to_string(),
                                },
                            ));
                        }
                    },
                };
                tracing::info!(
                    target: "framer",
                    interpretation_id = %interpretation_id,
                    text_frames = text_frames,
                    "stream_completed"
                );
                let outcome = UsageOutcome::Completed {
                    interpretation_id: interpretation_id.clone(),
                    metadata: metadata.clone(),
                };
                return Some((
                    WireEvent::Complete {
                        interpretation,
                        metadata,
                        interpretation_id: Some(interpretation_id),
                    },
                    outcome,
                ));
            }
            StreamChunk::Error { code, message } => {
                let outcome = UsageOutcome::Failed {
                    kind: None,
                    code: code.clone(),
                };
                return Some((WireEvent::error(code, message), outcome));
            }
        }
    }

    tracing::warn!(target: "framer", text_frames = text_frames, "stream_ended_without_terminal");
    let kind = InterpretErrorKind::Provider;
    Some((
        WireEvent::error(kind.code(), kind.public_message()),
        UsageOutcome::Failed {
            kind: Some(kind),
            code: kind.code().to_string(),
        },
    ))
}
