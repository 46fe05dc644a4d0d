use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    interpretation::{
        error::InterpretError,
        types::{Interpretation, InterpretationId, LlmMetadata, StreamChunk},
    },
    stream::sse::encode_data_frame,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// Payload of one `data:` frame on the interpretation event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        interpretation: Interpretation,
        metadata: LlmMetadata,
        #[serde(default)]
        interpretation_id: Option<InterpretationId>,
    },
    Error {
        error: WireError,
    },
}

impl WireEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        WireEvent::Error {
            error: WireError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WireEvent::Text { .. })
    }

    pub fn to_frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":{"code":"INTERNAL_ERROR","message":"Failed to encode event."}}"#
                .to_string()
        });
        encode_data_frame(&json)
    }
}

impl From<StreamChunk> for WireEvent {
    fn from(chunk: StreamChunk) -> Self {
        match chunk {
            StreamChunk::Text { text } => WireEvent::Text { text },
            StreamChunk::Complete {
                interpretation,
                metadata,
                interpretation_id,
            } => WireEvent::Complete {
                interpretation,
                metadata,
                interpretation_id,
            },
            StreamChunk::Error { code, message } => WireEvent::error(code, message),
        }
    }
}

impl From<&InterpretError> for WireEvent {
    fn from(err: &InterpretError) -> Self {
        WireEvent::error(err.code(), err.public_message())
    }
}
