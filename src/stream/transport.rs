use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    interpretation::types::{
        CredentialRef, InterpretationId, InterpretationRequest, Mode, ResolvedCredential,
    },
    stream::sse::EVENT_STREAM_CONTENT_TYPE,
};

pub const GENERIC_FAILURE_CODE: &str = "INTERPRETATION_FAILED";
pub const GENERIC_FAILURE_MESSAGE: &str = "We couldn't interpret this message. Please try again.";

/// Request body shared by the streaming and buffered endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub message: String,
    pub sender_culture: String,
    pub receiver_culture: String,
    pub mode: Mode,
}

impl From<&InterpretationRequest> for SubmitRequest {
    fn from(request: &InterpretationRequest) -> Self {
        Self {
            message: request.message.clone(),
            sender_culture: request.sender_culture.clone(),
            receiver_culture: request.receiver_culture.clone(),
            mode: request.mode,
        }
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request could not be sent: {0}")]
    Request(String),
    #[error("server answered with status {status}")]
    Status { status: u16, body: String },
    #[error("response body could not be read: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum BufferedError {
    #[error("request rejected with status {status} ({code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response body is not a valid interpretation envelope: {0}")]
    InvalidBody(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSuccess {
    pub interpretation: Value,
    pub interpretation_id: Option<InterpretationId>,
    pub messages_remaining: Option<i64>,
}

/// Client side of the two interpretation endpoints.
#[async_trait]
pub trait InterpretTransport: Send + Sync {
    async fn open_stream(&self, body: &SubmitRequest) -> Result<ByteStream, TransportError>;

    async fn submit_buffered(&self, body: &SubmitRequest)
    -> Result<BufferedSuccess, BufferedError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_buffered_path")]
    pub buffered_path: String,
    #[serde(default)]
    pub credential: CredentialRef,
    #[serde(default = "default_buffered_timeout_ms")]
    pub buffered_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            buffered_path: default_buffered_path(),
            credential: CredentialRef::None,
            buffered_timeout_ms: default_buffered_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_stream_path() -> String {
    "/api/interpret/stream".to_string()
}

fn default_buffered_path() -> String {
    "/api/interpret".to_string()
}

fn default_buffered_timeout_ms() -> u64 {
    60_000
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    stream_url: String,
    buffered_url: String,
    buffered_timeout: Duration,
    bearer: Option<String>,
}

impl HttpTransport {
    pub fn new(
        config: &ClientConfig,
        credential: ResolvedCredential,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            stream_url: format!("{}{}", base, config.stream_path),
            buffered_url: format!("{}{}", base, config.buffered_path),
            buffered_timeout: Duration::from_millis(config.buffered_timeout_ms.max(1)),
            bearer: credential.secret,
        })
    }

    fn post(&self, url: &str, body: &SubmitRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        match &self.bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl InterpretTransport for HttpTransport {
    async fn open_stream(&self, body: &SubmitRequest) -> Result<ByteStream, TransportError> {
        let response = self
            .post(&self.stream_url, body)
            .header(header::ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(|err| TransportError::Read(err.to_string())));
        Ok(Box::pin(bytes))
    }

    async fn submit_buffered(
        &self,
        body: &SubmitRequest,
    ) -> Result<BufferedSuccess, BufferedError> {
        let response = self
            .post(&self.buffered_url, body)
            .timeout(self.buffered_timeout)
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::Read(err.to_string()))?;
        parse_buffered_response(status, &text)
    }
}

/// Interprets the `{success, data, metadata}` / `{success, error}` envelope.
pub fn parse_buffered_response(
    status: StatusCode,
    text: &str,
) -> Result<BufferedSuccess, BufferedError> {
    let envelope = serde_json::from_str::<Value>(text).ok();

    let succeeded = envelope
        .as_ref()
        .and_then(|value| value.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !status.is_success() || !succeeded {
        let error = envelope.as_ref().and_then(|value| value.get("error"));
        let field = |key: &str| {
            error
                .and_then(|error| error.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        return Err(BufferedError::Rejected {
            status: status.as_u16(),
            code: field("code").unwrap_or_else(|| GENERIC_FAILURE_CODE.to_string()),
            message: field("message").unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        });
    }

    let Some(envelope) = envelope else {
        return Err(BufferedError::InvalidBody("body is not JSON".to_string()));
    };
    let data = envelope
        .get("data")
        .ok_or_else(|| BufferedError::InvalidBody("missing `data`".to_string()))?;
    let interpretation = data
        .get("interpretation")
        .filter(|value| value.is_object())
        .cloned()
        .ok_or_else(|| BufferedError::InvalidBody("missing `data.interpretation`".to_string()))?;

    Ok(BufferedSuccess {
        interpretation,
        interpretation_id: data
            .get("interpretationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        messages_remaining: envelope
            .get("metadata")
            .and_then(|metadata| metadata.get("messages_remaining"))
            .and_then(Value::as_i64),
    })
}
