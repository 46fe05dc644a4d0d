use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use crate::interpretation::{
    error::InterpretError,
    types::{ResolvedCredential, UsageStats},
};

pub mod anthropic;
pub mod http_common;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    TextDelta { delta: String },
    Usage { usage: UsageStats, model: Option<String> },
    Completed,
}

pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, InterpretError>> + Send>>;

/// One prompt pair ready to send.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub cacheable_system_prompt: String,
    pub dynamic_prompt: String,
    pub stream: bool,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct BackendContext {
    pub request_id: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_version: String,
    pub credential: ResolvedCredential,
    pub timeout: Duration,
    pub channel_capacity: usize,
    /// Cancelled when the caller gives up; the backend must stop reading.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ProviderBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn invoke(
        &self,
        ctx: BackendContext,
        call: ProviderCall,
    ) -> Result<ProviderEventStream, InterpretError>;
}
