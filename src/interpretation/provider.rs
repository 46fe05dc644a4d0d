use std::{pin::Pin, sync::Arc, time::Duration};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::interpretation::{
    adapters::{
        BackendContext, ProviderBackend, ProviderCall, ProviderEvent, ProviderEventStream,
        anthropic::AnthropicBackend,
    },
    cost::{PricingConfig, compute_cost},
    credentials::CredentialProvider,
    error::{InterpretError, configuration_error, provider_error, timeout_error},
    prompts::{PromptTemplate, build_dynamic_prompt, cacheable_system_prompt},
    types::{
        ANTHROPIC_PROVIDER, InterpretationOutcome, InterpretationRequest, LlmMetadata, Mode,
        ProviderConfig, ResolvedCredential, StreamChunk, UsageStats,
    },
    validator::{ValidationBounds, validate},
};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, InterpretError>> + Send>>;

#[derive(Clone)]
pub struct ProviderAdapter {
    backend: Arc<dyn ProviderBackend>,
    credential: ResolvedCredential,
    config: ProviderConfig,
    pricing: PricingConfig,
    bounds: ValidationBounds,
    system_prompt: Arc<str>,
}

impl ProviderAdapter {
    /// Selects the backend named by `config.kind`; only `anthropic` exists.
    pub async fn from_config(
        config: ProviderConfig,
        pricing: PricingConfig,
        bounds: ValidationBounds,
        credential_provider: &dyn CredentialProvider,
    ) -> Result<Self, InterpretError> {
        let backend: Arc<dyn ProviderBackend> = match config.kind.trim() {
            ANTHROPIC_PROVIDER => Arc::new(AnthropicBackend::default()),
            other => {
                return Err(configuration_error(format!(
                    "unsupported provider '{}'; only '{}' is implemented",
                    other, ANTHROPIC_PROVIDER
                )));
            }
        };
        if config.model.trim().is_empty() {
            return Err(configuration_error("provider.model cannot be empty"));
        }
        let credential = credential_provider.resolve(&config.credential).await?;
        Ok(Self::new(backend, credential, config, pricing, bounds))
    }

    pub fn new(
        backend: Arc<dyn ProviderBackend>,
        credential: ResolvedCredential,
        config: ProviderConfig,
        pricing: PricingConfig,
        bounds: ValidationBounds,
    ) -> Self {
        Self {
            backend,
            credential,
            config,
            pricing,
            bounds,
            system_prompt: Arc::from(cacheable_system_prompt()),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn bounds(&self) -> &ValidationBounds {
        &self.bounds
    }

    pub async fn interpret(
        &self,
        request: &InterpretationRequest,
        mode: Mode,
    ) -> Result<InterpretationOutcome, InterpretError> {
        let mut chunks = self.spawn_call(request.clone(), mode, false);

        while let Some(item) = chunks.next().await {
            match item? {
                StreamChunk::Text { .. } => {}
                StreamChunk::Complete {
                    interpretation,
                    metadata,
                    ..
                } => {
                    return Ok(InterpretationOutcome {
                        interpretation,
                        metadata,
                    });
                }
                StreamChunk::Error { code, message } => {
                    return Err(provider_error(format!("{}: {}", code, message)));
                }
            }
        }

        Err(provider_error("provider call ended without a terminal chunk"))
    }

    /// Yields one `Text` chunk per delta then exactly one `Complete` chunk, or an
    /// `Err` item on failure. Dropping the stream cancels the provider call.
    pub fn interpret_stream(&self, request: InterpretationRequest, mode: Mode) -> ChunkStream {
        self.spawn_call(request, mode, true)
    }

    fn spawn_call(&self, request: InterpretationRequest, mode: Mode, stream: bool) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let request_id = Uuid::now_v7().to_string();
        let template = PromptTemplate::select(mode, request.same_culture);
        let span = tracing::info_span!(
            target: "provider",
            "interpretation_call",
            request_id = %request_id,
            mode = mode.as_str(),
            template = template.name(),
            model = %self.config.model,
            stream = stream,
        );
        let adapter = self.clone();

        tokio::spawn(
            async move {
                run_call(adapter, tx, request_id, request, mode, stream).await;
            }
            .instrument(span),
        );

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn run_call(
    adapter: ProviderAdapter,
    tx: mpsc::Sender<Result<StreamChunk, InterpretError>>,
    request_id: String,
    request: InterpretationRequest,
    mode: Mode,
    stream: bool,
) {
    let started_at = std::time::Instant::now();
    let timeout = Duration::from_millis(adapter.config.timeout_ms.max(1));
    let deadline = Instant::now() + timeout;
    let cancel = tokio_util::sync::CancellationToken::new();
    let _cancel_on_exit = cancel.clone().drop_guard();

    let call = ProviderCall {
        cacheable_system_prompt: adapter.system_prompt.to_string(),
        dynamic_prompt: build_dynamic_prompt(
            &request.message,
            &request.sender_culture,
            &request.receiver_culture,
            request.same_culture,
            mode,
        ),
        stream,
        max_output_tokens: adapter.config.max_output_tokens,
    };
    let ctx = BackendContext {
        request_id,
        model: adapter.config.model.clone(),
        endpoint: adapter.config.endpoint.clone(),
        api_version: adapter.config.anthropic_version.clone(),
        credential: adapter.credential.clone(),
        timeout,
        channel_capacity: adapter.config.channel_capacity,
        cancel: cancel.clone(),
    };

    tracing::debug!(target: "provider", timeout_ms = adapter.config.timeout_ms, "provider_call_start");

    let invoked = tokio::select! {
        invoked = adapter.backend.invoke(ctx, call) => invoked,
        _ = sleep_until(deadline) => Err(timeout_error(adapter.config.timeout_ms)),
    };
    let mut events: ProviderEventStream = match invoked {
        Ok(events) => events,
        Err(err) => {
            fail(&tx, err).await;
            return;
        }
    };

    let mut text = String::new();
    let mut usage = UsageStats::default();
    let mut model = adapter.config.model.clone();
    let mut deltas = 0_usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                tracing::debug!(target: "provider", deltas = deltas, "provider_call_abandoned");
                return;
            }
            _ = sleep_until(deadline) => {
                cancel.cancel();
                fail(&tx, timeout_error(adapter.config.timeout_ms)).await;
                return;
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(ProviderEvent::TextDelta { delta })) => {
                deltas += 1;
                text.push_str(&delta);
                if stream && tx.send(Ok(StreamChunk::Text { text: delta })).await.is_err() {
                    return;
                }
            }
            Some(Ok(ProviderEvent::Usage {
                usage: reported,
                model: reported_model,
            })) => {
                usage.merge(&reported);
                if let Some(reported_model) = reported_model {
                    model = reported_model;
                }
            }
            Some(Ok(ProviderEvent::Completed)) => break,
            Some(Err(err)) => {
                fail(&tx, err).await;
                return;
            }
            None => {
                fail(&tx, provider_error("provider stream ended before completion")).await;
                return;
            }
        }
    }

    let interpretation = match validate(&text, mode, request.same_culture, &adapter.bounds) {
        Ok(interpretation) => interpretation,
        Err(err) => {
            tracing::warn!(
                target: "provider",
                output_chars = text.len(),
                error = %err,
                "model_output_rejected"
            );
            fail(&tx, err).await;
            return;
        }
    };

    let metadata = LlmMetadata {
        cost_usd: compute_cost(&usage, &adapter.pricing),
        response_time_ms: started_at.elapsed().as_millis() as u64,
        token_count: usage.input_tokens + usage.output_tokens,
        model,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_tokens,
        cache_creation_tokens: usage.cache_creation_tokens,
    };

    tracing::info!(
        target: "provider",
        deltas = deltas,
        emotions = interpretation.emotions().len(),
        input_tokens = metadata.input_tokens,
        output_tokens = metadata.output_tokens,
        cache_read_tokens = metadata.cache_read_tokens,
        cache_creation_tokens = metadata.cache_creation_tokens,
        cost_usd = metadata.cost_usd,
        response_time_ms = metadata.response_time_ms,
        "provider_call_completed"
    );

    let _ = tx
        .send(Ok(StreamChunk::Complete {
            interpretation,
            metadata,
            interpretation_id: None,
        }))
        .await;
}

async fn fail(tx: &mpsc::Sender<Result<StreamChunk, InterpretError>>, err: InterpretError) {
    tracing::warn!(
        target: "provider",
        kind = ?err.kind,
        retryable = err.retryable,
        status = ?err.provider_http_status,
        error = %err,
        "provider_call_failed"
    );
    let _ = tx.send(Err(err)).await;
}
