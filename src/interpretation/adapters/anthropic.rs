use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, header};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    interpretation::{
        adapters::{
            BackendContext, ProviderBackend, ProviderCall, ProviderEvent, ProviderEventStream,
            http_common,
        },
        error::{InterpretError, InterpretErrorKind, configuration_error, provider_error},
        types::{ANTHROPIC_PROVIDER, UsageStats},
    },
    stream::sse::{EVENT_STREAM_CONTENT_TYPE, SseDecoder, SseFrame},
};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

#[derive(Clone)]
pub struct AnthropicBackend {
    client: Client,
}

impl Default for AnthropicBackend {
    fn default() -> Self {
        Self {
            client: Client::builder()
                .pool_idle_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl ProviderBackend for AnthropicBackend {
    fn kind(&self) -> &'static str {
        ANTHROPIC_PROVIDER
    }

    async fn invoke(
        &self,
        ctx: BackendContext,
        call: ProviderCall,
    ) -> Result<ProviderEventStream, InterpretError> {
        let api_key = ctx
            .credential
            .secret
            .clone()
            .ok_or_else(|| configuration_error("anthropic provider requires an api key"))?;
        let url = ctx
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let body = build_request_body(&ctx.model, &call);

        let (tx, rx) = mpsc::channel::<Result<ProviderEvent, InterpretError>>(
            ctx.channel_capacity.max(1),
        );
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut req_builder = client
                .post(url)
                .timeout(ctx.timeout)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-api-key", api_key)
                .header("anthropic-version", ctx.api_version.as_str())
                .header("x-request-id", ctx.request_id.as_str())
                .json(&body);
            if call.stream {
                req_builder = req_builder.header(header::ACCEPT, EVENT_STREAM_CONTENT_TYPE);
            }

            let response = tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                response = req_builder.send() => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    let _ = tx.send(Err(map_reqwest_error(&err, ctx.timeout))).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let retry_after = http_common::parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(Err(http_common::map_http_error(status, retry_after, &body)))
                    .await;
                return;
            }

            if call.stream {
                let mut stream = response.bytes_stream();
                let mut decoder = SseDecoder::new();

                loop {
                    let item = tokio::select! {
                        _ = ctx.cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    let chunk = match item {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(err)) => {
                            let _ = tx.send(Err(map_reqwest_error(&err, ctx.timeout))).await;
                            return;
                        }
                        None => {
                            let _ = tx
                                .send(Err(provider_error(
                                    "anthropic stream closed before message_stop",
                                )))
                                .await;
                            return;
                        }
                    };

                    for frame in decoder.push(&chunk) {
                        match parse_stream_frame(&frame) {
                            Ok(events) => {
                                for event in events {
                                    let terminal = matches!(event, ProviderEvent::Completed);
                                    if tx.send(Ok(event)).await.is_err() || terminal {
                                        return;
                                    }
                                }
                            }
                            Err(err) => {
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                        }
                    }
                }
            }

            let payload = match response.json::<Value>().await {
                Ok(payload) => payload,
                Err(err) => {
                    let _ = tx
                        .send(Err(provider_error(format!(
                            "anthropic body decode failed: {}",
                            err
                        ))))
                        .await;
                    return;
                }
            };

            match parse_non_stream_payload(&payload) {
                Ok(events) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

pub fn build_request_body(model: &str, call: &ProviderCall) -> Value {
    json!({
        "model": model,
        "max_tokens": call.max_output_tokens,
        "stream": call.stream,
        "system": [
            {
                "type": "text",
                "text": call.cacheable_system_prompt,
                "cache_control": {"type": "ephemeral"}
            }
        ],
        "messages": [
            {"role": "user", "content": call.dynamic_prompt}
        ]
    })
}

fn map_reqwest_error(err: &reqwest::Error, timeout: Duration) -> InterpretError {
    if err.is_timeout() {
        return InterpretError::new(
            InterpretErrorKind::Timeout,
            format!("anthropic request timed out after {}ms", timeout.as_millis()),
        );
    }
    provider_error(format!("anthropic request failed: {}", err))
}

/// Parses one SSE frame of the Messages streaming protocol.
pub fn parse_stream_frame(frame: &SseFrame) -> Result<Vec<ProviderEvent>, InterpretError> {
    let payload = serde_json::from_str::<Value>(&frame.data).map_err(|err| {
        provider_error(format!("failed to parse anthropic SSE payload: {}", err))
    })?;
    let event_type = frame
        .event
        .clone()
        .or_else(|| {
            payload
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    let mut events = Vec::new();
    match event_type.as_str() {
        "message_start" => {
            let message = payload.get("message");
            let model = message
                .and_then(|m| m.get("model"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(usage) = message.and_then(|m| m.get("usage")) {
                events.push(ProviderEvent::Usage {
                    usage: parse_usage(usage),
                    model,
                });
            }
        }
        "content_block_delta" => {
            let delta = payload.get("delta");
            let is_text = delta
                .and_then(|d| d.get("type"))
                .and_then(Value::as_str)
                .is_some_and(|t| t == "text_delta");
            if let Some(text) = delta
                .filter(|_| is_text)
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                && !text.is_empty()
            {
                events.push(ProviderEvent::TextDelta {
                    delta: text.to_string(),
                });
            }
        }
        "message_delta" => {
            if let Some(usage) = payload.get("usage") {
                events.push(ProviderEvent::Usage {
                    usage: parse_usage(usage),
                    model: None,
                });
            }
        }
        "message_stop" => events.push(ProviderEvent::Completed),
        "error" => {
            let error = payload.get("error");
            let error_type = error
                .and_then(|e| e.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(http_common::map_stream_error(error_type, message));
        }
        _ => {}
    }

    Ok(events)
}

pub fn parse_non_stream_payload(payload: &Value) -> Result<Vec<ProviderEvent>, InterpretError> {
    let blocks = payload
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| provider_error("anthropic response missing content"))?;

    let text = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(ProviderEvent::TextDelta { delta: text });
    }
    if let Some(usage) = payload.get("usage") {
        events.push(ProviderEvent::Usage {
            usage: parse_usage(usage),
            model: payload
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    events.push(ProviderEvent::Completed);
    Ok(events)
}

/// `input_tokens` here counts cache reads too, matching the cost model's
/// `regular = input - cache_read` split.
fn parse_usage(usage: &Value) -> UsageStats {
    let field = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    let cache_read_tokens = field("cache_read_input_tokens");
    UsageStats {
        input_tokens: field("input_tokens") + cache_read_tokens,
        output_tokens: field("output_tokens"),
        cache_read_tokens,
        cache_creation_tokens: field("cache_creation_input_tokens"),
    }
}
