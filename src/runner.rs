use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    signal::unix::{SignalKind, signal},
};

use crate::{
    cli::CliArgs,
    config::Config,
    interpretation::{
        credentials::EnvCredentialProvider,
        provider::ProviderAdapter,
        types::{InterpretationRequest, Mode},
    },
    stream::{
        framer::StreamFramer,
        noop::{NoopInterpretationStore, NoopUsageRecorder},
    },
};

/// Request read from stdin; `sameCulture` is derived when omitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInput {
    message: String,
    sender_culture: String,
    receiver_culture: String,
    mode: Mode,
    #[serde(default)]
    same_culture: Option<bool>,
}

impl From<RequestInput> for InterpretationRequest {
    fn from(input: RequestInput) -> Self {
        let mut request = InterpretationRequest::new(
            input.message,
            input.sender_culture,
            input.receiver_culture,
            input.mode,
        );
        if let Some(same_culture) = input.same_culture {
            request.same_culture = same_culture;
        }
        request
    }
}

enum ExitReason {
    Finished,
    Signal(&'static str),
}

pub async fn run(config: Config, args: &CliArgs) -> Result<()> {
    let adapter = ProviderAdapter::from_config(
        config.provider.clone(),
        config.pricing,
        config.validation,
        &EnvCredentialProvider,
    )
    .await
    .map_err(|err| anyhow!(err))
    .context("failed to build provider adapter")?;

    let request = read_request().await?;
    tracing::info!(
        target: "provider",
        mode = request.mode.as_str(),
        same_culture = request.same_culture,
        buffered = args.buffered,
        "request_received"
    );

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let work = async {
        if args.buffered {
            run_buffered(&adapter, &request).await
        } else {
            run_streaming(&adapter, request.clone()).await
        }
    };

    let exit_reason = tokio::select! {
        _ = sigint.recv() => ExitReason::Signal("SIGINT"),
        _ = sigterm.recv() => ExitReason::Signal("SIGTERM"),
        finished = work => {
            finished?;
            ExitReason::Finished
        }
    };

    if let ExitReason::Signal(signal_name) = exit_reason {
        tracing::warn!(target: "provider", signal = signal_name, "interrupted");
        eprintln!("crosstalk stopped: received {signal_name}");
    }
    Ok(())
}

async fn read_request() -> Result<InterpretationRequest> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read request from stdin")?;
    let input: RequestInput =
        serde_json::from_str(&raw).context("stdin is not a valid interpretation request")?;
    Ok(input.into())
}

async fn run_streaming(adapter: &ProviderAdapter, request: InterpretationRequest) -> Result<()> {
    let framer = StreamFramer::new(
        Arc::new(NoopInterpretationStore),
        Arc::new(NoopUsageRecorder),
    );
    let chunks = adapter.interpret_stream(request.clone(), request.mode);
    let mut frames = framer.frame(request, chunks);
    let mut stdout = tokio::io::stdout();

    while let Some(frame) = frames.next().await {
        stdout
            .write_all(&frame)
            .await
            .context("failed to write frame to stdout")?;
        stdout.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}

async fn run_buffered(adapter: &ProviderAdapter, request: &InterpretationRequest) -> Result<()> {
    let outcome = adapter
        .interpret(request, request.mode)
        .await
        .map_err(|err| anyhow!(err))
        .context("interpretation failed")?;
    let mut body = serde_json::to_vec_pretty(&outcome).context("failed to encode outcome")?;
    body.push(b'\n');

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(&body)
        .await
        .context("failed to write outcome to stdout")?;
    stdout.flush().await.context("failed to flush stdout")?;
    Ok(())
}
