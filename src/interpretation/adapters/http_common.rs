use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::interpretation::error::{InterpretError, InterpretErrorKind};

pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

pub fn map_http_error(status: u16, retry_after_secs: Option<u64>, body: &str) -> InterpretError {
    let normalized_body = body.chars().take(240).collect::<String>();

    let mut err = match status {
        401 | 403 => InterpretError::new(
            InterpretErrorKind::Authentication,
            format!("provider rejected credentials with status {}", status),
        ),
        429 => {
            let err = InterpretError::new(
                InterpretErrorKind::RateLimit,
                format!("provider returned status {}", status),
            );
            match retry_after_secs {
                Some(secs) => err.with_retry_after_secs(secs),
                None => err,
            }
        }
        _ => InterpretError::new(
            InterpretErrorKind::Provider,
            format!("provider returned status {}", status),
        ),
    };
    err = err.with_provider_http_status(status);

    if !normalized_body.is_empty() {
        err.message = format!("{}: {}", err.message, normalized_body);
    }

    err
}

/// Maps an in-stream provider error object by its `type` field.
pub fn map_stream_error(error_type: &str, message: &str) -> InterpretError {
    let kind = match error_type {
        "authentication_error" | "permission_error" => InterpretErrorKind::Authentication,
        "rate_limit_error" => InterpretErrorKind::RateLimit,
        _ => InterpretErrorKind::Provider,
    };
    InterpretError::new(kind, format!("provider stream error {}: {}", error_type, message))
}
