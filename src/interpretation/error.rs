use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpretErrorKind {
    Timeout,
    RateLimit,
    Authentication,
    Parsing,
    Provider,
    Configuration,
}

impl InterpretErrorKind {
    /// Stable machine-readable code carried on error frames.
    pub fn code(self) -> &'static str {
        match self {
            InterpretErrorKind::Timeout => "TIMEOUT",
            InterpretErrorKind::RateLimit => "RATE_LIMITED",
            InterpretErrorKind::Authentication => "AUTH_ERROR",
            InterpretErrorKind::Parsing => "PARSING_ERROR",
            InterpretErrorKind::Provider => "PROVIDER_ERROR",
            InterpretErrorKind::Configuration => "CONFIGURATION_ERROR",
        }
    }

    /// Human-readable message safe to show to an end user.
    pub fn public_message(self) -> &'static str {
        match self {
            InterpretErrorKind::Timeout => "The interpretation took too long. Please try again.",
            InterpretErrorKind::RateLimit => {
                "Too many requests right now. Please wait a moment and try again."
            }
            InterpretErrorKind::Authentication => {
                "The interpretation service is misconfigured. Please contact support."
            }
            InterpretErrorKind::Parsing => {
                "We could not read the interpretation result. Please try again."
            }
            InterpretErrorKind::Provider => {
                "The interpretation service is temporarily unavailable. Please try again."
            }
            InterpretErrorKind::Configuration => {
                "The interpretation service is misconfigured. Please contact support."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretError {
    pub kind: InterpretErrorKind,
    pub message: String,
    pub retryable: bool,
    pub retry_after_secs: Option<u64>,
    pub provider_http_status: Option<u16>,
}

impl InterpretError {
    pub fn new(kind: InterpretErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                InterpretErrorKind::Timeout
                    | InterpretErrorKind::Parsing
                    | InterpretErrorKind::Provider
            ),
            retry_after_secs: None,
            provider_http_status: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn with_provider_http_status(mut self, status: u16) -> Self {
        self.provider_http_status = Some(status);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn public_message(&self) -> &'static str {
        self.kind.public_message()
    }
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.provider_http_status, self.retry_after_secs) {
            (Some(status), Some(retry_after)) => write!(
                f,
                "{} (status={}, retry_after_secs={})",
                self.message, status, retry_after
            ),
            (Some(status), None) => write!(f, "{} (status={})", self.message, status),
            (None, Some(retry_after)) => {
                write!(f, "{} (retry_after_secs={})", self.message, retry_after)
            }
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for InterpretError {}

pub fn timeout_error(timeout_ms: u64) -> InterpretError {
    InterpretError::new(
        InterpretErrorKind::Timeout,
        format!("provider call exceeded deadline of {}ms", timeout_ms),
    )
}

pub fn parsing_error(message: impl Into<String>) -> InterpretError {
    InterpretError::new(InterpretErrorKind::Parsing, message)
}

pub fn provider_error(message: impl Into<String>) -> InterpretError {
    InterpretError::new(InterpretErrorKind::Provider, message)
}

pub fn configuration_error(message: impl Into<String>) -> InterpretError {
    InterpretError::new(InterpretErrorKind::Configuration, message).with_retryable(false)
}
