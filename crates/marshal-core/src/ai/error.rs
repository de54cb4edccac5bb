//! Upstream error type with retry-relevant structure.
//!
//! Carries an optional HTTP-style status and retry-after hint so the
//! resilience wrapper can classify failures without string matching where
//! a status is available.

use std::time::Duration;

use thiserror::Error;

/// Error from an upstream model invocation.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The request's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// Upstream responded with an HTTP-style status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Failure without a usable status (network reset, timeout, etc.).
    #[error("{message}")]
    Other {
        message: String,
        retry_after: Option<Duration>,
    },
}

impl UpstreamError {
    /// Build from a bare message, extracting an embedded status if present.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match extract_status_from_message(&message) {
            Some(status) => Self::Http {
                status,
                message,
                retry_after: None,
            },
            None => Self::Other {
                message,
                retry_after: None,
            },
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } | Self::Other { retry_after, .. } => *retry_after,
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Try to extract an HTTP status code from an error message.
pub fn extract_status_from_message(message: &str) -> Option<u16> {
    // Common patterns: "HTTP 429", "status: 429", "status code: 429"
    for pattern in &["HTTP ", "status: ", "status code: "] {
        if let Some(pos) = message.find(pattern) {
            let start = pos + pattern.len();
            let code_str: String = message[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = code_str.parse() {
                return Some(code);
            }
        }
    }
    None
}
