use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Stable failure codes derived from yt-dlp's stderr.
/// Keep these stable so a front end can map them to remediation hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    Unknown,
    Network,
    LoginRequired,
    BotCheck,
    GeoRestricted,
    ExtractorOutdated,
    FormatUnavailable,
}

/// Coarse error families. Retry/backoff policy is decided per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Filesystem,
    Extraction,
    Subprocess,
    Persistence,
    Concurrency,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("destination directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("a download is already running")]
    Busy,

    #[error("the queue is already being processed")]
    QueueBusy,

    #[error("{message}")]
    Extraction { code: FailureCode, message: String },

    #[error("external tool is missing: {tool}")]
    ToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out: {tool} after {after:?}")]
    ToolTimeout { tool: String, after: Duration },

    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::MissingDirectory(_) | AppError::Io(_) => ErrorKind::Filesystem,
            AppError::Busy | AppError::QueueBusy => ErrorKind::Concurrency,
            AppError::Extraction { .. } => ErrorKind::Extraction,
            AppError::ToolMissing { .. }
            | AppError::ToolFailed { .. }
            | AppError::ToolTimeout { .. } => ErrorKind::Subprocess,
            AppError::Persistence(_) | AppError::Json(_) => ErrorKind::Persistence,
        }
    }

    /// Whether trying the same operation again later can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Busy | AppError::QueueBusy | AppError::ToolTimeout { .. } => true,
            AppError::Extraction { code, .. } => {
                matches!(code, FailureCode::Network | FailureCode::Unknown)
            }
            _ => false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(AppError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            AppError::MissingDirectory(PathBuf::from("/nope")).kind(),
            ErrorKind::Filesystem
        );
        assert_eq!(AppError::Busy.kind(), ErrorKind::Concurrency);
        assert_eq!(
            AppError::ToolTimeout {
                tool: "ffmpeg".into(),
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Subprocess
        );
        assert_eq!(
            AppError::Persistence(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Persistence
        );
    }

    #[test]
    fn network_failures_are_retryable_login_is_not() {
        let net = AppError::Extraction {
            code: FailureCode::Network,
            message: "timed out".into(),
        };
        let login = AppError::Extraction {
            code: FailureCode::LoginRequired,
            message: "sign in".into(),
        };
        assert!(net.is_retryable());
        assert!(!login.is_retryable());
        assert!(!AppError::validation("empty").is_retryable());
    }

    #[test]
    fn extraction_display_is_the_raw_message() {
        let err = AppError::Extraction {
            code: FailureCode::Unknown,
            message: "ERROR: Unsupported URL".into(),
        };
        assert_eq!(err.to_string(), "ERROR: Unsupported URL");
    }
}
