use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single call to a model backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("no API key configured (set GOOGLE_API_KEY)")]
    MissingCredential,
    #[error("{code} {}: {message}", .status.as_deref().unwrap_or("ERROR"))]
    Status {
        code: u16,
        status: Option<String>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ModelError::InvalidPayload(e.to_string())
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    #[error(transparent)]
    Request(#[from] ModelError),
    #[error("endpoint still unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ModelError },
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode session archive: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_reads_like_provider_message() {
        let e = ModelError::Status {
            code: 503,
            status: Some("UNAVAILABLE".into()),
            message: "The model is overloaded.".into(),
        };
        assert_eq!(e.to_string(), "503 UNAVAILABLE: The model is overloaded.");
    }

    #[test]
    fn exhausted_embeds_last_failure() {
        let e = CompletionError::Exhausted {
            attempts: 3,
            last: ModelError::Transport("connection reset".into()),
        };
        let s = e.to_string();
        assert!(s.contains("3 attempts"));
        assert!(s.contains("connection reset"));
    }
}
