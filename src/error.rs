use std::time::Duration;
use thiserror::Error;

/// Every failure the chat client can surface to a caller.
///
/// None of these are fatal to the process: each one renders a message that
/// the front-end shows to the user.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Server unavailable after {attempts} attempt(s): {last}")]
    TransientNetwork {
        attempts: u32,
        last: String,
    },

    #[error("Server returned status code {status} - {body}")]
    PermanentRequest {
        status: u16,
        body: String,
    },

    #[error("Malformed stream record '{line}': {source}")]
    MalformedStreamRecord {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error pulling model '{model}': {output}")]
    ModelPullFailed {
        model: String,
        output: String,
    },

    #[error("Model '{model}' pulled but not found locally after {attempts} attempts.")]
    ModelNotVisibleAfterPull {
        model: String,
        attempts: u32,
    },

    #[error("Request timed out after {after:?}")]
    Timeout {
        after: Duration,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True for the conditions the transport layer is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::TransientNetwork { .. } | ClientError::Timeout { .. })
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
