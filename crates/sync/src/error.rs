use bankfeed_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream rejected the access token")]
    Unauthorized,
    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected upstream payload: {0}")]
    Decode(String),
    #[error("No institution named '{name}' in {country}")]
    InstitutionNotFound { country: String, name: String },
}

impl UpstreamError {
    /// The 401-equivalent that triggers a token refresh.
    pub fn is_authorization(&self) -> bool {
        matches!(self, UpstreamError::Unauthorized)
    }

    /// Timeouts, transport failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Could not resolve institution for '{bank_name}': {source}")]
    Institution {
        bank_name: String,
        #[source]
        source: UpstreamError,
    },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Could not list linked sessions: {0}")]
    Storage(#[from] StorageError),
}
