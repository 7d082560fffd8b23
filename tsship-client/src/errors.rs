use thiserror::Error;
use tsship_core::IdentityError;
use tsship_persistent_storage::PersistentStorageError;

pub type Result<T> = std::result::Result<T, ShipperError>;

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("invalid measurement: {0}")]
    InvalidInput(#[from] IdentityError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with retryable status {0}")]
    TransientStatus(u16),

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("offline storage error: {0}")]
    Storage(#[from] PersistentStorageError),

    #[error("unable to (de)compress batch: {0}")]
    Compression(#[source] std::io::Error),

    #[error("pipeline is shut down")]
    ShutDown,
}

impl ShipperError {
    /// Connect and timeout failures, plus 5xx answers the endpoint could not explain.
    pub fn is_transient(&self) -> bool {
        match self {
            ShipperError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ShipperError::TransientStatus(_) => true,
            _ => false,
        }
    }
}
