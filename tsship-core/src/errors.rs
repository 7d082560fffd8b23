use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors raised while building a metric identity or a datapoint.
///
/// These are the only errors surfaced synchronously to producers; everything on the
/// delivery path is recovered locally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdentityError {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric value must be finite, got {0}")]
    NonFiniteValue(f64),

    #[error("content hash collision on {hash:#018x}: '{existing}' vs '{requested}'")]
    HashCollision {
        hash: u64,
        existing: String,
        requested: String,
    },
}
