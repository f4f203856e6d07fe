use std::time::Duration;

/// Crate-wide error taxonomy.
///
/// `check` and `batch_check` never let this escape to the caller on a backend failure — they
/// degrade to a miss and increment the `errors` metric instead (see [`crate::manager`]).
/// `store` and the explicit `invalidate_*` calls surface it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend transient failure (will retry): {0}")]
    BackendTransient(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, CacheError>;
