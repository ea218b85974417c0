// Service-level (non-protocol) errors.
//
// These cover infrastructure failures: a registry lookup that times out,
// a storage backend that cannot be reached, bad configuration. Protocol
// errors (invalid_grant and friends) are a separate flat enum owned by
// the provider crate; the two taxonomies must never be conflated.

use thiserror::Error;

/// Infrastructure failure surfaced by a collaborator or storage backend.
///
/// Every variant is terminal for the current request. The provider maps
/// these to a `temporarily_unavailable` / `server_error` protocol answer
/// at the boundary, never to `invalid_grant`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the failure came from a collaborator that may recover,
    /// as opposed to a configuration or logic problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Unavailable(_))
    }
}

/// Unified result type for infrastructure operations.
pub type Result<T> = std::result::Result<T, CoreError>;
