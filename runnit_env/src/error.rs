//! Error types for the Runnit environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The user (or the OS) refused location access
    #[error("Location permission denied")]
    PermissionDenied,

    /// The location provider could not produce a fix
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// The fix stream was closed by the provider
    #[error("Location subscription closed")]
    SubscriptionClosed,

    /// Remote call to the hosted backend failed
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates an RPC error.
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Creates a storage error.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }
}
