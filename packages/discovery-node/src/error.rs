//! Discovery error taxonomy (spec.md §7).
//!
//! Mirrors `service::operation::OperationError`'s shape: one `thiserror` enum
//! covering every failure surface, with the propagation policy documented
//! per variant rather than left to caller inference.

use thiserror::Error;

/// Errors surfaced by the discovery layer.
///
/// Store-signalled connection loss is retried internally within
/// `connLossTimeout` by [`crate::store::client::StoreClient`] and never
/// constructed as one of these variants — the caller only ever observes
/// `NotFound` or `ClientFailed` from store operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The requested path does not exist in the store.
    #[error("no such path: {path}")]
    NotFound { path: String },

    /// The store session reached a terminal state (expired, unknown state,
    /// or a non-retryable store error).
    #[error("store client failed: {reason}")]
    ClientFailed { reason: String },

    /// An unexpected error in discovery event dispatch. Surfaced on the
    /// join future; the caller is responsible for node shutdown.
    #[error("fatal discovery error: {reason}")]
    Fatal { reason: String },
}

impl DiscoveryError {
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    #[must_use]
    pub fn client_failed(reason: impl Into<String>) -> Self {
        Self::ClientFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }
}
