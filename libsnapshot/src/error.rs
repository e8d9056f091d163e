//! Snapshot lifecycle error types.
//!
//! Every failure a backend can surface is one of the [`SnapshotError`]
//! variants.  The variants map onto the taxonomy callers act on: ownership
//! errors are routed to another backend, transient errors are retried with
//! backoff, and creation / deletion failures are reported.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Unified error type for snapshot backend operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The volume or serialized identifier is not addressable by this
    /// backend.  Recoverable by routing to a different backend.
    #[error("invalid disk: {0}")]
    InvalidDisk(String),

    /// The provider could not be reached or answered with a transient
    /// failure (network, timeout, rate limit, 5xx).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The provider rejected or failed the snapshot creation.  Terminal for
    /// the current attempt.
    #[error("snapshot creation failed: {0}")]
    SnapshotCreate(String),

    /// The provider refused to delete a snapshot.
    #[error("failed to delete snapshot {snapshot}: {reason}")]
    SnapshotDelete {
        /// Provider identifier of the snapshot.
        snapshot: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Startup configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller's poll policy ran out of attempts before the snapshot
    /// reached a terminal status.
    #[error("snapshot still pending after {attempts} status checks")]
    PollTimeout {
        /// Number of status checks performed.
        attempts: u32,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl SnapshotError {
    /// Create a [`SnapshotError::InvalidDisk`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid_disk<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidDisk(e.to_string())
    }

    /// Create a [`SnapshotError::BackendUnavailable`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn unavailable<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendUnavailable(e.to_string())
    }

    /// Create a [`SnapshotError::SnapshotCreate`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn create<E: std::fmt::Display>(e: E) -> Self {
        Self::SnapshotCreate(e.to_string())
    }

    /// Whether retrying the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
