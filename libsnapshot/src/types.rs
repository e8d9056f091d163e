//! Core snapshot types: snapshots, statuses, labels, and the execution
//! context passed to every backend call.
//!
//! Disk identifiers and creation handles are deliberately *not* defined here:
//! they are associated types of each [`SnapshotBackend`] so that generic code
//! can compare and hash them without ever interpreting their contents.
//!
//! [`SnapshotBackend`]: crate::backend::SnapshotBackend

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Labels a caller wishes to attach to a snapshot.
pub type Labels = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An existing snapshot as observed from the provider.
///
/// Produced by [`load_snapshots`] or by re-fetching a completed creation
/// handle.  `created_at` is always UTC.
///
/// [`load_snapshots`]: crate::backend::SnapshotBackend::load_snapshots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Snapshot<D> {
    /// Provider-assigned identifier.
    pub name: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Disk the snapshot was taken from.
    pub disk: D,
}

impl<D: fmt::Display> fmt::Display for Snapshot<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (disk {}, created {})",
            self.name,
            self.disk,
            self.created_at.to_rfc3339()
        )
    }
}

/// Completion status of an in-flight snapshot.
///
/// There is no failed value: a failed creation is reported as
/// [`SnapshotError::SnapshotCreate`](crate::SnapshotError::SnapshotCreate).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SnapshotStatus {
    /// Creation accepted, not yet usable.
    Pending,
    /// Snapshot is usable.
    Complete,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("snapshot.pending"),
            Self::Complete => f.write_str("snapshot.complete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Opaque execution context handed to every backend call.
///
/// Backends never interpret it; the poll loop uses it to observe
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel: Some(rx) }, CancelHandle { tx })
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is requested.  Never resolves for a
    /// background context, or when the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.cancel {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_display() {
        assert_eq!(SnapshotStatus::Pending.to_string(), "snapshot.pending");
        assert_eq!(SnapshotStatus::Complete.to_string(), "snapshot.complete");
    }

    #[test]
    fn snapshot_serde_keeps_utc() {
        let snap = Snapshot {
            name: "1234".to_owned(),
            created_at: Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap(),
            disk: "vol-123".to_owned(),
        };
        let json = serde_json::to_string(&snap).expect("serialize");
        let de: Snapshot<String> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(de, snap);
    }

    #[tokio::test]
    async fn cancel_handle_cancels_clones() {
        let (ctx, handle) = Context::with_cancel();
        let clone = ctx.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        assert!(ctx.is_cancelled());
        clone.cancelled().await;
    }

    #[test]
    fn background_is_never_cancelled() {
        assert!(!Context::background().is_cancelled());
    }
}
