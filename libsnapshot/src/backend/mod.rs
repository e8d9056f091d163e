//! Snapshot backend contract and provider implementations.
//!
//! [`SnapshotBackend`] is the capability interface every cloud provider
//! adapter implements.  All provider SDK / API types stay behind the
//! adapter; generic code only sees the associated [`SnapshotBackend::Disk`]
//! and [`SnapshotBackend::Handle`] types, which it may compare and hash but
//! never interpret.

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Context, Labels, Snapshot, SnapshotStatus};
use crate::volume::VolumeDescriptor;

pub mod digitalocean;

/// Snapshot lifecycle operations over one provider account.
///
/// Implementations hold no mutable state beyond what is fixed at
/// construction (credentials, HTTP client) and may be called concurrently
/// for different disks.  Within one disk, callers sequence
/// create → status (repeatedly) → labels → delete.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Provider-defined identifier of a disk.
    type Disk: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync;

    /// Provider-defined handle to a snapshot whose creation was requested.
    type Handle: fmt::Debug + Send + Sync;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Whether [`Self::set_snapshot_labels`] has any effect.  When `false`,
    /// the naming scheme is the only way to recognise managed snapshots.
    fn supports_labels(&self) -> bool;

    /// Whether this backend owns `volume`.  Pure; performs no I/O.
    fn supports_volume(&self, volume: &VolumeDescriptor) -> bool;

    /// Extract the disk identifier from a volume this backend owns.
    ///
    /// Fails with [`SnapshotError::InvalidDisk`] when the addressing field
    /// is absent or malformed.
    ///
    /// [`SnapshotError::InvalidDisk`]: crate::SnapshotError::InvalidDisk
    fn get_disk_identifier(&self, volume: &VolumeDescriptor) -> Result<Self::Disk>;

    /// Rebuild a disk identifier from its serialised form.
    fn validate_disk_identifier(&self, raw: &serde_json::Value) -> Result<Self::Disk>;

    /// List existing snapshots whose names match the naming scheme.
    ///
    /// `label_filters` is a hint; providers without label support ignore it.
    /// Individual malformed records are skipped.
    async fn load_snapshots(
        &self,
        ctx: &Context,
        label_filters: &Labels,
    ) -> Result<Vec<Snapshot<Self::Disk>>>;

    /// Request a new snapshot of `disk`.  The returned handle may refer to a
    /// snapshot that is not complete yet.
    async fn create_snapshot(
        &self,
        ctx: &Context,
        disk: &Self::Disk,
        snapshot_name: &str,
        snapshot_description: &str,
    ) -> Result<Self::Handle>;

    /// Check once whether the snapshot behind `handle` is complete.
    ///
    /// A provider-reported failure is returned as
    /// [`SnapshotError::SnapshotCreate`], never as a lingering
    /// [`SnapshotStatus::Pending`].
    ///
    /// [`SnapshotError::SnapshotCreate`]: crate::SnapshotError::SnapshotCreate
    async fn get_snapshot_status(
        &self,
        ctx: &Context,
        handle: &Self::Handle,
    ) -> Result<SnapshotStatus>;

    /// Fetch the snapshot behind a completed handle.
    async fn get_snapshot(
        &self,
        ctx: &Context,
        handle: &Self::Handle,
    ) -> Result<Snapshot<Self::Disk>>;

    /// Attach labels to a snapshot.  A no-op returning `Ok(())` when
    /// [`Self::supports_labels`] is `false`.
    async fn set_snapshot_labels(
        &self,
        ctx: &Context,
        handle: &Self::Handle,
        labels: &Labels,
    ) -> Result<()>;

    /// Delete a snapshot previously returned by [`Self::load_snapshots`].
    ///
    /// This is idempotent: a snapshot the provider no longer has counts as
    /// deleted.
    async fn delete_snapshot(&self, ctx: &Context, snapshot: &Snapshot<Self::Disk>) -> Result<()>;
}

/// Return the first backend in `backends` that owns `volume`.
pub fn find_backend_for<'a, B: SnapshotBackend>(
    backends: &'a [B],
    volume: &VolumeDescriptor,
) -> Option<&'a B> {
    backends.iter().find(|backend| backend.supports_volume(volume))
}
