//! # libsnapshot: backend-neutral volume snapshots for RK8s
//!
//! `libsnapshot` keeps persistent-volume snapshots up to date across cloud
//! providers.  It defines the contract every provider backend satisfies so
//! that an external scheduler can discover disks, create one snapshot per
//! disk per interval, recognise the snapshots it created earlier from their
//! names alone, and expire old ones without touching snapshots it does not
//! own.  It follows the RK8s conventions (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | `Snapshot`, `SnapshotStatus`, labels, and the call [`Context`]. |
//! | [`error`] | [`SnapshotError`] enum covering all failure modes. |
//! | [`volume`] | [`VolumeDescriptor`] read from `PersistentVolume` objects. |
//! | [`naming`] | Timestamp-suffixed snapshot names and their decoding. |
//! | [`backend`] | [`SnapshotBackend`] trait and provider implementations. |
//! | [`poll`] | Creation state machine and caller-owned [`PollPolicy`]. |
//! | [`config`] | Environment-driven backend and poll configuration. |
//!
//! ## Typical flow
//!
//! ```no_run
//! use chrono::Utc;
//! use libsnapshot::backend::digitalocean::DigitalOceanBackend;
//! use libsnapshot::{Context, PollPolicy, SnapshotBackend, SnapshotRequest, VolumeDescriptor};
//!
//! # async fn run(pv_json: &str) -> libsnapshot::Result<()> {
//! let backend = DigitalOceanBackend::from_env()?;
//! let volume = VolumeDescriptor::from_json(pv_json)?;
//! if backend.supports_volume(&volume) {
//!     let disk = backend.get_disk_identifier(&volume)?;
//!     let label = volume.disk_label().unwrap_or("volume");
//!     let request = SnapshotRequest::new(disk, label, Utc::now())?;
//!     let ctx = Context::background();
//!     libsnapshot::poll::create_and_wait(&backend, &ctx, &request, &PollPolicy::default()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod naming;
pub mod poll;
pub mod types;
pub mod volume;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::SnapshotBackend;
pub use error::{Result, SnapshotError};
pub use naming::{build_snapshot_name, is_managed_snapshot_name};
pub use poll::{PollPolicy, SnapshotRequest};
pub use types::*;
pub use volume::VolumeDescriptor;
