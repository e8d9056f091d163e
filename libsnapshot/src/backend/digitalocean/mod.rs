//! DigitalOcean block-storage snapshot backend.
//!
//! [`DigitalOceanBackend`] implements [`SnapshotBackend`] for volumes
//! provisioned through the `do-block-storage` storage class.
//!
//! DigitalOcean snapshots carry no labels we can filter on, so ownership is
//! decided by the snapshot name alone (see [`crate::naming`]), and
//! [`SnapshotBackend::set_snapshot_labels`] is a no-op.
//!
//! Volume snapshots are usually complete by the time the create call
//! returns, but a fresh snapshot can briefly be missing from
//! `GET /v2/snapshots/{id}`.  A miss within `pending_grace` of the create is
//! reported as [`SnapshotStatus::Pending`]; a miss after it is a failed
//! creation.

pub mod api;
#[cfg(test)]
mod test_server;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use self::api::{ApiError, ApiSnapshot, DigitalOceanApi, HttpDigitalOceanApi};
use crate::backend::SnapshotBackend;
use crate::config::DigitalOceanConfig;
use crate::error::{Result, SnapshotError};
use crate::naming::{is_managed_snapshot_name, parse_timestamp};
use crate::types::{Context, Labels, Snapshot, SnapshotStatus};
use crate::volume::VolumeDescriptor;

/// Storage class of volumes provisioned by the DigitalOcean CSI driver.
pub const STORAGE_CLASS: &str = "do-block-storage";

/// Name of the DigitalOcean block-storage CSI driver.
pub const CSI_DRIVER: &str = "dobs.csi.digitalocean.com";

/// Disk identifier: the DigitalOcean volume id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DigitalOceanDiskIdentifier {
    /// Volume id, as carried in the CSI volume handle.
    pub volume_id: String,
}

impl fmt::Display for DigitalOceanDiskIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.volume_id)
    }
}

/// Handle returned by [`DigitalOceanBackend::create_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitalOceanSnapshotHandle {
    /// Provider snapshot id from the create response.
    pub snapshot_id: String,
    /// Requested snapshot name.
    pub name: String,
    /// Volume the snapshot was taken from.
    pub volume_id: String,
    /// When the provider accepted the request.
    pub requested_at: DateTime<Utc>,
}

/// Snapshot backend for one DigitalOcean account.
pub struct DigitalOceanBackend<A = HttpDigitalOceanApi> {
    api: A,
    config: DigitalOceanConfig,
}

impl DigitalOceanBackend<HttpDigitalOceanApi> {
    /// Build a backend from `DIGITAL_OCEAN_*` environment variables.
    ///
    /// Fails with [`SnapshotError::Config`] when no API token is set.
    pub fn from_env() -> Result<Self> {
        Self::new(DigitalOceanConfig::from_env()?)
    }

    /// Build a backend talking to the API described by `config`.
    pub fn new(config: DigitalOceanConfig) -> Result<Self> {
        let api = HttpDigitalOceanApi::new(&config)
            .map_err(|e| SnapshotError::Config(format!("http client: {e}")))?;
        Ok(Self::with_api(api, config))
    }
}

impl<A: DigitalOceanApi> DigitalOceanBackend<A> {
    /// Build a backend over any [`DigitalOceanApi`] implementation.
    pub fn with_api(api: A, config: DigitalOceanConfig) -> Self {
        Self { api, config }
    }

    /// The underlying API client.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Convert a listed record into a [`Snapshot`], or `None` if the record
    /// is not a usable managed volume snapshot.
    fn managed_snapshot(record: &ApiSnapshot) -> Option<Snapshot<DigitalOceanDiskIdentifier>> {
        if !is_managed_snapshot_name(&record.name) {
            return None;
        }
        match Self::to_snapshot(record) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(id = %record.id, name = %record.name, error = %e, "skipping malformed snapshot record");
                None
            }
        }
    }

    /// Convert a provider record into a [`Snapshot`].  The error describes
    /// what is missing or malformed.
    fn to_snapshot(
        record: &ApiSnapshot,
    ) -> std::result::Result<Snapshot<DigitalOceanDiskIdentifier>, String> {
        if record.id.is_empty() {
            return Err("snapshot record has no id".to_owned());
        }
        if record.resource_id.is_empty() {
            return Err(format!("snapshot {} has no resource id", record.id));
        }
        let created_at = parse_timestamp(&record.created_at).ok_or_else(|| {
            format!(
                "snapshot {} has malformed created_at {:?}",
                record.id, record.created_at
            )
        })?;
        Ok(Snapshot {
            name: record.id.clone(),
            created_at,
            disk: DigitalOceanDiskIdentifier {
                volume_id: record.resource_id.clone(),
            },
        })
    }
}

#[async_trait]
impl<A: DigitalOceanApi> SnapshotBackend for DigitalOceanBackend<A> {
    type Disk = DigitalOceanDiskIdentifier;
    type Handle = DigitalOceanSnapshotHandle;

    fn name(&self) -> &'static str {
        "digitalocean"
    }

    fn supports_labels(&self) -> bool {
        false
    }

    fn supports_volume(&self, volume: &VolumeDescriptor) -> bool {
        volume.storage_class() == Some(STORAGE_CLASS)
    }

    fn get_disk_identifier(&self, volume: &VolumeDescriptor) -> Result<Self::Disk> {
        let volume_name = volume.metadata.name.as_deref().unwrap_or("<unnamed>");
        if !self.supports_volume(volume) {
            return Err(SnapshotError::InvalidDisk(format!(
                "volume {volume_name} is not a {STORAGE_CLASS} volume (storage class {:?})",
                volume.storage_class()
            )));
        }
        if volume.csi_driver() != Some(CSI_DRIVER) {
            return Err(SnapshotError::InvalidDisk(format!(
                "volume {volume_name} is not provisioned by {CSI_DRIVER} (driver {:?})",
                volume.csi_driver()
            )));
        }
        let volume_id = volume.volume_handle().ok_or_else(|| {
            SnapshotError::InvalidDisk(format!("volume {volume_name} has no CSI volume handle"))
        })?;
        Ok(DigitalOceanDiskIdentifier {
            volume_id: volume_id.to_owned(),
        })
    }

    fn validate_disk_identifier(&self, raw: &serde_json::Value) -> Result<Self::Disk> {
        raw.get("volume_id")
            .or_else(|| raw.get("id"))
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| DigitalOceanDiskIdentifier {
                volume_id: id.to_owned(),
            })
            .ok_or_else(|| SnapshotError::InvalidDisk(raw.to_string()))
    }

    #[instrument(skip(self, _ctx))]
    async fn load_snapshots(
        &self,
        _ctx: &Context,
        label_filters: &Labels,
    ) -> Result<Vec<Snapshot<Self::Disk>>> {
        if !label_filters.is_empty() {
            debug!("DigitalOcean snapshots have no labels, filtering by name only");
        }

        let records = self
            .api
            .list_volume_snapshots()
            .await
            .map_err(SnapshotError::unavailable)?;
        let total = records.len();

        let snapshots: Vec<_> = records.iter().filter_map(Self::managed_snapshot).collect();
        debug!(total, managed = snapshots.len(), "loaded snapshots");
        Ok(snapshots)
    }

    #[instrument(skip(self, _ctx, snapshot_description), fields(volume_id = %disk.volume_id))]
    async fn create_snapshot(
        &self,
        _ctx: &Context,
        disk: &Self::Disk,
        snapshot_name: &str,
        snapshot_description: &str,
    ) -> Result<Self::Handle> {
        // Volume snapshots have no description field.
        debug!(description = snapshot_description, "creating snapshot");

        let requested_at = Utc::now();
        let created = self
            .api
            .create_volume_snapshot(&disk.volume_id, snapshot_name)
            .await
            .map_err(|e| match e {
                ApiError::NotFound => {
                    SnapshotError::create(format!("volume {} not found", disk.volume_id))
                }
                ApiError::Rejected { .. } => SnapshotError::create(e),
                ApiError::Transport(_) => SnapshotError::unavailable(e),
            })?;

        if created.id.is_empty() {
            return Err(SnapshotError::create(
                "create response did not carry a snapshot id",
            ));
        }

        info!(snapshot_id = %created.id, "snapshot creation accepted");
        Ok(DigitalOceanSnapshotHandle {
            snapshot_id: created.id,
            name: snapshot_name.to_owned(),
            volume_id: disk.volume_id.clone(),
            requested_at,
        })
    }

    #[instrument(skip(self, _ctx), fields(snapshot_id = %handle.snapshot_id))]
    async fn get_snapshot_status(
        &self,
        _ctx: &Context,
        handle: &Self::Handle,
    ) -> Result<SnapshotStatus> {
        match self.api.get_snapshot(&handle.snapshot_id).await {
            Ok(_) => Ok(SnapshotStatus::Complete),
            Err(ApiError::NotFound) => {
                let waited = Utc::now().signed_duration_since(handle.requested_at);
                let within_grace = waited
                    .to_std()
                    .map(|waited| waited < self.config.pending_grace)
                    .unwrap_or(true);
                if within_grace {
                    debug!("snapshot not visible yet");
                    Ok(SnapshotStatus::Pending)
                } else {
                    Err(SnapshotError::create(format!(
                        "snapshot {} ({}) disappeared after creation",
                        handle.snapshot_id, handle.name
                    )))
                }
            }
            Err(e @ ApiError::Rejected { .. }) => Err(SnapshotError::create(e)),
            Err(e @ ApiError::Transport(_)) => Err(SnapshotError::unavailable(e)),
        }
    }

    async fn get_snapshot(
        &self,
        _ctx: &Context,
        handle: &Self::Handle,
    ) -> Result<Snapshot<Self::Disk>> {
        let record = self
            .api
            .get_snapshot(&handle.snapshot_id)
            .await
            .map_err(|e| match e {
                ApiError::NotFound => SnapshotError::create(format!(
                    "snapshot {} not found",
                    handle.snapshot_id
                )),
                ApiError::Rejected { .. } => SnapshotError::create(e),
                ApiError::Transport(_) => SnapshotError::unavailable(e),
            })?;
        Self::to_snapshot(&record).map_err(SnapshotError::create)
    }

    async fn set_snapshot_labels(
        &self,
        _ctx: &Context,
        handle: &Self::Handle,
        labels: &Labels,
    ) -> Result<()> {
        debug!(
            snapshot_id = %handle.snapshot_id,
            count = labels.len(),
            "DigitalOcean snapshots have no labels, ignoring",
        );
        Ok(())
    }

    #[instrument(skip(self, _ctx), fields(snapshot_id = %snapshot.name))]
    async fn delete_snapshot(&self, _ctx: &Context, snapshot: &Snapshot<Self::Disk>) -> Result<()> {
        match self.api.delete_snapshot(&snapshot.name).await {
            Ok(()) => {
                info!(disk = %snapshot.disk, "snapshot deleted");
                Ok(())
            }
            Err(ApiError::NotFound) => {
                debug!("snapshot already gone");
                Ok(())
            }
            Err(e @ ApiError::Rejected { .. }) => Err(SnapshotError::SnapshotDelete {
                snapshot: snapshot.name.clone(),
                reason: e.to_string(),
            }),
            Err(e @ ApiError::Transport(_)) => Err(SnapshotError::unavailable(e)),
        }
    }
}
