//! Volume descriptors read from Kubernetes `PersistentVolume` objects.
//!
//! Only the handful of fields needed to route a volume to a backend and to
//! address its disk are modelled; everything else in the API object is
//! ignored during deserialisation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// The parts of a `PersistentVolume` the disk identifier codec reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Object metadata (`metadata`).
    #[serde(default)]
    pub metadata: VolumeMetadata,
    /// Volume spec (`spec`).
    #[serde(default)]
    pub spec: VolumeSpec,
}

/// `PersistentVolume.metadata`, reduced to the name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMetadata {
    /// Object name, used as the snapshot name prefix.
    #[serde(default)]
    pub name: Option<String>,
}

/// `PersistentVolume.spec`, reduced to the routing fields.

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Storage class the volume was provisioned from.
    #[serde(default)]
    pub storage_class_name: Option<String>,
    /// CSI source, present for CSI-provisioned volumes.
    #[serde(default)]
    pub csi: Option<CsiVolumeSource>,
}

/// `PersistentVolume.spec.csi`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolumeSource {
    /// Name of the CSI driver that provisioned the volume.
    #[serde(default)]
    pub driver: String,
    /// Provider-specific handle addressing the underlying disk.
    #[serde(default)]
    pub volume_handle: String,
}

impl VolumeDescriptor {
    /// Parse a descriptor from a `PersistentVolume` JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(SnapshotError::invalid_disk)
    }

    /// The storage class name, if the volume names one.
    pub fn storage_class(&self) -> Option<&str> {
        self.spec.storage_class_name.as_deref()
    }

    /// The CSI driver name, if the volume is CSI-provisioned and names one.
    pub fn csi_driver(&self) -> Option<&str> {
        self.spec
            .csi
            .as_ref()
            .map(|csi| csi.driver.trim())
            .filter(|driver| !driver.is_empty())
    }

    /// The CSI volume handle, if present and non-blank.
    pub fn volume_handle(&self) -> Option<&str> {
        self.spec
            .csi
            .as_ref()
            .map(|csi| csi.volume_handle.trim())
            .filter(|handle| !handle.is_empty())
    }

    /// Human label used as the prefix of snapshot names: the volume name,
    /// falling back to the volume handle.
    pub fn disk_label(&self) -> Option<&str> {
        self.metadata
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.volume_handle())
    }
}
