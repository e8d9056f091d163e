//! DigitalOcean REST API access for volume snapshots.
//!
//! [`DigitalOceanApi`] is the narrow seam between the backend and the
//! provider: four calls, plain data in and out.  [`HttpDigitalOceanApi`]
//! talks to the real API with `reqwest`; [`InMemoryDigitalOceanApi`] keeps
//! everything in memory and is used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::DigitalOceanConfig;

/// Snapshot record as returned by `/v2/snapshots`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSnapshot {
    /// Provider snapshot id.
    pub id: String,
    /// Human-readable name given at creation.
    pub name: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Id of the volume (or droplet) the snapshot was taken from.
    pub resource_id: String,
    /// `volume` or `droplet`.
    pub resource_type: String,
    pub regions: Vec<String>,
    pub size_gigabytes: Option<f64>,
    pub tags: Vec<String>,
}

/// Failure of a single API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 404.
    #[error("resource not found")]
    NotFound,

    /// Any other 4xx: the request was understood and refused.
    #[error("request rejected ({status} {id}): {message}")]
    Rejected {
        status: u16,
        id: String,
        message: String,
    },

    /// Network failure, timeout, rate limit or 5xx.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Volume snapshot operations of the DigitalOcean API.
#[async_trait]
pub trait DigitalOceanApi: Send + Sync {
    /// All volume snapshots in the account, across every page.
    async fn list_volume_snapshots(&self) -> Result<Vec<ApiSnapshot>, ApiError>;

    /// `POST /v2/volumes/{volume_id}/snapshots`
    async fn create_volume_snapshot(
        &self,
        volume_id: &str,
        name: &str,
    ) -> Result<ApiSnapshot, ApiError>;

    /// `GET /v2/snapshots/{id}`
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<ApiSnapshot, ApiError>;

    /// `DELETE /v2/snapshots/{id}`
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    snapshot: ApiSnapshot,
}

#[derive(Debug, Deserialize)]
struct SnapshotPage {
    #[serde(default)]
    snapshots: Vec<serde_json::Value>,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    pages: Option<Pages>,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateSnapshotBody<'a> {
    name: &'a str,
}

/// [`DigitalOceanApi`] over HTTPS.
pub struct HttpDigitalOceanApi {
    client: Client,
    base_url: String,
    token: String,
    page_size: u32,
}

impl HttpDigitalOceanApi {
    /// Build the HTTP client from `config` (base URL, token, timeout, page size).
    pub fn new(config: &DigitalOceanConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("libsnapshot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::transport)?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config.api_token.clone(),
            page_size: config.page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(ApiError::Transport(format!("{status}: {}", body.message)))
        } else {
            Err(ApiError::Rejected {
                status: status.as_u16(),
                id: body.id,
                message: body.message,
            })
        }
    }
}

#[async_trait]
impl DigitalOceanApi for HttpDigitalOceanApi {
    #[instrument(skip(self))]
    async fn list_volume_snapshots(&self) -> Result<Vec<ApiSnapshot>, ApiError> {
        let mut snapshots = Vec::new();
        let mut page = 1u32;

        loop {
            let request = self.client.get(self.url("/snapshots")).query(&[
                ("resource_type", "volume".to_owned()),
                ("page", page.to_string()),
                ("per_page", self.page_size.to_string()),
            ]);
            let body: SnapshotPage = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(ApiError::transport)?;

            for raw in body.snapshots {
                match serde_json::from_value::<ApiSnapshot>(raw) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => warn!(page, error = %e, "skipping malformed snapshot record"),
                }
            }

            if body.links.pages.and_then(|p| p.next).is_none() {
                break;
            }
            page += 1;
        }

        debug!(count = snapshots.len(), pages = page, "listed volume snapshots");
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn create_volume_snapshot(
        &self,
        volume_id: &str,
        name: &str,
    ) -> Result<ApiSnapshot, ApiError> {
        let request = self
            .client
            .post(self.url(&format!("/volumes/{volume_id}/snapshots")))
            .json(&CreateSnapshotBody { name });
        let body: SnapshotEnvelope = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(ApiError::transport)?;
        Ok(body.snapshot)
    }

    #[instrument(skip(self))]
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<ApiSnapshot, ApiError> {
        let request = self.client.get(self.url(&format!("/snapshots/{snapshot_id}")));
        let body: SnapshotEnvelope = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(ApiError::transport)?;
        Ok(body.snapshot)
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.url(&format!("/snapshots/{snapshot_id}")));
        self.send(request).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory API
// ---------------------------------------------------------------------------

/// [`DigitalOceanApi`] backed by a map.
///
/// Volumes are implicit: any volume id listed in `volumes` can be
/// snapshotted.  A few knobs reproduce provider behaviour the backend must
/// cope with: lookups that miss right after creation (eventual
/// consistency), refused deletes, and transport failures.
#[derive(Default)]
pub struct InMemoryDigitalOceanApi {
    volumes: Mutex<Vec<String>>,
    snapshots: Mutex<BTreeMap<String, ApiSnapshot>>,
    next_id: AtomicU32,
    lookup_misses: AtomicU32,
    protected: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl InMemoryDigitalOceanApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume that can be snapshotted.
    pub fn add_volume(&self, volume_id: impl Into<String>) {
        self.volumes.lock().unwrap_or_else(|e| e.into_inner()).push(volume_id.into());
    }

    /// Insert a snapshot record as-is, e.g. one created by hand.
    pub fn insert_snapshot(&self, snapshot: ApiSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.id.clone(), snapshot);
    }

    /// Make the next `count` `get_snapshot` calls miss.
    pub fn miss_next_lookups(&self, count: u32) {
        self.lookup_misses.store(count, Ordering::SeqCst);
    }

    /// Refuse deletion of `snapshot_id` with a 422.
    pub fn protect(&self, snapshot_id: impl Into<String>) {
        self.protected.lock().unwrap_or_else(|e| e.into_inner()).push(snapshot_id.into());
    }

    /// Make every call fail with a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored snapshot records.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn check_available(&self) -> Result<(), ApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DigitalOceanApi for InMemoryDigitalOceanApi {
    async fn list_volume_snapshots(&self) -> Result<Vec<ApiSnapshot>, ApiError> {
        self.check_available()?;
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.resource_type == "volume")
            .cloned()
            .collect())
    }

    async fn create_volume_snapshot(
        &self,
        volume_id: &str,
        name: &str,
    ) -> Result<ApiSnapshot, ApiError> {
        self.check_available()?;
        if !self
            .volumes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|v| v == volume_id)
        {
            return Err(ApiError::NotFound);
        }

        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        if snapshots
            .values()
            .any(|s| s.resource_id == volume_id && s.name == name)
        {
            return Err(ApiError::Rejected {
                status: 409,
                id: "conflict".into(),
                message: format!("a snapshot named {name} already exists"),
            });
        }

        let id = format!("snap-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let snapshot = ApiSnapshot {
            id: id.clone(),
            name: name.to_owned(),
            created_at: Utc::now().to_rfc3339(),
            resource_id: volume_id.to_owned(),
            resource_type: "volume".to_owned(),
            regions: vec!["nyc1".to_owned()],
            size_gigabytes: Some(0.0),
            tags: Vec::new(),
        };
        snapshots.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<ApiSnapshot, ApiError> {
        self.check_available()?;
        let missed = self
            .lookup_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Err(ApiError::NotFound);
        }
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(snapshot_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), ApiError> {
        self.check_available()?;
        if self
            .protected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|id| id == snapshot_id)
        {
            return Err(ApiError::Rejected {
                status: 422,
                id: "unprocessable_entity".into(),
                message: "snapshot is in use".into(),
            });
        }
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}
