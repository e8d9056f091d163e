//! Snapshot creation state machine.
//!
//! ```text
//! Requested ──► Pending ──► Complete
//!     │            │
//!     └────────────┴──► error (terminal, no further polling)
//! ```
//!
//! Cloud snapshot APIs are asynchronous, so creating a snapshot returns a
//! handle and completion is observed by polling the backend's status check.
//! The poll loop belongs to the caller: interval, backoff, jitter, attempt
//! limit and cancellation all come from a [`PollPolicy`] and a [`Context`].
//! Abandoning the loop performs no cleanup; the provider keeps working on the
//! request and a later [`load_snapshots`] pass will surface the result.
//!
//! [`load_snapshots`]: crate::backend::SnapshotBackend::load_snapshots

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::backend::SnapshotBackend;
use crate::error::{Result, SnapshotError};
use crate::naming::build_snapshot_name;
use crate::types::{Context, Labels, Snapshot, SnapshotStatus};

/// Caller-owned polling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first status check.
    pub interval: Duration,
    /// Upper bound for the backoff delay.
    pub max_interval: Duration,
    /// Growth factor applied per check.  Values below `1.0` are treated as `1.0`.
    pub multiplier: f64,
    /// Relative jitter in `0.0..=1.0` applied to each delay.
    pub jitter: f64,
    /// Status checks before giving up with [`SnapshotError::PollTimeout`].
    /// `None` polls until a terminal status or cancellation.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    /// Delay to wait after the `attempt`-th status check (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.interval.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 && capped > 0.0 {
            let spread = capped * jitter;
            capped + rand::rng().random_range(-spread..=spread)
        } else {
            capped
        };
        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(self.max_interval)
    }
}

/// Observable states of one creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    Requested,
    Pending,
    Complete,
}

/// Result of a successful poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Number of status checks performed, including the final one.
    pub attempts: u32,
}

/// Everything needed to take one snapshot of one disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest<D> {
    pub disk: D,
    pub name: String,
    pub description: String,
    pub labels: Labels,
}

impl<D> SnapshotRequest<D> {
    /// Request a snapshot of `disk`, named from `disk_label` and `now`.
    ///
    /// Fails with [`SnapshotError::InvalidDisk`] when `disk_label` cannot
    /// form a recognisable snapshot name.
    pub fn new(disk: D, disk_label: &str, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            disk,
            name: build_snapshot_name(disk_label, now)?,
            description: format!("Automatic snapshot of {disk_label}"),
            labels: Labels::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }
}

/// Poll `handle` until the backend reports [`SnapshotStatus::Complete`].
///
/// Any error from the status check ends the loop immediately and is
/// returned unchanged.  Exhausting `policy.max_attempts` yields
/// [`SnapshotError::PollTimeout`]; cancelling `ctx` yields
/// [`SnapshotError::Cancelled`].
pub async fn wait_for_completion<B: SnapshotBackend>(
    backend: &B,
    ctx: &Context,
    handle: &B::Handle,
    policy: &PollPolicy,
) -> Result<PollOutcome> {
    let mut state = CreationState::Requested;
    let mut attempts = 0u32;

    loop {
        if ctx.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        attempts += 1;
        let status = match backend.get_snapshot_status(ctx, handle).await {
            Ok(status) => status,
            Err(e) => {
                warn!(backend = backend.name(), ?handle, attempts, error = %e, "snapshot creation failed");
                return Err(e);
            }
        };

        let next = match status {
            SnapshotStatus::Pending => CreationState::Pending,
            SnapshotStatus::Complete => CreationState::Complete,
        };
        if next != state {
            debug!(?handle, from = ?state, to = ?next, attempts, "creation state changed");
            state = next;
        }
        if state == CreationState::Complete {
            return Ok(PollOutcome { attempts });
        }

        if let Some(max) = policy.max_attempts
            && attempts >= max
        {
            warn!(?handle, attempts, "giving up on pending snapshot");
            return Err(SnapshotError::PollTimeout { attempts });
        }

        let delay = policy.delay_for(attempts);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancelled() => {
                debug!(?handle, attempts, "poll cancelled, creation continues provider-side");
                return Err(SnapshotError::Cancelled);
            }
        }
    }
}

/// Drive one snapshot from request to a completed [`Snapshot`]:
/// create → poll status → set labels (when supported) → re-fetch.
#[instrument(skip_all, fields(backend = backend.name(), disk = %request.disk, snapshot = %request.name))]
pub async fn create_and_wait<B: SnapshotBackend>(
    backend: &B,
    ctx: &Context,
    request: &SnapshotRequest<B::Disk>,
    policy: &PollPolicy,
) -> Result<Snapshot<B::Disk>> {
    if ctx.is_cancelled() {
        return Err(SnapshotError::Cancelled);
    }

    let handle = backend
        .create_snapshot(ctx, &request.disk, &request.name, &request.description)
        .await?;
    debug!(?handle, "snapshot requested");

    let outcome = wait_for_completion(backend, ctx, &handle, policy).await?;

    if !request.labels.is_empty() {
        if backend.supports_labels() {
            backend
                .set_snapshot_labels(ctx, &handle, &request.labels)
                .await?;
        } else {
            debug!("backend has no snapshot labels, relying on the snapshot name");
        }
    }

    let snapshot = backend.get_snapshot(ctx, &handle).await?;
    info!(%snapshot, attempts = outcome.attempts, "snapshot complete");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelHandle;
    use crate::volume::VolumeDescriptor;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose status checks follow a script.
    struct StubBackend {
        script: Mutex<VecDeque<Result<SnapshotStatus>>>,
        status_calls: AtomicU32,
        labels: bool,
        applied_labels: Mutex<Option<Labels>>,
        cancel_on_call: Option<(u32, CancelHandle)>,
    }

    impl StubBackend {
        fn new(script: Vec<Result<SnapshotStatus>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                status_calls: AtomicU32::new(0),
                labels: false,
                applied_labels: Mutex::new(None),
                cancel_on_call: None,
            }
        }

        fn pending_then_complete(pending: usize) -> Self {
            let mut script: Vec<_> = (0..pending).map(|_| Ok(SnapshotStatus::Pending)).collect();
            script.push(Ok(SnapshotStatus::Complete));
            Self::new(script)
        }

        fn calls(&self) -> u32 {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotBackend for StubBackend {
        type Disk = String;
        type Handle = String;

        fn name(&self) -> &'static str {
            "stub"
        }

        fn supports_labels(&self) -> bool {
            self.labels
        }

        fn supports_volume(&self, _volume: &VolumeDescriptor) -> bool {
            true
        }

        fn get_disk_identifier(&self, volume: &VolumeDescriptor) -> Result<String> {
            volume
                .volume_handle()
                .map(str::to_owned)
                .ok_or_else(|| SnapshotError::invalid_disk("no handle"))
        }

        fn validate_disk_identifier(&self, raw: &serde_json::Value) -> Result<String> {
            raw.as_str()
                .map(str::to_owned)
                .ok_or_else(|| SnapshotError::invalid_disk(raw))
        }

        async fn load_snapshots(&self, _ctx: &Context, _filters: &Labels) -> Result<Vec<Snapshot<String>>> {
            Ok(Vec::new())
        }

        async fn create_snapshot(
            &self,
            _ctx: &Context,
            disk: &String,
            snapshot_name: &str,
            _description: &str,
        ) -> Result<String> {
            Ok(format!("{disk}/{snapshot_name}"))
        }

        async fn get_snapshot_status(&self, _ctx: &Context, _handle: &String) -> Result<SnapshotStatus> {
            let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, cancel)) = &self.cancel_on_call
                && *at == call
            {
                cancel.cancel();
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(SnapshotStatus::Pending))
        }

        async fn get_snapshot(&self, _ctx: &Context, handle: &String) -> Result<Snapshot<String>> {
            let (disk, name) = handle.split_once('/').unwrap();
            Ok(Snapshot {
                name: name.to_owned(),
                created_at: Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap(),
                disk: disk.to_owned(),
            })
        }

        async fn set_snapshot_labels(&self, _ctx: &Context, _handle: &String, labels: &Labels) -> Result<()> {
            if self.labels {
                *self.applied_labels.lock().unwrap() = Some(labels.clone());
            }
            Ok(())
        }

        async fn delete_snapshot(&self, _ctx: &Context, _snapshot: &Snapshot<String>) -> Result<()> {
            Ok(())
        }
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    fn request() -> SnapshotRequest<String> {
        SnapshotRequest::new(
            "vol-123".to_owned(),
            "vol-123",
            Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn polls_until_complete() {
        for pending in [0, 1, 4] {
            let backend = StubBackend::pending_then_complete(pending);
            let snap = create_and_wait(&backend, &Context::background(), &request(), &fast_policy())
                .await
                .unwrap();
            assert_eq!(backend.calls(), pending as u32 + 1);
            assert_eq!(snap.name, "vol-123-230102-030405");
            assert_eq!(snap.disk, "vol-123");
        }
    }

    #[tokio::test]
    async fn create_error_stops_polling() {
        let backend = StubBackend::new(vec![
            Ok(SnapshotStatus::Pending),
            Err(SnapshotError::create("provider failed the snapshot")),
            Ok(SnapshotStatus::Complete),
        ]);
        let err = wait_for_completion(&backend, &Context::background(), &"h".to_owned(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::SnapshotCreate(_)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn max_attempts_times_out() {
        let backend = StubBackend::new(Vec::new());
        let policy = PollPolicy {
            max_attempts: Some(3),
            ..fast_policy()
        };
        let err = wait_for_completion(&backend, &Context::background(), &"h".to_owned(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err, SnapshotError::PollTimeout { attempts: 3 });
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn cancellation_ends_poll() {
        let (ctx, cancel) = Context::with_cancel();
        let mut backend = StubBackend::new(Vec::new());
        backend.cancel_on_call = Some((2, cancel));
        let policy = PollPolicy {
            interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(60),
            ..fast_policy()
        };
        let err = wait_for_completion(&backend, &ctx, &"h".to_owned(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err, SnapshotError::Cancelled);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn cancelled_context_never_creates() {
        let (ctx, cancel) = Context::with_cancel();
        cancel.cancel();
        let backend = StubBackend::pending_then_complete(0);
        let err = create_and_wait(&backend, &ctx, &request(), &fast_policy())
            .await
            .unwrap_err();
        assert_eq!(err, SnapshotError::Cancelled);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn labels_applied_only_when_supported() {
        let labels = Labels::from([("created-by".to_owned(), "rk8s".to_owned())]);

        let mut backend = StubBackend::pending_then_complete(0);
        backend.labels = true;
        create_and_wait(&backend, &Context::background(), &request().with_labels(labels.clone()), &fast_policy())
            .await
            .unwrap();
        assert_eq!(backend.applied_labels.lock().unwrap().as_ref(), Some(&labels));

        let backend = StubBackend::pending_then_complete(0);
        create_and_wait(&backend, &Context::background(), &request().with_labels(labels), &fast_policy())
            .await
            .unwrap();
        assert!(backend.applied_labels.lock().unwrap().is_none());
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = PollPolicy {
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn oversized_delay_falls_back_to_max_interval() {
        let policy = PollPolicy {
            interval: Duration::from_secs(u64::MAX),
            max_interval: Duration::from_secs(u64::MAX),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(u64::MAX));
        assert_eq!(policy.delay_for(40), Duration::from_secs(u64::MAX));

        let jittered = PollPolicy {
            jitter: 1.0,
            ..policy
        };
        assert!(jittered.delay_for(3) <= Duration::MAX);
    }

    #[test]
    fn empty_label_request_is_rejected() {
        let err = SnapshotRequest::new("vol-123".to_owned(), "", Utc::now()).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidDisk(_)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = PollPolicy {
            interval: Duration::from_secs(10),
            jitter: 0.2,
            ..PollPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12), "{delay:?}");
        }
    }
}
