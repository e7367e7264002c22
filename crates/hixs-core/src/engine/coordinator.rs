//! Download Coordinator - owns the table of downloads
//!
//! The coordinator:
//! - Allocates job ids and collision-free destinations
//! - Starts and cancels workers
//! - Relays worker events to subscribers, keeping its own table in step

use crate::engine::naming::{self, PathReservations};
use crate::engine::worker::{DownloadWorker, WorkerConfig, WorkerHandle};
use crate::error::CoreError;
use chrono::Utc;
use hixs_types::{CoreEvent, DownloadJob, DownloadRequest, DownloadState, JobId, Outcome, Settings};
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Capacity of the worker -> coordinator channel
const WORKER_EVENT_CAPACITY: usize = 256;

/// Coordinator settings derived from [`Settings`]
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub notify_on_complete: bool,
    pub worker: WorkerConfig,
}

impl From<&Settings> for DownloadConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            download_dir: settings.download_dir.clone(),
            user_agent: settings.user_agent.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            notify_on_complete: settings.show_download_notifications,
            worker: WorkerConfig {
                max_redirects: settings.max_redirects,
                progress_interval: Duration::from_millis(settings.progress_interval_ms.max(1)),
                read_timeout: Duration::from_secs(settings.read_timeout_secs.max(1)),
            },
        }
    }
}

/// Post-completion hook, e.g. a desktop notification
pub trait DownloadNotifier: Send + Sync {
    fn download_complete(&self, job: &DownloadJob);
}

struct JobEntry {
    job: DownloadJob,
    /// `None` once the worker has reported its terminal event
    handle: Option<WorkerHandle>,
    /// Drop the entry as soon as the worker finishes
    remove_on_finish: bool,
}

/// State shared between the coordinator and its relay task
struct Shared {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    event_tx: broadcast::Sender<CoreEvent>,
    notifier: RwLock<Option<Arc<dyn DownloadNotifier>>>,
    notify_on_complete: bool,
}

impl Shared {
    fn broadcast(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Fold one worker event into the table and pass it on
    fn apply(&self, event: CoreEvent) {
        let Some(id) = event.job_id() else {
            self.broadcast(event);
            return;
        };

        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&id) else {
            trace!(job_id = id.0, "Dropping event for removed download");
            return;
        };

        let job = &mut entry.job;
        let mut finished = None;
        match &event {
            CoreEvent::DownloadStatus { state, .. } => job.state = *state,
            CoreEvent::DownloadResolved {
                final_url,
                path,
                total,
                content_type,
                ..
            } => {
                job.final_url = Some(final_url.clone());
                job.destination = path.clone();
                job.total = *total;
                job.content_type = content_type.clone();
            }
            CoreEvent::DownloadProgress { received, total, .. } => {
                job.received = *received;
                if total.is_some() {
                    job.total = *total;
                }
            }
            CoreEvent::DownloadSpeed { bytes_per_sec, .. } => job.speed = *bytes_per_sec,
            CoreEvent::DownloadFinished {
                outcome,
                message,
                path,
                ..
            } => {
                job.state = DownloadState::from(*outcome);
                job.destination = path.clone();
                job.speed = 0.0;
                job.finished_at = Some(Utc::now());
                if *outcome == Outcome::Failed {
                    job.error = Some(message.clone());
                }
                entry.handle = None;
                finished = Some(*outcome);
            }
            CoreEvent::DownloadAdded { .. }
            | CoreEvent::DownloadRemoved { .. }
            | CoreEvent::TrackerBlocked { .. } => {}
        }

        self.broadcast(event);

        let Some(outcome) = finished else {
            return;
        };

        if outcome == Outcome::Cancelled || entry.remove_on_finish {
            jobs.remove(&id);
            self.broadcast(CoreEvent::DownloadRemoved { id });
            return;
        }

        if outcome == Outcome::Complete && self.notify_on_complete {
            let job = entry.job.clone();
            drop(jobs);
            if let Some(notifier) = self.notifier.read().clone() {
                notifier.download_complete(&job);
            }
        }
    }
}

/// Download coordinator
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    client: Client,
    config: DownloadConfig,
    reservations: PathReservations,
    worker_tx: mpsc::Sender<CoreEvent>,
    runtime: Handle,
}

impl DownloadCoordinator {
    /// Create a coordinator on the current tokio runtime
    pub fn new(
        config: DownloadConfig,
        event_tx: broadcast::Sender<CoreEvent>,
    ) -> Result<Self, CoreError> {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        Self::with_runtime(config, event_tx, runtime)
    }

    /// Create a coordinator whose workers run on `runtime`
    pub fn with_runtime(
        config: DownloadConfig,
        event_tx: broadcast::Sender<CoreEvent>,
        runtime: Handle,
    ) -> Result<Self, CoreError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let shared = Arc::new(Shared {
            jobs: RwLock::new(HashMap::new()),
            event_tx,
            notifier: RwLock::new(None),
            notify_on_complete: config.notify_on_complete,
        });

        let (worker_tx, mut worker_rx) = mpsc::channel(WORKER_EVENT_CAPACITY);
        let relay = shared.clone();
        runtime.spawn(async move {
            while let Some(event) = worker_rx.recv().await {
                relay.apply(event);
            }
        });

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            client,
            config,
            reservations: PathReservations::new(),
            worker_tx,
            runtime,
        })
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn set_notifier(&self, notifier: Arc<dyn DownloadNotifier>) {
        *self.shared.notifier.write() = Some(notifier);
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    /// Start downloading `request.url` and return the new job's id.
    ///
    /// Returns as soon as the worker is spawned. Only `http` and `https`
    /// URLs are accepted.
    pub fn submit(&self, request: DownloadRequest) -> Result<JobId, CoreError> {
        let url = Url::parse(request.url.trim())
            .map_err(|_| CoreError::InvalidUrl(request.url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::InvalidUrl(request.url));
        }

        let name = request
            .suggested_filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| naming::filename_from_url(&url));
        let name = naming::sanitize_filename(&name);
        let destination = self
            .reservations
            .reserve_unique(&self.config.download_dir.join(name));

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = DownloadJob::new(id, url.to_string(), destination.clone());

        info!(job_id = id.0, url = %url, path = %destination.display(), "Download submitted");

        let worker = DownloadWorker::new(
            id,
            url,
            destination,
            request.content_type_hint,
            self.client.clone(),
            self.config.worker.clone(),
            self.reservations.clone(),
            self.worker_tx.clone(),
        );

        // Added must reach subscribers before anything the worker sends
        let mut jobs = self.shared.jobs.write();
        self.shared
            .broadcast(CoreEvent::DownloadAdded { job: job.clone() });
        let handle = worker.start(&self.runtime);
        jobs.insert(
            id,
            JobEntry {
                job,
                handle: Some(handle),
                remove_on_finish: false,
            },
        );

        Ok(id)
    }

    /// Cancel a running download. The job leaves the table once the worker
    /// has cleaned up and reported `Cancelled`.
    pub fn cancel(&self, id: JobId) -> Result<(), CoreError> {
        let jobs = self.shared.jobs.read();
        let entry = jobs.get(&id).ok_or(CoreError::NotFound(id))?;
        match &entry.handle {
            Some(handle) => {
                info!(job_id = id.0, "Cancelling download");
                handle.cancel();
            }
            None => debug!(job_id = id.0, "Download already finished, nothing to cancel"),
        }
        Ok(())
    }

    /// Remove a download from the table, cancelling it first if it is running
    pub fn remove(&self, id: JobId) -> Result<(), CoreError> {
        let mut jobs = self.shared.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(CoreError::NotFound(id))?;

        if let Some(handle) = &entry.handle {
            entry.remove_on_finish = true;
            handle.cancel();
            return Ok(());
        }

        jobs.remove(&id);
        self.shared.broadcast(CoreEvent::DownloadRemoved { id });
        Ok(())
    }

    /// Drop every completed or failed download. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.shared.jobs.write();
        let finished: Vec<JobId> = jobs
            .values()
            .filter(|entry| entry.handle.is_none() && entry.job.state.is_terminal())
            .map(|entry| entry.job.id)
            .collect();

        for id in &finished {
            jobs.remove(id);
            self.shared.broadcast(CoreEvent::DownloadRemoved { id: *id });
        }
        finished.len()
    }

    /// Cancel every running download. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.shared.jobs.read();
        let mut count = 0;
        for handle in jobs.values().filter_map(|entry| entry.handle.as_ref()) {
            if !handle.is_cancelled() {
                handle.cancel();
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "Cancelling all downloads");
        }
        count
    }

    /// Cancel everything and wait for the workers to exit
    pub async fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut jobs = self.shared.jobs.write();
            jobs.values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };

        for handle in &handles {
            handle.cancel();
        }
        for handle in handles {
            if handle.join().await.is_none() {
                warn!("Download worker panicked during shutdown");
            }
        }
    }

    pub fn job(&self, id: JobId) -> Option<DownloadJob> {
        self.shared.jobs.read().get(&id).map(|entry| entry.job.clone())
    }

    /// Snapshot of all downloads, oldest first
    pub fn jobs(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self
            .shared
            .jobs
            .read()
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Downloads that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        self.shared
            .jobs
            .read()
            .values()
            .filter(|entry| entry.handle.is_some())
            .count()
    }
}
