//! Callback-style fan-out of core events to a UI layer
//!
//! Front-ends that prefer per-kind callbacks over matching on [`CoreEvent`]
//! implement [`CoreObserver`] and hand it to [`spawn_observer`].

use hixs_types::{CoreEvent, DownloadJob, DownloadState, JobId, Outcome};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receives core events. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait CoreObserver: Send + Sync {
    fn on_added(&self, job: &DownloadJob) {}

    fn on_progress(&self, id: JobId, received: u64, total: Option<u64>) {}

    fn on_speed(&self, id: JobId, bytes_per_sec: f64) {}

    fn on_status(&self, id: JobId, state: DownloadState, status: &str) {}

    /// The final destination and size are known
    fn on_resolved(&self, id: JobId, path: &Path, total: Option<u64>) {}

    /// Always the last call for `id`
    fn on_terminal(&self, id: JobId, outcome: Outcome, message: &str) {}

    fn on_removed(&self, id: JobId) {}

    fn on_tracker_blocked(&self, total: u64) {}
}

/// Route one event to the matching observer method
pub fn dispatch(observer: &dyn CoreObserver, event: &CoreEvent) {
    match event {
        CoreEvent::DownloadAdded { job } => observer.on_added(job),
        CoreEvent::DownloadStatus { id, state, status } => observer.on_status(*id, *state, status),
        CoreEvent::DownloadResolved { id, path, total, .. } => {
            observer.on_resolved(*id, path, *total)
        }
        CoreEvent::DownloadProgress { id, received, total } => {
            observer.on_progress(*id, *received, *total)
        }
        CoreEvent::DownloadSpeed { id, bytes_per_sec } => observer.on_speed(*id, *bytes_per_sec),
        CoreEvent::DownloadFinished {
            id,
            outcome,
            message,
            ..
        } => observer.on_terminal(*id, *outcome, message),
        CoreEvent::DownloadRemoved { id } => observer.on_removed(*id),
        CoreEvent::TrackerBlocked { total, .. } => observer.on_tracker_blocked(*total),
    }
}

/// Forward events from `rx` to `observer` until the channel closes
pub fn spawn_observer(
    mut rx: broadcast::Receiver<CoreEvent>,
    observer: Arc<dyn CoreObserver>,
    runtime: &Handle,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => dispatch(observer.as_ref(), &event),
                Err(RecvError::Lagged(n)) => {
                    warn!("Observer lagged by {} events", n);
                }
                Err(RecvError::Closed) => {
                    info!("Event channel closed, stopping observer");
                    break;
                }
            }
        }
    })
}
