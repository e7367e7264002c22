//! Download worker - one transfer, start to finish
//!
//! A worker owns its job while in flight. It connects, follows redirects
//! itself, resolves the final destination once headers are in, streams the
//! body to disk and reports progress on a fixed cadence. Every path out of
//! `run` sends exactly one `DownloadFinished` event, and it is the last event
//! the worker sends.

use crate::engine::mime;
use crate::engine::naming::{self, PathReservations};
use crate::engine::progress::SpeedMeter;
use crate::error::CoreError;
use futures::StreamExt;
use hixs_types::{CoreEvent, DownloadState, JobId, Outcome};
use reqwest::{header, Client, Response};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Per-transfer knobs taken from settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_redirects: u32,
    pub progress_interval: Duration,
    /// Longest wait for response headers or the next body chunk
    pub read_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            progress_interval: Duration::from_millis(500),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// A single in-flight download
pub struct DownloadWorker {
    id: JobId,
    url: Url,
    destination: PathBuf,
    content_type_hint: Option<String>,
    client: Client,
    config: WorkerConfig,
    reservations: PathReservations,
    cancel: CancellationToken,
    events: mpsc::Sender<CoreEvent>,
}

/// Control handle kept by whoever started the worker
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl WorkerHandle {
    /// Ask the worker to stop. It cleans up and reports `Cancelled` itself.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the worker to finish
    pub async fn join(self) -> Option<Outcome> {
        self.task.await.ok()
    }
}

impl DownloadWorker {
    /// Create a worker for `url`. `destination` must already be reserved in
    /// `reservations`; the worker releases it when it finishes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        url: Url,
        destination: PathBuf,
        content_type_hint: Option<String>,
        client: Client,
        config: WorkerConfig,
        reservations: PathReservations,
        events: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Self {
            id,
            url,
            destination,
            content_type_hint,
            client,
            config,
            reservations,
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Spawn the transfer on `runtime` and return immediately
    pub fn start(self, runtime: &Handle) -> WorkerHandle {
        let cancel = self.cancel.clone();
        let task = runtime.spawn(self.run());
        WorkerHandle { cancel, task }
    }

    /// Run the transfer to its terminal state
    pub async fn run(mut self) -> Outcome {
        info!(job_id = self.id.0, url = %self.url, "Starting download");
        self.emit_status(DownloadState::Connecting, "Connecting...").await;

        let mut file_created = false;
        let result = self.transfer(&mut file_created).await;

        let (outcome, message) = match result {
            Ok(()) => {
                info!(job_id = self.id.0, path = %self.destination.display(), "Download complete");
                (Outcome::Complete, "Complete".to_string())
            }
            Err(CoreError::Cancelled) => {
                info!(job_id = self.id.0, "Download cancelled");
                if file_created {
                    self.remove_partial_file().await;
                }
                (Outcome::Cancelled, "Cancelled".to_string())
            }
            Err(e) => {
                warn!(job_id = self.id.0, error = %e, "Download failed");
                (Outcome::Failed, format!("Error: {e}"))
            }
        };

        self.reservations.release(&self.destination);
        self.emit(CoreEvent::DownloadFinished {
            id: self.id,
            outcome,
            message,
            path: self.destination.clone(),
        })
        .await;

        outcome
    }

    async fn transfer(&mut self, file_created: &mut bool) -> Result<(), CoreError> {
        let response = self.connect().await?;

        let final_url = response.url().to_string();
        let total = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.content_type_hint.clone());

        if !naming::has_extension(&self.destination) {
            if let Some(content_type) = &content_type {
                let ext = mime::extension_for(content_type);
                let candidate = self.destination.with_extension(ext);
                let resolved = self.reservations.reserve_unique(&candidate);
                self.reservations.release(&self.destination);
                debug!(job_id = self.id.0, path = %resolved.display(), content_type, "Inferred extension");
                self.destination = resolved;
            }
        }

        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&self.destination).await?;
        *file_created = true;

        self.emit(CoreEvent::DownloadResolved {
            id: self.id,
            final_url,
            path: self.destination.clone(),
            total,
            content_type,
        })
        .await;
        self.emit_status(DownloadState::Downloading, "Downloading").await;

        let period = self.config.progress_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meter = SpeedMeter::new(std::time::Instant::now());
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let read_timeout = self.config.read_timeout;
        let idle = tokio::time::sleep(read_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CoreError::Cancelled),
                _ = &mut idle => return Err(CoreError::ReadTimeout { secs: read_timeout.as_secs() }),
                _ = ticker.tick() => {
                    let speed = meter.report(received, std::time::Instant::now());
                    self.emit_progress(received, total).await;
                    self.emit(CoreEvent::DownloadSpeed { id: self.id, bytes_per_sec: speed }).await;
                }
                chunk = stream.next() => match chunk {
                    Some(chunk) => {
                        let chunk = chunk?;
                        file.write_all(&chunk).await?;
                        received += chunk.len() as u64;
                        idle.as_mut().reset(Instant::now() + read_timeout);
                    }
                    None => break,
                },
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        self.emit_progress(received, total.or(Some(received))).await;
        Ok(())
    }

    /// Issue the request, following redirects up to the configured limit
    async fn connect(&self) -> Result<Response, CoreError> {
        let mut current = self.url.clone();
        let mut hops = 0;

        loop {
            let request = self.client.get(current.clone());
            let read_timeout = self.config.read_timeout;
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CoreError::Cancelled),
                response = tokio::time::timeout(read_timeout, request.send()) => match response {
                    Ok(response) => response?,
                    Err(_) => return Err(CoreError::ReadTimeout { secs: read_timeout.as_secs() }),
                },
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(CoreError::MissingRedirectTarget)?;
                let next = current
                    .join(location)
                    .map_err(|_| CoreError::MissingRedirectTarget)?;

                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(CoreError::TooManyRedirects {
                        limit: self.config.max_redirects,
                    });
                }

                debug!(job_id = self.id.0, from = %current, to = %next, hops, "Following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(CoreError::HttpStatus {
                    status: status.as_u16(),
                });
            }

            return Ok(response);
        }
    }

    async fn remove_partial_file(&self) {
        match tokio::fs::remove_file(&self.destination).await {
            Ok(()) => debug!(job_id = self.id.0, "Removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = self.id.0,
                path = %self.destination.display(),
                error = %e,
                "Failed to remove partial file"
            ),
        }
    }

    async fn emit_status(&self, state: DownloadState, status: &str) {
        self.emit(CoreEvent::DownloadStatus {
            id: self.id,
            state,
            status: status.to_string(),
        })
        .await;
    }

    async fn emit_progress(&self, received: u64, total: Option<u64>) {
        self.emit(CoreEvent::DownloadProgress {
            id: self.id,
            received,
            total,
        })
        .await;
    }

    async fn emit(&self, event: CoreEvent) {
        if self.events.send(event).await.is_err() {
            debug!(job_id = self.id.0, "Event receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_server;
    use hixs_types::Outcome;

    struct Harness {
        dir: tempfile::TempDir,
        reservations: PathReservations,
        tx: mpsc::Sender<CoreEvent>,
        rx: mpsc::Receiver<CoreEvent>,
        client: Client,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(1024);
            Self {
                dir: tempfile::tempdir().unwrap(),
                reservations: PathReservations::new(),
                tx,
                rx,
                client: Client::builder()
                    .redirect(reqwest::redirect::Policy::none())
                    .build()
                    .unwrap(),
            }
        }

        fn worker(&self, url: &str, name: &str, config: WorkerConfig) -> DownloadWorker {
            let destination = self.reservations.reserve_unique(&self.dir.path().join(name));
            DownloadWorker::new(
                JobId(1),
                Url::parse(url).unwrap(),
                destination,
                None,
                self.client.clone(),
                config,
                self.reservations.clone(),
                self.tx.clone(),
            )
        }

        fn drain(&mut self) -> Vec<CoreEvent> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn finished(events: &[CoreEvent]) -> Vec<(Outcome, String, PathBuf)> {
        events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::DownloadFinished {
                    outcome,
                    message,
                    path,
                    ..
                } => Some((*outcome, message.clone(), path.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn downloads_body_and_finishes_last() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(
            &format!("{base}/files/report.pdf"),
            "report.pdf",
            WorkerConfig::default(),
        );

        assert_eq!(worker.run().await, Outcome::Complete);

        let events = harness.drain();
        assert!(events.last().unwrap().is_terminal());
        let done = finished(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(std::fs::read(&done[0].2).unwrap(), test_server::REPORT_BODY);
        assert!(!harness.reservations.is_reserved(&done[0].2));
    }

    #[tokio::test]
    async fn content_type_supplies_missing_extension() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(&format!("{base}/image"), "snapshot", WorkerConfig::default());

        assert_eq!(worker.run().await, Outcome::Complete);

        let done = finished(&harness.drain());
        assert_eq!(done[0].2, harness.dir.path().join("snapshot.png"));
        assert_eq!(std::fs::read(&done[0].2).unwrap(), test_server::PNG_BODY);
        assert!(!harness.dir.path().join("snapshot").exists());
    }

    #[tokio::test]
    async fn inferred_name_avoids_existing_files() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        std::fs::write(harness.dir.path().join("snapshot.png"), b"keep me").unwrap();
        let worker = harness.worker(&format!("{base}/image"), "snapshot", WorkerConfig::default());

        worker.run().await;

        let done = finished(&harness.drain());
        assert_eq!(done[0].2, harness.dir.path().join("snapshot (1).png"));
        assert_eq!(
            std::fs::read(harness.dir.path().join("snapshot.png")).unwrap(),
            b"keep me"
        );
    }

    #[tokio::test]
    async fn redirect_chain_is_one_logical_download() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(&format!("{base}/redirect/3"), "chain.txt", WorkerConfig::default());

        assert_eq!(worker.run().await, Outcome::Complete);

        let events = harness.drain();
        let resolved: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::DownloadResolved { final_url, .. } => Some(final_url.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(resolved, vec![format!("{base}/redirect/0")]);

        let done = finished(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(std::fs::read(&done[0].2).unwrap(), test_server::FINAL_BODY);
    }

    #[tokio::test]
    async fn redirects_past_the_limit_fail() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let config = WorkerConfig {
            max_redirects: 2,
            ..WorkerConfig::default()
        };
        let worker = harness.worker(&format!("{base}/redirect/3"), "chain.txt", config);

        assert_eq!(worker.run().await, Outcome::Failed);

        let done = finished(&harness.drain());
        assert!(done[0].1.contains("Too many redirects"), "{}", done[0].1);
        assert!(!done[0].2.exists());
    }

    #[tokio::test]
    async fn error_status_fails_with_reason() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(&format!("{base}/missing"), "missing.bin", WorkerConfig::default());

        assert_eq!(worker.run().await, Outcome::Failed);

        let done = finished(&harness.drain());
        assert_eq!(done[0].1, "Error: Server error: HTTP 404");
    }

    #[tokio::test]
    async fn connection_refused_fails() {
        let base = test_server::dead_url().await;
        let mut harness = Harness::new();
        let worker = harness.worker(&format!("{base}/file.bin"), "file.bin", WorkerConfig::default());

        assert_eq!(worker.run().await, Outcome::Failed);
        assert!(finished(&harness.drain())[0].1.starts_with("Error: Network error"));
    }

    #[tokio::test]
    async fn unwritable_destination_fails() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        std::fs::write(harness.dir.path().join("blocker"), b"not a directory").unwrap();
        let worker = harness.worker(
            &format!("{base}/files/report.pdf"),
            "blocker/sub/report.pdf",
            WorkerConfig::default(),
        );

        assert_eq!(worker.run().await, Outcome::Failed);

        let events = harness.drain();
        assert!(events.last().unwrap().is_terminal());
        let done = finished(&events);
        assert_eq!(done.len(), 1);
        assert!(done[0].1.starts_with("Error: IO error"), "{}", done[0].1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, CoreEvent::DownloadResolved { .. })));
        assert!(!harness.reservations.is_reserved(&done[0].2));
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let config = WorkerConfig {
            read_timeout: Duration::from_millis(100),
            ..WorkerConfig::default()
        };
        let worker = harness.worker(&format!("{base}/drip/3/1000"), "slow.bin", config);

        assert_eq!(worker.run().await, Outcome::Failed);
        assert!(finished(&harness.drain())[0].1.contains("Timed out"));
    }

    #[tokio::test]
    async fn broken_stream_fails_and_keeps_partial_file() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(&format!("{base}/broken"), "archive.zip", WorkerConfig::default());

        assert_eq!(worker.run().await, Outcome::Failed);

        let done = finished(&harness.drain());
        assert!(done[0].2.exists());
    }

    #[tokio::test]
    async fn cancel_removes_partial_file() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let worker = harness.worker(
            &format!("{base}/drip/1000/10"),
            "endless.bin",
            WorkerConfig::default(),
        );
        let destination = harness.dir.path().join("endless.bin");

        let handle = worker.start(&Handle::current());
        loop {
            match tokio::time::timeout(Duration::from_secs(5), harness.rx.recv()).await {
                Ok(Some(CoreEvent::DownloadStatus {
                    state: DownloadState::Downloading,
                    ..
                })) => break,
                Ok(Some(_)) => continue,
                other => panic!("worker never started downloading: {other:?}"),
            }
        }
        assert!(destination.exists());

        handle.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(outcome, Some(Outcome::Cancelled));

        let done = finished(&harness.drain());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, Outcome::Cancelled);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn progress_never_goes_backwards() {
        let base = test_server::spawn().await;
        let mut harness = Harness::new();
        let config = WorkerConfig {
            progress_interval: Duration::from_millis(15),
            ..WorkerConfig::default()
        };
        let worker = harness.worker(&format!("{base}/drip/20/5"), "drip.bin", config);

        assert_eq!(worker.run().await, Outcome::Complete);

        let progress: Vec<(u64, Option<u64>)> = harness
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::DownloadProgress { received, total, .. } => Some((received, total)),
                _ => None,
            })
            .collect();

        assert!(progress.len() > 1);
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
        let expected = (20 * test_server::CHUNK_SIZE) as u64;
        assert_eq!(progress.last().unwrap(), &(expected, Some(expected)));
    }
}
