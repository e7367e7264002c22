//! Hixs Core - request filtering and downloads
//!
//! This crate is the non-GUI heart of the Hixs browser. It decides which
//! network requests the embedded engine may send and runs the downloads the
//! engine hands over. Rendering, windows and tabs belong to the host.

pub mod config;
pub mod engine;
mod error;
pub mod filter;
pub mod host;
pub mod observer;

pub use error::*;

use crate::config::SettingsStore;
use crate::engine::{DownloadConfig, DownloadCoordinator, DownloadNotifier};
use crate::filter::{PatternMatcher, RequestInterceptor, TrackerCounter};
use crate::host::{BrowserEngine, DownloadHook, PageEvent, PageHook, RequestHook};
use crate::observer::CoreObserver;
use hixs_types::{CoreEvent, DownloadRequest, JobId, RequestInfo, Settings, Verdict};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the outbound event channel
const EVENT_CAPACITY: usize = 1000;

/// The main Hixs core instance
#[derive(Clone)]
pub struct BrowserCore {
    settings: Arc<RwLock<Settings>>,
    /// Shared with the interceptor; read by the UI through `tracker_count`
    counter: Arc<TrackerCounter>,
    interceptor: Arc<RequestInterceptor>,
    downloads: Arc<DownloadCoordinator>,
    event_tx: broadcast::Sender<CoreEvent>,
}

impl BrowserCore {
    /// Build the core from already loaded settings.
    ///
    /// Fails if a blocklist pattern does not compile. Must be called inside a
    /// tokio runtime; download workers are spawned on it.
    pub async fn new(settings: Settings) -> Result<Self, CoreError> {
        let matcher = Arc::new(PatternMatcher::with_extra(&settings.extra_block_patterns)?);
        info!(patterns = matcher.len(), "Blocklist loaded");

        if let Err(e) = tokio::fs::create_dir_all(&settings.download_dir).await {
            warn!(
                path = %settings.download_dir.display(),
                error = %e,
                "Could not create download directory"
            );
        }

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let counter = Arc::new(TrackerCounter::new());
        let interceptor = Arc::new(RequestInterceptor::new(
            matcher,
            counter.clone(),
            event_tx.clone(),
            settings.ad_block_enabled,
        ));
        let downloads = Arc::new(DownloadCoordinator::new(
            DownloadConfig::from(&settings),
            event_tx.clone(),
        )?);

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            counter,
            interceptor,
            downloads,
            event_tx,
        })
    }

    /// Load settings from `path` and build the core
    pub async fn from_config_file(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let settings = SettingsStore::new(path).load().await?;
        Self::new(settings).await
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    /// Total requests blocked since startup
    pub fn tracker_count(&self) -> u64 {
        self.counter.get()
    }

    pub fn set_ad_blocking(&self, enabled: bool) {
        self.settings.write().ad_block_enabled = enabled;
        self.interceptor.set_enabled(enabled);
    }

    pub fn set_download_notifier(&self, notifier: Arc<dyn DownloadNotifier>) {
        self.downloads.set_notifier(notifier);
    }

    // ========================================================================
    // Engine hooks
    // ========================================================================

    /// Verdict for a request the engine is about to send
    pub fn on_network_request(&self, request: &RequestInfo) -> Verdict {
        self.interceptor.intercept(request)
    }

    /// Start a download the engine asked for. Errors are logged, not returned,
    /// because the engine has nowhere to send them.
    pub fn on_download_requested(&self, request: DownloadRequest) -> Option<JobId> {
        let url = request.url.clone();
        match self.downloads.submit(request) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(url = %url, error = %e, "Rejected download request");
                None
            }
        }
    }

    /// Install this core's hooks on `engine`
    pub fn attach(&self, engine: &mut dyn BrowserEngine) {
        let hooks = Arc::new(self.clone());
        engine.set_request_hook(hooks.clone());
        engine.set_download_hook(hooks.clone());
        engine.set_page_hook(hooks);
        debug!("Core attached to browser engine");
    }

    /// Deliver every future event to `observer` on the current runtime
    pub fn spawn_observer(&self, observer: Arc<dyn CoreObserver>) -> Result<JoinHandle<()>, CoreError> {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        Ok(observer::spawn_observer(self.subscribe(), observer, &runtime))
    }

    /// Cancel running downloads and wait for their workers
    pub async fn shutdown(&self) {
        self.downloads.shutdown().await;
        info!(blocked = self.tracker_count(), "Core shut down");
    }
}

impl RequestHook for BrowserCore {
    fn on_network_request(&self, request: &RequestInfo) -> Verdict {
        BrowserCore::on_network_request(self, request)
    }
}

impl DownloadHook for BrowserCore {
    fn on_download_requested(&self, request: DownloadRequest) {
        BrowserCore::on_download_requested(self, request);
    }
}

impl PageHook for BrowserCore {
    fn on_page_event(&self, event: &PageEvent) {
        debug!(?event, "Page event");
    }
}
