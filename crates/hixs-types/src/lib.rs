//! Shared types for Hixs
//!
//! This crate contains the data structures passed between the browser core,
//! the hosting engine and whatever UI sits on top of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Download Types
// ============================================================================

/// Session-scoped download identifier. Allocated monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One logical file transfer, independent of how many redirects it follows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,
    pub url: String,
    /// URL the body was actually served from, once redirects are resolved
    pub final_url: Option<String>,
    /// Provisional until the job enters `Downloading`
    pub destination: PathBuf,
    pub state: DownloadState,
    pub received: u64,
    /// `None` until headers arrive, or when the server sends no length
    pub total: Option<u64>,
    /// Bytes per second as of the last speed report
    pub speed: f64,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn new(id: JobId, url: String, destination: PathBuf) -> Self {
        Self {
            id,
            url,
            final_url: None,
            destination,
            state: DownloadState::Connecting,
            received: 0,
            total: None,
            speed: 0.0,
            content_type: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Percentage in `0.0..=100.0`, or `None` while the size is unknown
    pub fn progress(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.received as f64 / total as f64) * 100.0),
            _ => None,
        }
    }

    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Externally observable state of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Connecting,
    Downloading,
    Complete,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Complete | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// How a download ended. Exactly one is reported per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Complete,
    Failed,
    Cancelled,
}

impl From<Outcome> for DownloadState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Complete => DownloadState::Complete,
            Outcome::Failed => DownloadState::Failed,
            Outcome::Cancelled => DownloadState::Cancelled,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Complete => "complete",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A download the embedded engine asked us to perform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub suggested_filename: Option<String>,
    /// MIME type the engine already knows about, used when the response has none
    pub content_type_hint: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Request Filtering Types
// ============================================================================

/// What kind of resource a network request is fetching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Xhr,
    #[default]
    Other,
}

/// An outgoing request the engine is about to issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub resource_type: ResourceType,
    /// Top-level page that triggered the request, if the engine knows it
    pub first_party_url: Option<String>,
}

impl RequestInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            resource_type: ResourceType::Other,
            first_party_url: None,
        }
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }
}

/// Decision handed back to the engine's network layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Block,
}

impl Verdict {
    pub fn is_block(self) -> bool {
        self == Verdict::Block
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Persisted settings the core reads at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ad_block_enabled: bool,
    pub download_dir: PathBuf,
    pub show_download_notifications: bool,
    /// Redirect hops a single download may follow before failing
    pub max_redirects: u32,
    /// Minimum time between progress reports, in milliseconds
    pub progress_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    /// Appended to the built-in blocklist; same regex syntax
    pub extra_block_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ad_block_enabled: true,
            download_dir: default_download_dir(),
            show_download_notifications: true,
            max_redirects: 10,
            progress_interval_ms: 500,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            user_agent: "HixsBrowser/2.1".to_string(),
            extra_block_patterns: Vec::new(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    DownloadAdded {
        job: DownloadJob,
    },
    DownloadStatus {
        id: JobId,
        state: DownloadState,
        status: String,
    },
    /// Headers have arrived: the destination path is now final
    DownloadResolved {
        id: JobId,
        final_url: String,
        path: PathBuf,
        total: Option<u64>,
        content_type: Option<String>,
    },
    DownloadProgress {
        id: JobId,
        received: u64,
        total: Option<u64>,
    },
    DownloadSpeed {
        id: JobId,
        bytes_per_sec: f64,
    },
    DownloadFinished {
        id: JobId,
        outcome: Outcome,
        message: String,
        path: PathBuf,
    },
    DownloadRemoved {
        id: JobId,
    },
    TrackerBlocked {
        url: String,
        total: u64,
    },
}

impl CoreEvent {
    /// The download this event is about, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            CoreEvent::DownloadAdded { job } => Some(job.id),
            CoreEvent::DownloadStatus { id, .. }
            | CoreEvent::DownloadResolved { id, .. }
            | CoreEvent::DownloadProgress { id, .. }
            | CoreEvent::DownloadSpeed { id, .. }
            | CoreEvent::DownloadFinished { id, .. }
            | CoreEvent::DownloadRemoved { id } => Some(*id),
            CoreEvent::TrackerBlocked { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoreEvent::DownloadFinished { .. })
    }
}
