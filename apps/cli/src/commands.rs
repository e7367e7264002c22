//! CLI command implementations

use crate::output::{format_bytes, print_rows, truncate};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Result};
use console::style;
use hixs_core::config::SettingsStore;
use hixs_core::engine::DownloadNotifier;
use hixs_core::filter::PatternMatcher;
use hixs_core::BrowserCore;
use hixs_types::{
    CoreEvent, DownloadJob, DownloadRequest, DownloadState, JobId, Outcome, RequestInfo, Settings,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;

// ============================================================================
// Download Commands
// ============================================================================

/// Rings the terminal bell when a download completes
struct TerminalBell;

impl DownloadNotifier for TerminalBell {
    fn download_complete(&self, job: &DownloadJob) {
        let _ = console::Term::stderr().write_str("\x07");
        tracing::debug!(job_id = job.id.0, "Completion notified");
    }
}

#[derive(Serialize, Tabled)]
struct DownloadRow {
    id: JobId,
    file: String,
    size: String,
    outcome: Outcome,
    message: String,
    #[tabled(skip)]
    url: String,
    #[tabled(skip)]
    path: PathBuf,
}

impl DownloadRow {
    fn new(
        id: JobId,
        url: String,
        outcome: Outcome,
        message: String,
        path: PathBuf,
        size: String,
    ) -> Self {
        Self {
            id,
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            outcome,
            message,
            url,
            path,
        }
    }

    /// Row for a download whose terminal event was missed, built from the
    /// coordinator's record. A job with no record was cancelled and removed.
    fn settled(id: JobId, url: String, job: Option<&DownloadJob>) -> Option<Self> {
        let Some(job) = job else {
            return Some(Self::new(
                id,
                url,
                Outcome::Cancelled,
                "Cancelled".to_string(),
                PathBuf::new(),
                "-".to_string(),
            ));
        };

        let (outcome, message) = match job.state {
            DownloadState::Complete => (Outcome::Complete, "Complete".to_string()),
            DownloadState::Failed => (
                Outcome::Failed,
                job.error.clone().unwrap_or_else(|| "Failed".to_string()),
            ),
            DownloadState::Cancelled => (Outcome::Cancelled, "Cancelled".to_string()),
            DownloadState::Connecting | DownloadState::Downloading => return None,
        };
        Some(Self::new(
            id,
            url,
            outcome,
            message,
            job.destination.clone(),
            format_bytes(job.received),
        ))
    }
}

/// Move every pending download that has already ended into `rows`
fn reconcile_pending(
    pending: &mut HashMap<JobId, String>,
    rows: &mut Vec<DownloadRow>,
    lookup: impl Fn(JobId) -> Option<DownloadJob>,
) {
    pending.retain(|id, url| match DownloadRow::settled(*id, url.clone(), lookup(*id).as_ref()) {
        Some(row) => {
            rows.push(row);
            false
        }
        None => true,
    });
}

pub async fn get(
    store: &SettingsStore,
    urls: Vec<String>,
    dir: Option<PathBuf>,
    name: Option<String>,
    content_type: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    if name.is_some() && urls.len() > 1 {
        bail!("--name can only be used with a single URL");
    }

    let mut settings = store.load().await?;
    if let Some(dir) = dir {
        settings.download_dir = dir;
    }

    let core = BrowserCore::new(settings).await?;
    if core.settings().show_download_notifications {
        core.set_download_notifier(Arc::new(TerminalBell));
    }

    let mut events = core.subscribe();
    let mut bars = matches!(format, OutputFormat::Human).then(DownloadProgress::new);
    let mut pending: HashMap<JobId, String> = HashMap::new();
    let mut rejected = 0;

    for url in urls {
        let request = DownloadRequest {
            url: url.clone(),
            suggested_filename: name.clone(),
            content_type_hint: content_type.clone(),
        };
        match core.downloads().submit(request) {
            Ok(id) => {
                pending.insert(id, url);
            }
            Err(e) => {
                rejected += 1;
                eprintln!("{} {}: {}", style("✗").red().bold(), url, e);
            }
        }
    }

    if let Some(bars) = &bars {
        bars.println(format!(
            "Saving to {}",
            style(core.downloads().download_dir().display()).cyan()
        ));
    }

    let mut rows = Vec::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while !pending.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let count = core.downloads().cancel_all();
                let line = format!("{} Cancelling {} download(s)", style("○").dim(), count);
                match &bars {
                    Some(bars) => bars.println(line),
                    None => eprintln!("{line}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(bars) = bars.as_mut() {
                        bars.handle_event(&event);
                    }
                    if let CoreEvent::DownloadFinished { id, outcome, message, path } = event {
                        if let Some(url) = pending.remove(&id) {
                            let size = core
                                .downloads()
                                .job(id)
                                .map(|job| format_bytes(job.received))
                                .unwrap_or_else(|| "-".to_string());
                            rows.push(DownloadRow::new(id, url, outcome, message, path, size));
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} download events", n);
                    reconcile_pending(&mut pending, &mut rows, |id| core.downloads().job(id));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(bars) = bars.as_mut() {
        bars.clear();
    }
    core.shutdown().await;

    match format {
        OutputFormat::Human => {
            let complete = rows.iter().filter(|r| r.outcome == Outcome::Complete).count();
            println!();
            println!(
                "{} of {} download(s) complete",
                style(complete).bold(),
                rows.len() + rejected
            );
            for row in rows.iter().filter(|r| r.outcome == Outcome::Complete) {
                println!("  {}", style(row.path.display()).cyan());
            }
        }
        OutputFormat::Json | OutputFormat::Table => print_rows(&rows, format)?,
    }

    let unfinished = rejected + rows.iter().filter(|r| r.outcome != Outcome::Complete).count();
    if unfinished > 0 {
        bail!("{} download(s) did not complete", unfinished);
    }
    Ok(())
}

// ============================================================================
// Filter Commands
// ============================================================================

#[derive(Serialize, Tabled)]
struct CheckRow {
    url: String,
    verdict: String,
    pattern: String,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    ad_block_enabled: bool,
    results: &'a [CheckRow],
    blocked_total: u64,
}

pub async fn check(store: &SettingsStore, urls: Vec<String>, format: OutputFormat) -> Result<()> {
    let core = BrowserCore::new(store.load().await?).await?;
    let enabled = core.interceptor().is_enabled();

    let rows: Vec<CheckRow> = urls
        .into_iter()
        .map(|url| {
            let verdict = core.on_network_request(&RequestInfo::new(&url));
            let pattern = if verdict.is_block() {
                core.interceptor()
                    .matcher()
                    .first_match(&url)
                    .unwrap_or_default()
                    .to_string()
            } else {
                String::new()
            };
            CheckRow {
                url,
                verdict: if verdict.is_block() { "block" } else { "allow" }.to_string(),
                pattern,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let report = CheckReport {
                ad_block_enabled: enabled,
                results: &rows,
                blocked_total: core.tracker_count(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => print_rows(&rows, format)?,
        OutputFormat::Human => {
            if !enabled {
                println!(
                    "{}",
                    style("Ad blocking is disabled in settings; every request is allowed").yellow()
                );
            }
            for row in &rows {
                if row.verdict == "block" {
                    println!(
                        "{} {} {}",
                        style("✗ block").red().bold(),
                        truncate(&row.url, 80),
                        style(format!("({})", row.pattern)).dim()
                    );
                } else {
                    println!("{} {}", style("✓ allow").green(), truncate(&row.url, 80));
                }
            }
            println!();
            println!("{} tracker(s) blocked", style(core.tracker_count()).bold());
        }
    }

    Ok(())
}

#[derive(Serialize, Tabled)]
struct PatternRow {
    index: usize,
    pattern: String,
}

pub async fn patterns(store: &SettingsStore, count_only: bool, format: OutputFormat) -> Result<()> {
    let settings = store.load().await?;
    let matcher = PatternMatcher::with_extra(&settings.extra_block_patterns)?;

    if count_only {
        println!("{}", matcher.len());
        return Ok(());
    }

    match format {
        OutputFormat::Human => {
            for pattern in matcher.patterns() {
                println!("{}", pattern);
            }
        }
        OutputFormat::Json | OutputFormat::Table => {
            let rows: Vec<PatternRow> = matcher
                .patterns()
                .iter()
                .enumerate()
                .map(|(index, pattern)| PatternRow {
                    index,
                    pattern: pattern.clone(),
                })
                .collect();
            print_rows(&rows, format)?;
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    store: &SettingsStore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = store.load().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                _ => {
                    println!("Hixs Configuration ({}):", store.path().display());
                    println!();
                    for (key, value) in settings_map(&settings)? {
                        println!("  {}: {}", key, display_value(&value));
                    }
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = store.load().await?;
            let map = settings_map(&settings)?;
            let value = map
                .get(&key)
                .ok_or_else(|| anyhow!("Unknown config key: {}", key))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
                _ => println!("{}", display_value(value)),
            }
        }

        Some(ConfigAction::Set { key, value }) => {
            let settings = store.load().await?;
            let updated = apply_setting(&settings, &key, &value)?;
            PatternMatcher::with_extra(&updated.extra_block_patterns)?;

            store.save(&updated).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                store.save(&Settings::default()).await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }

        Some(ConfigAction::Path) => println!("{}", store.path().display()),
    }

    Ok(())
}

fn settings_map(settings: &Settings) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(settings)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(anyhow!("Settings did not serialize to an object")),
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) if items.is_empty() => "(none)".to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Return `settings` with `key` set from its command-line spelling.
///
/// Values are read as JSON first, so `false` and `15` keep their types; list
/// settings also accept a comma separated string.
fn apply_setting(settings: &Settings, key: &str, raw: &str) -> Result<Settings> {
    let mut map = settings_map(settings)?;
    let current = map
        .get(key)
        .ok_or_else(|| anyhow!("Unknown config key: {}", key))?;

    let value = match current {
        serde_json::Value::String(_) => serde_json::Value::String(raw.to_string()),
        serde_json::Value::Array(_) if !raw.trim_start().starts_with('[') => serde_json::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| serde_json::Value::String(s.to_string()))
                .collect(),
        ),
        _ => serde_json::from_str(raw).map_err(|_| anyhow!("Invalid value for {}: {}", key, raw))?,
    };

    map.insert(key.to_string(), value);
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| anyhow!("Invalid value for {}: {}", key, e))
}
