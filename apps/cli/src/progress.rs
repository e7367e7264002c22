//! Progress bar utilities for CLI downloads

use crate::output::format_speed;
use console::style;
use hixs_types::{CoreEvent, JobId, Outcome};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg:30} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {prefix}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg:30} {bytes} {prefix}";

/// Manages progress bars for multiple downloads
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: HashMap<JobId, ProgressBar>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    /// Update the bars from a core event
    pub fn handle_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::DownloadAdded { job } => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(style_for(SPINNER_TEMPLATE));
                pb.enable_steady_tick(Duration::from_millis(120));
                pb.set_message(job.file_name());
                self.bars.insert(job.id, pb);
            }

            CoreEvent::DownloadStatus { id, status, .. } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.set_prefix(style(status).dim().to_string());
                }
            }

            CoreEvent::DownloadResolved { id, path, total, .. } => {
                if let Some(pb) = self.bars.get(id) {
                    if let Some(total) = total {
                        pb.set_style(style_for(BAR_TEMPLATE));
                        pb.set_length(*total);
                    }
                    if let Some(name) = path.file_name() {
                        pb.set_message(name.to_string_lossy().into_owned());
                    }
                }
            }

            CoreEvent::DownloadProgress { id, received, .. } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.set_position(*received);
                }
            }

            CoreEvent::DownloadSpeed { id, bytes_per_sec } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.set_prefix(format_speed(*bytes_per_sec));
                }
            }

            CoreEvent::DownloadFinished {
                id,
                outcome,
                message,
                ..
            } => {
                if let Some(pb) = self.bars.remove(id) {
                    match outcome {
                        Outcome::Complete => {
                            pb.set_prefix(format!("{} {}", style("✓").green().bold(), message));
                            pb.finish();
                        }
                        Outcome::Failed => {
                            pb.set_prefix(format!("{} {}", style("✗").red().bold(), message));
                            pb.abandon();
                        }
                        Outcome::Cancelled => {
                            pb.set_prefix(format!("{} {}", style("○").dim(), message));
                            pb.abandon();
                        }
                    }
                }
            }

            CoreEvent::DownloadRemoved { .. } | CoreEvent::TrackerBlocked { .. } => {}
        }
    }

    /// Print a line above the bars without tearing them
    pub fn println(&self, line: impl AsRef<str>) {
        let _ = self.multi.println(line);
    }

    /// Clear all progress bars
    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn style_for(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .map(|style| style.progress_chars("█▓▒░  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
