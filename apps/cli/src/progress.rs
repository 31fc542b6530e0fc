//! Progress bar for sync runs

use console::style;
use dunesync_types::{Settings, SyncEvent, SyncState};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Tracks one sync run on a progress bar
pub struct SyncProgress {
    bar: ProgressBar,
    page_size: u64,
    upper_bound: Option<u64>,
}

impl SyncProgress {
    /// Bounded runs get a page bar, open-ended runs a spinner
    pub fn new(settings: &Settings) -> Self {
        let page_size = settings.sync.page_size;
        let upper_bound = settings.sync.upper_bound;

        let bar = match expected_pages(settings.sync.start_offset, page_size, upper_bound) {
            Some(pages) => {
                let bar = ProgressBar::new(pages);
                if let Ok(bar_style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages {msg}")
                {
                    bar.set_style(bar_style.progress_chars("█▓▒░  "));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(spinner_style) =
                    ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} pages {msg}")
                {
                    bar.set_style(spinner_style);
                }
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            }
        };

        Self {
            bar,
            page_size,
            upper_bound,
        }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &SyncEvent) {
        match event {
            // A resumed run starts past the configured offset
            SyncEvent::Started { first_offset, .. } => {
                if self.upper_bound.is_some() {
                    let pages = expected_pages(*first_offset, self.page_size, self.upper_bound);
                    self.bar.set_length(pages.unwrap_or(0));
                }
            }

            SyncEvent::PageCommitted {
                offset,
                rows_written,
                ..
            } => {
                self.bar.inc(1);
                self.bar
                    .set_message(format!("offset {} ({} rows)", offset, rows_written));
            }

            SyncEvent::Retrying {
                offset,
                attempt,
                delay_ms,
                ..
            } => {
                self.bar.set_message(format!(
                    "{} offset {} retry {} in {}s",
                    style("↻").yellow(),
                    offset,
                    attempt,
                    delay_ms / 1000
                ));
            }

            SyncEvent::StateChanged { state, error, .. } => match state {
                SyncState::Completed => {
                    self.bar
                        .finish_with_message(format!("{} Sync complete", style("✓").green().bold()));
                }
                SyncState::Aborted => {
                    self.bar.abandon_with_message(format!(
                        "{} Aborted: {}",
                        style("✗").red().bold(),
                        error.as_deref().unwrap_or("Unknown error")
                    ));
                }
                _ => {}
            },

            SyncEvent::RowSkipped { .. } => {}
        }
    }
}

/// Number of full pages a bounded run walks from `start`
fn expected_pages(start: u64, page_size: u64, upper_bound: Option<u64>) -> Option<u64> {
    let bound = upper_bound?;
    if page_size == 0 || bound < start {
        return None;
    }
    Some((bound - start) / page_size + 1)
}
