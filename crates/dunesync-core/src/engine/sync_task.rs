//! Sync task - drives one pagination run to completion
//!
//! Walks the offset cursor in increasing order, one page at a time:
//! fetch (with retry for transient failures), decode, commit, advance.
//! Any permanent failure aborts the run; pages committed before it stay
//! committed and the stored checkpoint lets the next run resume.

use crate::client::PageSource;
use crate::engine::{decode_row, RetryPolicy};
use crate::error::SyncError;
use crate::store::{PageCommit, SnapshotStore};
use chrono::Utc;
use dunesync_types::{
    GasRow, MalformedRowPolicy, PageRequest, PageResult, RawRow, SyncCursor, SyncEvent, SyncReport,
    SyncSettings, SyncState,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A single sync run over one execution's result pages
pub struct SyncTask {
    run_id: Uuid,
    execution_id: u64,
    settings: SyncSettings,
    retry: RetryPolicy,
    source: Arc<dyn PageSource>,
    store: Arc<dyn SnapshotStore>,
    event_tx: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    state: SyncState,
}

#[derive(Debug, Default)]
struct RunStats {
    pages: u64,
    rows_written: u64,
    rows_skipped: u64,
}

impl SyncTask {
    /// Create a new sync task
    pub fn new(
        execution_id: u64,
        settings: SyncSettings,
        source: Arc<dyn PageSource>,
        store: Arc<dyn SnapshotStore>,
        event_tx: broadcast::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            execution_id,
            retry: RetryPolicy::from_settings(&settings),
            settings,
            source,
            store,
            event_tx,
            cancel,
            state: SyncState::Idle,
        }
    }

    /// Run the sync to completion or abort
    #[instrument(skip(self), fields(run_id = %self.run_id, execution_id = self.execution_id))]
    pub async fn run(mut self) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let started = Instant::now();
        self.set_state(SyncState::Running, None);

        let first_offset = match self.resolve_start_offset().await {
            Ok(offset) => offset,
            Err(e) => return Err(self.abort(e, self.settings.start_offset)),
        };

        info!(
            "Starting sync of execution {} at offset {} (page size {}, upper bound {:?})",
            self.execution_id, first_offset, self.settings.page_size, self.settings.upper_bound
        );
        let _ = self.event_tx.send(SyncEvent::Started {
            run_id: self.run_id,
            first_offset,
        });

        let mut cursor = SyncCursor::new(first_offset, self.settings.page_size, self.settings.upper_bound);
        let mut stats = RunStats::default();

        if let Err(e) = self.walk(&mut cursor, &mut stats).await {
            return Err(self.abort(e, cursor.offset));
        }

        // A finished walk starts over from the beginning next time
        match self.store.clear_checkpoint(self.execution_id).await {
            Ok(_) => {}
            Err(e) => warn!("Failed to clear checkpoint for execution {}: {}", self.execution_id, e),
        }

        info!(
            "Sync of execution {} completed: {} pages, {} rows written, {} rows skipped",
            self.execution_id, stats.pages, stats.rows_written, stats.rows_skipped
        );
        self.set_state(SyncState::Completed, None);

        Ok(SyncReport {
            run_id: self.run_id,
            execution_id: self.execution_id,
            state: self.state,
            first_offset,
            next_offset: cursor.offset,
            pages: stats.pages,
            rows_written: stats.rows_written,
            rows_skipped: stats.rows_skipped,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Start offset, moved forward to the stored checkpoint when resuming
    async fn resolve_start_offset(&self) -> Result<u64, SyncError> {
        let start = self.settings.start_offset;
        if !self.settings.resume {
            return Ok(start);
        }

        match self.store.load_checkpoint(self.execution_id).await? {
            Some(checkpoint) if checkpoint.next_offset > start => {
                info!(
                    "Resuming execution {} from checkpoint offset {} (last committed {})",
                    self.execution_id, checkpoint.next_offset, checkpoint.last_offset
                );
                Ok(checkpoint.next_offset)
            }
            _ => Ok(start),
        }
    }

    async fn walk(&self, cursor: &mut SyncCursor, stats: &mut RunStats) -> Result<(), SyncError> {
        while cursor.has_next() {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            // Fetching
            let request = cursor.request(self.execution_id);
            let page = self.fetch_with_retry(request).await?;

            let next_offset = next_page_offset(&request, page.next_offset)?;

            // Writing
            let (rows, skipped) = self.decode_page(request.offset, &page.rows)?;
            self.store
                .commit_page(PageCommit {
                    execution_id: self.execution_id,
                    offset: request.offset,
                    next_offset: next_offset.unwrap_or_else(|| request.offset.saturating_add(request.limit)),
                    rows: &rows,
                })
                .await?;

            stats.pages += 1;
            stats.rows_written += rows.len() as u64;
            stats.rows_skipped += skipped;

            info!("offset completed: {} ({} rows)", request.offset, rows.len());
            let _ = self.event_tx.send(SyncEvent::PageCommitted {
                run_id: self.run_id,
                offset: request.offset,
                rows_written: rows.len() as u64,
                rows_skipped: skipped,
                next_offset,
            });

            // Advancing
            match next_offset {
                Some(next) => cursor.advance_to(next),
                None => {
                    cursor.advance();
                    info!("Last page reached at offset {}", request.offset);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Fetch a page, retrying transient failures with backoff
    async fn fetch_with_retry(&self, request: PageRequest) -> Result<PageResult, SyncError> {
        let mut attempt = 0;

        loop {
            let outcome = match self.source.fetch_page(request).await {
                Ok(page) => check_execution(page),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Fetch at offset {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        request.offset,
                        attempt,
                        self.retry.max_retries + 1,
                        e,
                        delay
                    );
                    let _ = self.event_tx.send(SyncEvent::Retrying {
                        run_id: self.run_id,
                        offset: request.offset,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Validate every row of a page before anything is written
    fn decode_page(&self, offset: u64, raw_rows: &[RawRow]) -> Result<(Vec<GasRow>, u64), SyncError> {
        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut skipped = 0;

        for (index, raw) in raw_rows.iter().enumerate() {
            match decode_row(raw) {
                Ok(row) => rows.push(row),
                Err(e) => match self.settings.malformed_rows {
                    MalformedRowPolicy::Abort => {
                        return Err(SyncError::MalformedResponse(format!(
                            "row {} at offset {}: {}",
                            index, offset, e
                        )));
                    }
                    MalformedRowPolicy::Skip => {
                        warn!("Skipping row {} at offset {}: {}", index, offset, e);
                        skipped += 1;
                        let _ = self.event_tx.send(SyncEvent::RowSkipped {
                            run_id: self.run_id,
                            offset,
                            index,
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }

        Ok((rows, skipped))
    }

    fn abort(&mut self, e: SyncError, offset: u64) -> SyncError {
        error!("Sync aborted at offset {}: {}", offset, e);
        self.set_state(SyncState::Aborted, Some(e.to_string()));
        e
    }

    fn set_state(&mut self, state: SyncState, error: Option<String>) {
        self.state = state;
        let _ = self.event_tx.send(SyncEvent::StateChanged {
            run_id: self.run_id,
            state,
            error,
        });
    }
}

/// Offset of the following page as reported by the API
///
/// A short page moves the walk to the reported offset so no row is passed
/// over. Offsets that do not move forward, or that jump past the page just
/// read, are rejected before anything is written.
fn next_page_offset(request: &PageRequest, next_offset: Option<u64>) -> Result<Option<u64>, SyncError> {
    let Some(next) = next_offset else {
        return Ok(None);
    };

    let page_end = request.offset.saturating_add(request.limit);
    if next <= request.offset || next > page_end {
        return Err(SyncError::MalformedResponse(format!(
            "next_offset {} outside ({}, {}] for page at offset {}",
            next, request.offset, page_end, request.offset
        )));
    }
    Ok(Some(next))
}

/// Reject pages from executions that are unfinished or failed
fn check_execution(page: PageResult) -> Result<PageResult, SyncError> {
    if let Some(error) = &page.error {
        return Err(SyncError::ExecutionFailed {
            message: error.message.clone(),
        });
    }
    if page.state.is_failed() {
        return Err(SyncError::ExecutionFailed {
            message: format!("execution ended in state {:?}", page.state),
        });
    }
    if page.state.is_pending() {
        return Err(SyncError::ExecutionNotReady { state: page.state });
    }
    Ok(page)
}
