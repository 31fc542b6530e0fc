//! Shared types for dunesync
//!
//! This crate contains the data structures passed between the API client,
//! the sync engine, the snapshot store and the CLI.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// API Types
// ============================================================================

/// Identifies one fetch call against an execution's result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub execution_id: u64,
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    pub fn new(execution_id: u64, offset: u64, limit: u64) -> Self {
        Self {
            execution_id,
            offset,
            limit,
        }
    }
}

/// Error object embedded in an API response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Lifecycle state the API reports for an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    #[serde(rename = "QUERY_STATE_PENDING")]
    Pending,
    #[serde(rename = "QUERY_STATE_EXECUTING")]
    Executing,
    #[serde(rename = "QUERY_STATE_COMPLETED")]
    Completed,
    #[serde(rename = "QUERY_STATE_COMPLETED_PARTIAL")]
    CompletedPartial,
    #[serde(rename = "QUERY_STATE_FAILED")]
    Failed,
    #[serde(rename = "QUERY_STATE_CANCELLED")]
    Cancelled,
    #[serde(rename = "QUERY_STATE_EXPIRED")]
    Expired,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExecutionState {
    /// The execution has not produced results yet
    pub fn is_pending(&self) -> bool {
        matches!(self, ExecutionState::Pending | ExecutionState::Executing)
    }

    /// The execution ended without usable results
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ExecutionState::Failed | ExecutionState::Cancelled | ExecutionState::Expired
        )
    }
}

/// A result row exactly as the API returned it
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Row payload of an execution result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

/// Response body of `GET /query/{execution_id}/results`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResultsResponse {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub execution_started_at: Option<String>,
    #[serde(default)]
    pub execution_ended_at: Option<String>,
    /// Offset of the following page; absent on the last page
    #[serde(default)]
    pub next_offset: Option<u64>,
    #[serde(default)]
    pub result: Option<ResultSet>,
    #[serde(default)]
    pub state: ExecutionState,
}

/// One page of rows, produced by the client and consumed once by the engine
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub rows: Vec<RawRow>,
    pub state: ExecutionState,
    pub error: Option<ApiError>,
    pub next_offset: Option<u64>,
}

impl From<ExecutionResultsResponse> for PageResult {
    fn from(response: ExecutionResultsResponse) -> Self {
        Self {
            rows: response.result.map(|r| r.rows).unwrap_or_default(),
            state: response.state,
            error: response.error,
            next_offset: response.next_offset,
        }
    }
}

// ============================================================================
// Snapshot Types
// ============================================================================

/// A validated result row, ready to be upserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasRow {
    pub address: String,
    pub total_gas_used: BigDecimal,
}

/// A stored snapshot record, one per address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub address: String,
    pub total_gas_used: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

/// Durable pagination progress for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: u64,
    /// Offset of the last page whose rows were committed
    pub last_offset: u64,
    /// Offset a resumed run starts from
    pub next_offset: u64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Sync Types
// ============================================================================

/// Offset cursor walked by a single sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub offset: u64,
    pub limit: u64,
    /// Highest offset that may be fetched, inclusive: the page starting at
    /// `upper_bound` is still requested. Without one the API's next offset
    /// ends the walk.
    ///
    /// Deployments that stop the loop at `MAX_OFFSET - SYNC_LIMIT` treat that
    /// value as exclusive. Carrying such a constant over unchanged fetches one
    /// extra page; subtract one page size to keep the old range.
    pub upper_bound: Option<u64>,
    #[serde(default)]
    exhausted: bool,
}

impl SyncCursor {
    pub fn new(offset: u64, limit: u64, upper_bound: Option<u64>) -> Self {
        Self {
            offset,
            limit,
            upper_bound,
            exhausted: false,
        }
    }

    /// Whether the page at the current offset lies within the bound
    pub fn has_next(&self) -> bool {
        !self.exhausted && self.upper_bound.map_or(true, |bound| self.offset <= bound)
    }

    /// Move to the following page
    pub fn advance(&mut self) {
        match self.offset.checked_add(self.limit) {
            Some(next) => self.offset = next,
            None => self.exhausted = true,
        }
    }

    /// Move to an offset the API reported for the following page
    pub fn advance_to(&mut self, next_offset: u64) {
        self.offset = next_offset;
    }

    /// Build the fetch request for the current page
    pub fn request(&self, execution_id: u64) -> PageRequest {
        PageRequest::new(execution_id, self.offset, self.limit)
    }
}

/// State of a sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Summary of a finished sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub execution_id: u64,
    pub state: SyncState,
    pub first_offset: u64,
    /// Offset the walk stopped at (the next page that was not fetched)
    pub next_offset: u64,
    pub pages: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

// ============================================================================
// Settings Types
// ============================================================================

/// What to do with a row that fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRowPolicy {
    /// Fail the page before any of its rows is written
    #[default]
    Abort,
    /// Drop the row and keep going
    Skip,
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ClientSettings,
    pub sync: SyncSettings,
    pub store: StoreSettings,
}

/// API client settings, fixed when the client is built
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    /// Requests-per-minute ceiling; depends on the API subscription tier
    pub requests_per_minute: u32,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// How long an idle pooled connection is kept
    pub idle_connection_timeout_secs: u64,
    /// How long a resolved host address is reused
    pub dns_cache_ttl_secs: u64,
    pub content_type: String,
}

impl ClientSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }

    pub fn dns_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_cache_ttl_secs)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.dune.com/api/v1".to_string(),
            requests_per_minute: 15,
            read_timeout_secs: 300,
            write_timeout_secs: 3,
            request_timeout_secs: 300,
            idle_connection_timeout_secs: 3600,
            dns_cache_ttl_secs: 3600,
            content_type: "application/json".to_string(),
        }
    }
}

/// Run parameters for the pagination walk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub execution_id: Option<u64>,
    pub page_size: u64,
    pub start_offset: u64,
    /// Highest offset fetched, inclusive (see [`SyncCursor::upper_bound`]).
    /// A bound of 8000 with page size 2000 fetches offsets 0 through 8000,
    /// one page more than a loop that stops before `MAX_OFFSET - SYNC_LIMIT`.
    pub upper_bound: Option<u64>,
    /// Start from the stored checkpoint when one exists
    pub resume: bool,
    pub malformed_rows: MalformedRowPolicy,
    /// Maximum number of retries per page for retryable failures
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
}

impl SyncSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            execution_id: None,
            page_size: 2000,
            start_offset: 0,
            upper_bound: None,
            resume: true,
            malformed_rows: MalformedRowPolicy::Abort,
            max_retries: 5,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 60,
        }
    }
}

/// Snapshot store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub table: String,
    pub checkpoint_table: String,
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            table: "_dune_total_gas_used".to_string(),
            checkpoint_table: "_dune_sync_checkpoints".to_string(),
            max_connections: 4,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Progress events emitted by the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncEvent {
    /// The walk begins; `first_offset` already accounts for a resumed checkpoint
    Started {
        run_id: Uuid,
        first_offset: u64,
    },
    StateChanged {
        run_id: Uuid,
        state: SyncState,
        error: Option<String>,
    },
    PageCommitted {
        run_id: Uuid,
        offset: u64,
        rows_written: u64,
        rows_skipped: u64,
        next_offset: Option<u64>,
    },
    Retrying {
        run_id: Uuid,
        offset: u64,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    RowSkipped {
        run_id: Uuid,
        offset: u64,
        index: usize,
        reason: String,
    },
}
