//! Snapshot storage
//!
//! One record per address plus a checkpoint per execution. A page's upserts
//! and its checkpoint are committed together.

mod memory;
mod postgres;

pub use memory::*;
pub use postgres::*;

use crate::error::SyncError;
use async_trait::async_trait;
use dunesync_types::{Checkpoint, GasRow};

/// Writes produced by one fetched page
#[derive(Debug, Clone, Copy)]
pub struct PageCommit<'a> {
    pub execution_id: u64,
    pub offset: u64,
    /// Offset a resumed run should start from once this page is durable
    pub next_offset: u64,
    /// Rows in the order received; later rows win on duplicate addresses
    pub rows: &'a [GasRow],
}

/// Destination of the synced snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upsert every row of the page and record the checkpoint atomically
    async fn commit_page(&self, page: PageCommit<'_>) -> Result<(), SyncError>;

    /// Load the checkpoint stored for an execution
    async fn load_checkpoint(&self, execution_id: u64) -> Result<Option<Checkpoint>, SyncError>;

    /// Load all stored checkpoints
    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, SyncError>;

    /// Remove the checkpoint of an execution; returns whether one existed
    async fn clear_checkpoint(&self, execution_id: u64) -> Result<bool, SyncError>;
}
