//! In-memory snapshot store, used for dry runs

use crate::error::SyncError;
use crate::store::{PageCommit, SnapshotStore};
use async_trait::async_trait;
use chrono::Utc;
use dunesync_types::{Checkpoint, SnapshotRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot store that keeps everything in process memory
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, SnapshotRecord>,
    checkpoints: HashMap<u64, Checkpoint>,
    pages_committed: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record for an address
    pub fn record(&self, address: &str) -> Option<SnapshotRecord> {
        self.state.lock().records.get(address).cloned()
    }

    /// All records, sorted by address
    pub fn records(&self) -> Vec<SnapshotRecord> {
        let mut records: Vec<_> = self.state.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// Number of distinct addresses stored
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pages committed so far
    pub fn pages_committed(&self) -> u64 {
        self.state.lock().pages_committed
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn commit_page(&self, page: PageCommit<'_>) -> Result<(), SyncError> {
        let now = Utc::now();
        let mut state = self.state.lock();

        for row in page.rows {
            state.records.insert(
                row.address.clone(),
                SnapshotRecord {
                    address: row.address.clone(),
                    total_gas_used: row.total_gas_used.clone(),
                    updated_at: now,
                },
            );
        }

        state.checkpoints.insert(
            page.execution_id,
            Checkpoint {
                execution_id: page.execution_id,
                last_offset: page.offset,
                next_offset: page.next_offset,
                updated_at: now,
            },
        );
        state.pages_committed += 1;

        Ok(())
    }

    async fn load_checkpoint(&self, execution_id: u64) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self.state.lock().checkpoints.get(&execution_id).cloned())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, SyncError> {
        let mut checkpoints: Vec<_> = self.state.lock().checkpoints.values().cloned().collect();
        checkpoints.sort_by_key(|c| c.execution_id);
        Ok(checkpoints)
    }

    async fn clear_checkpoint(&self, execution_id: u64) -> Result<bool, SyncError> {
        Ok(self.state.lock().checkpoints.remove(&execution_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use dunesync_types::GasRow;
    use std::str::FromStr;

    fn row(address: &str, gas: &str) -> GasRow {
        GasRow {
            address: address.to_string(),
            total_gas_used: BigDecimal::from_str(gas).unwrap(),
        }
    }

    fn commit(rows: &[GasRow], offset: u64) -> PageCommit<'_> {
        PageCommit {
            execution_id: 7,
            offset,
            next_offset: offset + 2,
            rows,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let rows = vec![row("0xa", "100"), row("0xb", "200")];

        store.commit_page(commit(&rows, 0)).await.unwrap();
        let first: Vec<_> = store
            .records()
            .into_iter()
            .map(|r| (r.address, r.total_gas_used))
            .collect();

        store.commit_page(commit(&rows, 0)).await.unwrap();
        let second: Vec<_> = store
            .records()
            .into_iter()
            .map(|r| (r.address, r.total_gas_used))
            .collect();

        assert_eq!(first, second);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_address_within_page_last_wins() {
        let store = MemoryStore::new();
        let rows = vec![row("0xa", "1"), row("0xa", "2")];

        store.commit_page(commit(&rows, 0)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.record("0xa").unwrap().total_gas_used,
            BigDecimal::from_str("2").unwrap()
        );
    }

    #[tokio::test]
    async fn test_checkpoint_tracks_latest_page() {
        let store = MemoryStore::new();
        store.commit_page(commit(&[row("0xa", "1")], 0)).await.unwrap();
        store.commit_page(commit(&[], 2)).await.unwrap();

        let checkpoint = store.load_checkpoint(7).await.unwrap().unwrap();
        assert_eq!(checkpoint.last_offset, 2);
        assert_eq!(checkpoint.next_offset, 4);
        assert_eq!(store.pages_committed(), 2);

        assert!(store.clear_checkpoint(7).await.unwrap());
        assert!(!store.clear_checkpoint(7).await.unwrap());
        assert!(store.list_checkpoints().await.unwrap().is_empty());
    }
}
