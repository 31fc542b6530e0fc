//! dunesync core - paginated snapshot sync
//!
//! This crate fetches the result pages of a Dune query execution through a
//! rate-limited HTTP client and upserts every row into a Postgres snapshot
//! table, one transaction per page.

pub mod client;
pub mod config;
pub mod engine;
mod error;
pub mod store;

pub use client::{DuneClient, PageSource};
pub use config::{load_settings, save_settings, validate_settings};
pub use engine::{RetryPolicy, SyncTask};
pub use error::*;
pub use store::{MemoryStore, PgSnapshotStore, SnapshotStore};

use dunesync_types::{Settings, SyncEvent, SyncReport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The main dunesync instance
#[derive(Clone)]
pub struct DuneSync {
    settings: Settings,
    execution_id: u64,
    /// Where pages come from
    source: Arc<dyn PageSource>,
    /// Where the snapshot goes
    store: Arc<dyn SnapshotStore>,
    /// Event broadcaster
    event_tx: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl DuneSync {
    /// Connect to the Dune API and the snapshot database
    pub async fn connect(
        settings: Settings,
        api_key: &str,
        database_url: &str,
    ) -> Result<Self, SyncError> {
        validate_settings(&settings)?;

        let store = PgSnapshotStore::connect(database_url, &settings.store).await?;
        store.ensure_schema().await?;
        info!("Snapshot store ready (table {})", settings.store.table);

        Self::with_client(settings, api_key, Arc::new(store))
    }

    /// Fetch from the Dune API but keep the snapshot in memory
    pub fn dry_run(settings: Settings, api_key: &str) -> Result<(Self, MemoryStore), SyncError> {
        let store = MemoryStore::new();
        let sync = Self::with_client(settings, api_key, Arc::new(store.clone()))?;
        Ok((sync, store))
    }

    /// Connect to the snapshot database only, for checkpoint maintenance
    pub async fn connect_store(settings: &Settings, database_url: &str) -> Result<PgSnapshotStore, SyncError> {
        let store = PgSnapshotStore::connect(database_url, &settings.store).await?;
        store.ensure_schema().await?;
        Ok(store)
    }

    fn with_client(
        settings: Settings,
        api_key: &str,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, SyncError> {
        let cancel = CancellationToken::new();
        let client = DuneClient::new(&settings.client, api_key)?.with_cancellation(cancel.clone());
        Self::with_parts(settings, Arc::new(client), store, cancel)
    }

    /// Build an instance from an existing source and store
    pub fn with_parts(
        settings: Settings,
        source: Arc<dyn PageSource>,
        store: Arc<dyn SnapshotStore>,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let execution_id = validate_settings(&settings)?;
        let (event_tx, _) = broadcast::channel(1000);

        Ok(Self {
            settings,
            execution_id,
            source,
            store,
            event_tx,
            cancel,
        })
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Token that stops a running sync and any pending permit wait
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request the running sync to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    // ========================================================================
    // Sync Operations
    // ========================================================================

    /// Run one sync of the configured execution
    pub async fn run_sync(&self) -> Result<SyncReport, SyncError> {
        let task = SyncTask::new(
            self.execution_id,
            self.settings.sync.clone(),
            self.source.clone(),
            self.store.clone(),
            self.event_tx.clone(),
            self.cancel.clone(),
        );
        task.run().await
    }
}
