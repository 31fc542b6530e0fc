//! Sync Engine - pagination, decoding and retries
//!
//! This module drives a sync run:
//! - Offset cursor walk with an optional inclusive upper bound
//! - Per-page retry with exponential backoff for transient failures
//! - Row validation before anything is written
//! - Checkpointed progress so an aborted run can resume

mod decoder;
mod retry;
mod sync_task;

pub use decoder::*;
pub use retry::*;
pub use sync_task::*;
