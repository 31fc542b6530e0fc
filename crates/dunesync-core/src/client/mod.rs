//! Rate-limited API client
//!
//! - Token bucket limiter serializing every request through one gate
//! - Pooled HTTP transport with a caching DNS resolver
//! - Classified transport failures

mod classify;
mod dune;
mod rate_limiter;
mod resolver;

pub use classify::*;
pub use dune::*;
pub use rate_limiter::*;
pub use resolver::*;

use crate::error::SyncError;
use async_trait::async_trait;
use dunesync_types::{PageRequest, PageResult};

/// Anything that can hand the engine a page of execution results
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the rows at `request.offset`, at most `request.limit` of them
    async fn fetch_page(&self, request: PageRequest) -> Result<PageResult, SyncError>;
}
