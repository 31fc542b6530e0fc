//! DNS resolver that keeps resolved addresses for a fixed time
//!
//! The API host is resolved once and reused for the configured TTL instead
//! of hitting the system resolver for every new pooled connection. Expired
//! entries are evicted by the cache itself.

use moka::future::Cache;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Hosts a client ever talks to; one in practice
const MAX_CACHED_HOSTS: u64 = 64;

/// Caching resolver plugged into the reqwest client
#[derive(Clone)]
pub struct CachingResolver {
    cache: Cache<String, Vec<SocketAddr>>,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_CACHED_HOSTS)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_host(self.cache.clone(), name.as_str().to_string()))
    }
}

async fn resolve_host(
    cache: Cache<String, Vec<SocketAddr>>,
    host: String,
) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(addrs) = cache.get(&host).await {
        return Ok(Box::new(addrs.into_iter()));
    }

    // Port is replaced by the connector
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .collect();
    if addrs.is_empty() {
        return Err(format!("no addresses found for {}", host).into());
    }

    debug!("Resolved {} to {} address(es)", host, addrs.len());
    cache.insert(host, addrs.clone()).await;

    Ok(Box::new(addrs.into_iter()))
}
