//! Token bucket rate limiter for API requests
//!
//! The bucket holds a single token and refills one token every
//! `60s / requests_per_minute`. Every acquisition reserves the next release
//! slot under the lock, so callers sharing one limiter are released strictly
//! one interval apart no matter how many of them wait concurrently.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Request rate limiter shared by every fetch issued through one client
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Time between two released permits
    interval: Duration,
    /// Earliest instant the next permit may be released; `None` while the
    /// bucket is full
    next_release: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` permits per minute
    pub fn per_minute(requests_per_minute: NonZeroU32) -> Self {
        Self {
            interval: Duration::from_secs(60) / requests_per_minute.get(),
            next_release: Arc::new(Mutex::new(None)), // Start with full bucket
        }
    }

    /// Wait until a permit is available and consume it
    pub async fn acquire(&self) {
        let release_at = {
            let mut next_release = self.next_release.lock().await;

            let now = Instant::now();
            let release_at = match *next_release {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_release = Some(release_at + self.interval);
            release_at
        };

        // Sleep outside the lock so later callers can reserve their slots
        tokio::time::sleep_until(release_at).await;
    }
}
