//! Fixed-window request rate limiting
//!
//! Counters live in an injected TTL cache; the window boundary is the
//! cache entry's deadline, so the first request in a window starts it.

use std::time::Duration;

use yiba_common::cache::TtlCache;
use yiba_common::{Error, Result};

pub struct RateLimiter {
    limit: u32,
    windows: TtlCache<String, u32>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            windows: TtlCache::new(window),
        }
    }

    /// Count one request for `key`; `RateLimited` once the window is full
    pub fn check(&self, key: &str) -> Result<()> {
        let count = self
            .windows
            .update(key.to_string(), |v| v.copied().unwrap_or(0) + 1);
        if count > self.limit {
            Err(Error::RateLimited)
        } else {
            Ok(())
        }
    }
}
