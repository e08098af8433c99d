//! Per-API rate limiting built on governor.
//!
//! Each external API (transaction fetch, risk service, Telegram) gets its own
//! owned limiter, injected into the component that calls it. Workers await a
//! token instead of failing when the budget is exhausted.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

/// Async rate limiter bounding calls per second to one external API.
pub struct ApiRateLimiter {
    limiter: DefaultDirectRateLimiter,
    name: &'static str,
    quota_per_second: u32,
}

impl ApiRateLimiter {
    /// Create a limiter allowing `requests_per_second` calls. A zero quota is
    /// clamped to one request per second.
    pub fn new(name: &'static str, requests_per_second: u32) -> Self {
        let quota = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(quota)),
            name,
            quota_per_second: quota.get(),
        }
    }

    /// Wait until a call is allowed, consuming one token.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
        debug!(api = self.name, "rate limit token acquired");
    }

    /// The configured quota, for logging and tests.
    pub fn quota_per_second(&self) -> u32 {
        self.quota_per_second
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("name", &self.name)
            .field("quota_per_second", &self.quota_per_second)
            .finish()
    }
}
