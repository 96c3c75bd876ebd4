use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{RateLimitConfig, RateLimitInfo, RateLimiter};
use crate::cache::{Cache, CacheError, CacheExt};
use crate::clock::{self, Clock};

const KEY_PREFIX: &str = "rate_limit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Bucket {
    tokens: u32,
    last_refill: u64,
}

/// [`RateLimiter`] storing one bucket per identifier in a [`Cache`].
///
/// Refill is linear and integer: after `elapsed` seconds,
/// `elapsed * max_attempts / decay_seconds` whole tokens are added (at most up
/// to `max_attempts`). While that rounds down to zero the refill clock does not
/// move, so slow trickles of time still add up to whole tokens. A full window
/// since the last refill restores the whole bucket.
pub struct TokenBucketLimiter {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self {
            cache,
            config,
            clock: clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Cache key for `identifier`: the prefix plus a SHA-256 hex digest, so
    /// arbitrary identifiers become fixed-length, file-name-safe keys.
    pub fn cache_key(identifier: &str) -> String {
        format!("{KEY_PREFIX}{:x}", Sha256::digest(identifier.as_bytes()))
    }

    fn load(&self, identifier: &str, now: u64) -> Result<Bucket, CacheError> {
        Ok(match self.cache.get_as::<Bucket>(&Self::cache_key(identifier))? {
            Some(bucket) => self.refill(bucket, now),
            None => Bucket {
                tokens: self.config.max_attempts,
                last_refill: now,
            },
        })
    }

    fn store(&self, identifier: &str, bucket: &Bucket) -> Result<(), CacheError> {
        // Outlive the window so a partially drained bucket is not forgotten early.
        let ttl = Duration::from_secs(self.config.decay_seconds() + 60);
        self.cache
            .set_as(&Self::cache_key(identifier), bucket, Some(ttl))
    }

    fn refill(&self, bucket: Bucket, now: u64) -> Bucket {
        let max = self.config.max_attempts;
        let decay = self.config.decay_seconds();
        let elapsed = now.saturating_sub(bucket.last_refill);

        if elapsed >= decay {
            return Bucket {
                tokens: max,
                last_refill: now,
            };
        }

        // Widened so large limits and windows cannot overflow.
        let earned = u128::from(elapsed) * u128::from(max) / u128::from(decay);
        if earned == 0 {
            return bucket;
        }
        let tokens = (u128::from(bucket.tokens) + earned).min(u128::from(max));
        Bucket {
            tokens: u32::try_from(tokens).unwrap_or(max),
            last_refill: now,
        }
    }

    fn reset_time_of(&self, bucket: &Bucket, now: u64) -> u64 {
        if bucket.tokens >= self.config.max_attempts {
            return 0;
        }
        let elapsed = now.saturating_sub(bucket.last_refill);
        self.config.decay_seconds().saturating_sub(elapsed)
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn attempt(&self, identifier: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        let mut bucket = self.load(identifier, now)?;

        if bucket.tokens == 0 {
            self.store(identifier, &bucket)?;
            debug!(
                identifier,
                max_attempts = self.config.max_attempts,
                decay_minutes = self.config.decay_minutes,
                "rate limit exceeded"
            );
            return Ok(false);
        }

        bucket.tokens -= 1;
        self.store(identifier, &bucket)?;
        debug!(identifier, remaining = bucket.tokens, "rate limit attempt");
        Ok(true)
    }

    fn is_allowed(&self, identifier: &str) -> Result<bool, CacheError> {
        Ok(self.load(identifier, self.clock.now())?.tokens > 0)
    }

    fn remaining_attempts(&self, identifier: &str) -> Result<u32, CacheError> {
        Ok(self.load(identifier, self.clock.now())?.tokens)
    }

    fn reset_time(&self, identifier: &str) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let bucket = self.load(identifier, now)?;
        Ok(self.reset_time_of(&bucket, now))
    }

    fn reset(&self, identifier: &str) -> Result<(), CacheError> {
        self.cache.delete(&Self::cache_key(identifier))?;
        info!(identifier, "rate limit reset");
        Ok(())
    }

    fn info(&self, identifier: &str) -> Result<RateLimitInfo, CacheError> {
        let now = self.clock.now();
        let bucket = self.load(identifier, now)?;
        Ok(RateLimitInfo {
            identifier: identifier.to_owned(),
            max_attempts: self.config.max_attempts,
            remaining_attempts: bucket.tokens,
            reset_time: self.reset_time_of(&bucket, now),
            decay_minutes: self.config.decay_minutes,
            last_refill: bucket.last_refill,
        })
    }
}
