//! Token-bucket rate limiting over a shared [`Cache`](crate::cache::Cache).
//!
//! Each identifier owns a bucket of `max_attempts` tokens. An attempt spends one
//! token; tokens come back linearly over `decay_minutes`, and the whole bucket is
//! refilled once a full window has passed since the last refill.
//!
//! Buckets live in the cache, so several processes sharing a [`FileCache`]
//! share limits. The read-refill-write sequence is not atomic: two concurrent
//! attempts for the same identifier can both spend the same token.
//!
//! [`FileCache`]: crate::cache::FileCache

mod strategy;
mod token_bucket;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;

pub use strategy::{
    ApiKeyStrategy, CompositeStrategy, IdentifierStrategy, IpStrategy, UserId, UserStrategy,
};
pub use token_bucket::TokenBucketLimiter;

/// Bucket size and refill window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub decay_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            decay_minutes: 1,
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_attempts: u32, decay_minutes: u32) -> Self {
        Self {
            max_attempts,
            decay_minutes,
        }
    }

    pub fn decay_seconds(&self) -> u64 {
        u64::from(self.decay_minutes) * 60
    }
}

/// Point-in-time view of one identifier's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub identifier: String,
    pub max_attempts: u32,
    pub remaining_attempts: u32,
    /// Seconds until the bucket is full again; `0` when it already is.
    pub reset_time: u64,
    pub decay_minutes: u32,
    /// Unix seconds of the last refill.
    pub last_refill: u64,
}

/// A limiter keyed by an arbitrary identifier string.
///
/// Denial is an ordinary `Ok(false)`; errors only come from the backing cache.
pub trait RateLimiter: Send + Sync {
    /// Spends one token if one is available.
    fn attempt(&self, identifier: &str) -> Result<bool, CacheError>;

    /// Whether an attempt would currently succeed. Spends nothing.
    fn is_allowed(&self, identifier: &str) -> Result<bool, CacheError>;

    fn remaining_attempts(&self, identifier: &str) -> Result<u32, CacheError>;

    /// Seconds until the bucket is full again.
    fn reset_time(&self, identifier: &str) -> Result<u64, CacheError>;

    /// Forgets the identifier; its next attempt sees a full bucket.
    fn reset(&self, identifier: &str) -> Result<(), CacheError>;

    fn info(&self, identifier: &str) -> Result<RateLimitInfo, CacheError>;
}

/// A denied attempt, carrying the bucket state for the client.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded for `{}`", .info.identifier)]
pub struct RateLimitExceeded {
    info: RateLimitInfo,
}

impl RateLimitExceeded {
    pub fn new(info: RateLimitInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Seconds the client should wait before retrying.
    pub fn retry_after(&self) -> u64 {
        self.info.reset_time
    }

    /// Message suitable for showing to the client.
    pub fn user_message(&self) -> String {
        match self.info.reset_time {
            0 => "Too many requests. Please try again later.".to_owned(),
            secs => format!("Too many requests. Please try again in {secs} seconds."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(reset_time: u64) -> RateLimitInfo {
        RateLimitInfo {
            identifier: "ip:10.0.0.1".into(),
            max_attempts: 5,
            remaining_attempts: 0,
            reset_time,
            decay_minutes: 1,
            last_refill: 1_000,
        }
    }

    #[test]
    fn defaults_are_sixty_per_minute() {
        let config = RateLimitConfig::default();
        assert_eq!(config, RateLimitConfig::new(60, 1));
        assert_eq!(config.decay_seconds(), 60);
    }

    #[test]
    fn config_fields_default_individually() {
        let config: RateLimitConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config, RateLimitConfig::new(5, 1));
    }

    #[test]
    fn exceeded_messages() {
        assert_eq!(
            RateLimitExceeded::new(info(42)).user_message(),
            "Too many requests. Please try again in 42 seconds."
        );
        assert_eq!(
            RateLimitExceeded::new(info(0)).user_message(),
            "Too many requests. Please try again later."
        );
        assert_eq!(
            RateLimitExceeded::new(info(42)).to_string(),
            "rate limit exceeded for `ip:10.0.0.1`"
        );
    }

    #[test]
    fn info_serializes_with_snake_case_fields() {
        let value = serde_json::to_value(info(12)).unwrap();
        assert_eq!(value["remaining_attempts"], 0);
        assert_eq!(value["reset_time"], 12);
        assert_eq!(value["last_refill"], 1_000);
    }
}
