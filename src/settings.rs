//! keylatch settings
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::Result;
use crate::limiters::token_bucket::BucketParams;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_LOCK_KEY: &str = "DISTRIBUTED_LOCK_KEY";
pub const DEFAULT_LOCK_SCRIPT_RELOAD_SECONDS: u64 = 10;
pub const DEFAULT_LIMITER_SCRIPT_RELOAD_SECONDS: u64 = 600;
pub const MICROS_PER_SECOND: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreSettings {
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl StoreSettings {
    /// The url with any password replaced, for logging
    pub fn redacted_url(&self) -> String {
        match (self.redis_url.find("://"), self.redis_url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => format!(
                "{}://***@{}",
                &self.redis_url[..scheme_end],
                &self.redis_url[at + 1..]
            ),
            _ => self.redis_url.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LockSettings {
    // Store key holding the fencing token
    pub lock_key: String,
    // Lease length; must outlast the longest critical section
    pub lease_ms: u64,
    // How often the unlock script is re-uploaded
    pub script_reload_seconds: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lease_ms: 10_000,
            script_reload_seconds: DEFAULT_LOCK_SCRIPT_RELOAD_SECONDS,
        }
    }
}

impl LockSettings {
    pub fn new(lock_key: impl Into<String>, lease: Duration) -> Self {
        Self {
            lock_key: lock_key.into(),
            lease_ms: lease.as_millis().try_into().unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn script_reload_interval(&self) -> Duration {
        Duration::from_secs(self.script_reload_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_key.is_empty() {
            return Err(config_error!("lock_key must not be empty"));
        }
        if self.lease_ms == 0 {
            return Err(config_error!("lease_ms must be greater than zero"));
        }
        if self.script_reload_seconds == 0 {
            return Err(config_error!(
                "script_reload_seconds must be greater than zero"
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimiterSettings {
    // Resource this bucket meters; prefix of both bucket keys
    pub unique_key: String,
    // Max tokens the bucket holds
    pub capacity: u64,
    // Tokens generated per second
    pub tokens_per_second: u64,
    // Expiry of idle buckets; defaults to twice the time to fill from empty
    pub ttl_seconds: Option<u64>,
    // How often the bucket script is re-uploaded
    pub script_reload_seconds: Option<u64>,
    // Tag every key so a sharded store keeps them on one slot
    pub cluster_mode: bool,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            unique_key: String::new(),
            capacity: 1000,
            tokens_per_second: 100,
            ttl_seconds: None,
            script_reload_seconds: None,
            cluster_mode: false,
        }
    }
}

impl LimiterSettings {
    pub fn new(unique_key: impl Into<String>, capacity: u64, tokens_per_second: u64) -> Self {
        Self {
            unique_key: unique_key.into(),
            capacity,
            tokens_per_second,
            ..Self::default()
        }
    }

    /// Microseconds it takes to generate a single token
    pub fn token_interval_micros(&self) -> u64 {
        MICROS_PER_SECOND / self.tokens_per_second.max(1)
    }

    pub fn bucket_params(&self) -> BucketParams {
        BucketParams {
            capacity: self.capacity,
            interval_micros: self.token_interval_micros(),
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds.unwrap_or_else(|| {
            let fill_seconds = self.capacity.div_ceil(self.tokens_per_second.max(1));
            fill_seconds.saturating_mul(2).max(1)
        })
    }

    pub fn script_reload_interval(&self) -> Duration {
        Duration::from_secs(
            self.script_reload_seconds
                .unwrap_or(DEFAULT_LIMITER_SCRIPT_RELOAD_SECONDS),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.unique_key.is_empty() {
            return Err(config_error!("unique_key must not be empty"));
        }
        if self.capacity == 0 {
            return Err(config_error!("capacity must be greater than zero"));
        }
        if self.tokens_per_second == 0 {
            return Err(config_error!("tokens_per_second must be greater than zero"));
        }
        if self.tokens_per_second > MICROS_PER_SECOND {
            return Err(config_error!(
                "tokens_per_second must be at most {}",
                MICROS_PER_SECOND
            ));
        }
        // the resource key becomes the hash tag, which must not nest braces
        if self.cluster_mode && self.unique_key.contains(['{', '}']) {
            return Err(config_error!(
                "unique_key must not contain '{{' or '}}' in cluster mode"
            ));
        }
        if self.ttl_seconds == Some(0) {
            return Err(config_error!("ttl_seconds must be greater than zero"));
        }
        if self.script_reload_seconds == Some(0) {
            return Err(config_error!(
                "script_reload_seconds must be greater than zero"
            ));
        }
        Ok(())
    }
}
