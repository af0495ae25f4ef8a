//! CLI for this application
//!
use clap::{Args, Subcommand};

use crate::settings::{self, LimiterSettings, LockSettings, StoreSettings};

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Store connection url
    #[clap(
        long,
        default_value = settings::DEFAULT_REDIS_URL,
        env("KEYLATCH_REDIS_URL"),
        help = "Redis url, e.g. redis://:password@host:6379/0"
    )]
    pub redis_url: String,

    // Skip redis and use a store living inside this process
    #[clap(
        long,
        env("KEYLATCH_MEMORY_STORE"),
        help = "Use an in-process store instead of Redis (single process only)"
    )]
    pub memory: bool,

    // Log format
    #[clap(long, env("KEYLATCH_LOG_JSON"), help = "Emit logs as JSON")]
    pub log_json: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Take the distributed lock, hold it, then release it
    Lock(LockArgs),
    /// Request tokens from a rate-limited resource
    Limit(LimitArgs),
}

#[derive(Clone, Debug, Args)]
pub struct LockArgs {
    // Lock key
    #[clap(
        long,
        default_value = settings::DEFAULT_LOCK_KEY,
        env("KEYLATCH_LOCK_KEY"),
        help = "Store key of the lock"
    )]
    pub key: String,

    // Lease duration
    #[clap(
        long,
        default_value = "10000",
        env("KEYLATCH_LOCK_LEASE_MS"),
        help = "Lease in milliseconds; must outlast the hold"
    )]
    pub lease_ms: u64,

    // How long to keep the lock once acquired
    #[clap(
        long,
        default_value = "1000",
        help = "Milliseconds to hold the lock before releasing"
    )]
    pub hold_ms: u64,

    // Poll for the lock instead of giving up after one attempt
    #[clap(
        long,
        default_value = "0",
        help = "Keep polling for up to this many milliseconds"
    )]
    pub wait_ms: u64,

    #[clap(long, default_value = "100", help = "Milliseconds between polls")]
    pub poll_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct LimitArgs {
    // Rate-limited resource
    #[clap(long, env("KEYLATCH_LIMIT_KEY"), help = "Unique key of the resource")]
    pub key: String,

    // Bucket size
    #[clap(
        long,
        default_value = "1000",
        env("KEYLATCH_LIMIT_CAPACITY"),
        help = "Max tokens the bucket holds"
    )]
    pub capacity: u64,

    // Refill rate
    #[clap(
        long,
        default_value = "100",
        env("KEYLATCH_LIMIT_RATE"),
        help = "Tokens generated per second"
    )]
    pub rate: u64,

    #[clap(long, env("KEYLATCH_LIMIT_TTL_SECONDS"), help = "Idle bucket expiry")]
    pub ttl_seconds: Option<u64>,

    #[clap(
        long,
        env("KEYLATCH_LIMIT_CLUSTER_MODE"),
        help = "Tag keys for a sharded store"
    )]
    pub cluster_mode: bool,

    #[clap(long, default_value = "1", help = "Tokens per request")]
    pub count: u64,

    #[clap(long, default_value = "1", help = "Number of requests to send")]
    pub repeat: u32,

    #[clap(long, default_value = "0", help = "Milliseconds between requests")]
    pub interval_ms: u64,
}

impl Cli {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            redis_url: self.redis_url.clone(),
        }
    }
}

impl LockArgs {
    pub fn to_settings(&self) -> LockSettings {
        LockSettings {
            lock_key: self.key.clone(),
            lease_ms: self.lease_ms,
            ..LockSettings::default()
        }
    }
}

impl LimitArgs {
    pub fn to_settings(&self) -> LimiterSettings {
        LimiterSettings {
            unique_key: self.key.clone(),
            capacity: self.capacity,
            tokens_per_second: self.rate,
            ttl_seconds: self.ttl_seconds,
            script_reload_seconds: None,
            cluster_mode: self.cluster_mode,
        }
    }
}
