use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keylatch::cli::{self, Command, LimitArgs, LockArgs};
use keylatch::limiters::RateLimiter;
use keylatch::lock::{Fingerprint, LockManager};
use keylatch::store::{MemoryStore, RedisStore, ScriptStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args and env vars
    let args = cli::Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keylatch=info".into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let store: Arc<dyn ScriptStore> = if args.memory {
        info!("Using in-process memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(RedisStore::connect(&args.store_settings()).await?)
    };

    match &args.command {
        Command::Lock(lock_args) => run_lock(store, lock_args).await,
        Command::Limit(limit_args) => run_limit(store, limit_args).await,
    }
}

async fn run_lock(store: Arc<dyn ScriptStore>, args: &LockArgs) -> anyhow::Result<()> {
    let lock = LockManager::new(store, args.to_settings(), Fingerprint::process_wide()).await?;
    let deadline = Instant::now() + Duration::from_millis(args.wait_ms);

    let mut acquired = lock.try_acquire().await?;
    while !acquired && Instant::now() < deadline {
        sleep(Duration::from_millis(args.poll_ms)).await;
        acquired = lock.try_acquire().await?;
    }
    println!(
        "{}",
        json!({ "lock_key": lock.lock_key(), "fingerprint": lock.fingerprint(), "acquired": acquired })
    );
    if !acquired {
        return Ok(());
    }

    info!(lock_key = lock.lock_key(), hold_ms = args.hold_ms, "Holding lock");
    sleep(Duration::from_millis(args.hold_ms)).await;

    let released = lock.try_release().await?;
    println!(
        "{}",
        json!({ "lock_key": lock.lock_key(), "released": released })
    );
    Ok(())
}

async fn run_limit(store: Arc<dyn ScriptStore>, args: &LimitArgs) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(store, args.to_settings()).await?;
    for attempt in 0..args.repeat {
        if attempt > 0 && args.interval_ms > 0 {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
        let grant = limiter.request_tokens(args.count).await?;
        println!("{}", serde_json::to_string(&grant)?);
    }
    Ok(())
}
