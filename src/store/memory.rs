//! In-process store emulating the subset of Redis keylatch relies on.
//!
//! Keys expire on `tokio::time::Instant`, so tests running with paused time can
//! step over lease and bucket TTLs. Scripts are executed natively while the
//! single store mutex is held, which gives the same all-or-nothing behaviour
//! Redis gives a Lua script. Only the bodies in [`crate::scripts`] are known.
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{ScriptHash, ScriptReply, ScriptStore};
use crate::error::{KeylatchError, Result};
use crate::limiters::token_bucket::{BucketParams, BucketState};
use crate::scripts;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    scripts: HashMap<ScriptHash, String>,
    // earliest expiry among stored entries, if any
    next_expiry: Option<Instant>,
}

impl Inner {
    fn get(&mut self, key: &str, now: Instant) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set_ex(&mut self, key: &str, value: String, ttl: Duration, now: Instant) {
        self.sweep(now);
        let expires_at = now + ttl;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
        self.next_expiry = Some(self.next_expiry.map_or(expires_at, |at| at.min(expires_at)));
    }

    /// Drop every expired entry once the earliest expiry has passed
    fn sweep(&mut self, now: Instant) {
        if self.next_expiry.map_or(true, |at| at > now) {
            return;
        }
        self.entries.retain(|_, entry| entry.is_live(now));
        self.next_expiry = self
            .entries
            .values()
            .filter_map(|entry| entry.expires_at)
            .min();
    }
}

/// Shared in-memory `ScriptStore`; clones see the same data
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    available: Arc<AtomicBool>,
    evals: Arc<AtomicU64>,
    loads: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
            evals: Arc::new(AtomicU64::new(0)),
            loads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Forget every uploaded script, like `SCRIPT FLUSH` or a server restart
    pub fn flush_scripts(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.scripts.clear();
        }
    }

    /// Number of script evaluations that reached the store
    pub fn eval_count(&self) -> u64 {
        self.evals.load(Ordering::SeqCst)
    }

    /// Number of script uploads that reached the store
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Read a live value without going through a script
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().ok()?;
        inner.get(key, Instant::now())
    }

    /// Remaining time to live of a live key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock().ok()?;
        let now = Instant::now();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at - now)
    }

    /// Number of entries held, expired ones not yet swept included
    pub fn stored_keys(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.entries.len())
    }

    /// Overwrite a key, bypassing any script
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.set_ex(key, value.to_string(), ttl, Instant::now());
        }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, Inner>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(crate::store_error!("memory store is marked unavailable"));
        }
        self.inner
            .lock()
            .map_err(|e| crate::store_error!("memory store lock poisoned: {}", e))
    }
}

fn content_hash(body: &str) -> ScriptHash {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    ScriptHash::new(format!("{:016x}", hasher.finish()))
}

fn arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<T> {
    args.get(index)
        .and_then(|raw| raw.parse::<T>().ok())
        .ok_or_else(|| {
            crate::store_error!(
                "script argument {} ({}) is missing or malformed",
                index + 1,
                name
            )
        })
}

fn key<'a>(keys: &'a [String], index: usize) -> Result<&'a str> {
    keys.get(index)
        .map(String::as_str)
        .ok_or_else(|| crate::store_error!("script key {} is missing", index + 1))
}

fn run_unlock(
    inner: &mut Inner,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<ScriptReply> {
    let lock_key = key(keys, 0)?;
    let token: String = arg(args, 0, "fencing token")?;
    match inner.get(lock_key, now) {
        Some(current) if current == token => {
            inner.entries.remove(lock_key);
            Ok(ScriptReply::Integer(1))
        }
        _ => Ok(ScriptReply::Integer(0)),
    }
}

fn run_token_bucket(
    inner: &mut Inner,
    keys: &[String],
    args: &[String],
    now: Instant,
) -> Result<ScriptReply> {
    let tokens_key = key(keys, 0)?;
    let updated_key = key(keys, 1)?;
    let now_micros: i64 = arg(args, 0, "now")?;
    let capacity: u64 = arg(args, 1, "capacity")?;
    let ttl_seconds: u64 = arg(args, 2, "ttl")?;
    let requested: u64 = arg(args, 3, "requested")?;
    let interval_micros: u64 = arg(args, 4, "interval")?;
    let params = BucketParams {
        capacity,
        interval_micros,
    };

    let tokens = inner.get(tokens_key, now).and_then(|v| v.parse::<u64>().ok());
    let last = inner.get(updated_key, now).and_then(|v| v.parse::<i64>().ok());
    let mut bucket = BucketState::load(tokens, last, &params, now_micros);
    let granted = bucket.refill(&params, now_micros).take(requested);

    let ttl = Duration::from_secs(ttl_seconds);
    inner.set_ex(tokens_key, bucket.tokens.to_string(), ttl, now);
    inner.set_ex(updated_key, bucket.last_refill_micros.to_string(), ttl, now);

    let remaining = i64::try_from(bucket.tokens).unwrap_or(i64::MAX);
    Ok(ScriptReply::List(vec![
        ScriptReply::Integer(remaining),
        ScriptReply::Integer(i64::from(granted)),
    ]))
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock_inner()?;
        let now = Instant::now();
        if inner.get(key, now).is_some() {
            return Ok(false);
        }
        inner.set_ex(key, value.to_string(), ttl, now);
        Ok(true)
    }

    async fn script_load(&self, body: &str) -> Result<ScriptHash> {
        let mut inner = self.lock_inner()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        let hash = content_hash(body);
        inner.scripts.insert(hash.clone(), body.to_string());
        debug!(hash = %hash, "Loaded script into memory store");
        Ok(hash)
    }

    async fn eval_sha(
        &self,
        hash: &ScriptHash,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> Result<ScriptReply> {
        let mut inner = self.lock_inner()?;
        self.evals.fetch_add(1, Ordering::SeqCst);
        let body = inner.scripts.get(hash).cloned().ok_or_else(|| {
            KeylatchError::ScriptMissing(format!(
                "NOSCRIPT No matching script {}. Please use EVAL.",
                hash
            ))
        })?;
        let now = Instant::now();
        if body == scripts::UNLOCK {
            run_unlock(&mut inner, &keys, &args, now)
        } else if body == scripts::TOKEN_BUCKET {
            run_token_bucket(&mut inner, &keys, &args, now)
        } else {
            Err(crate::store_error!("memory store cannot execute script {}", hash))
        }
    }
}
