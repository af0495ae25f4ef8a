//! Script handle cache with periodic re-upload.
//!
//! A registry owns one script body and the handle the store returned for it.
//! The first evaluation uploads the body. A background [`RefreshTask`] then
//! re-uploads it on a fixed interval whether or not the store still has it,
//! so an evicted script cache or a restarted server heals without the request
//! path ever asking the store what it knows. A request that still races into a
//! missing script gets `ScriptMissing` back; the cached handle is dropped so the
//! next request uploads again.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::{KeylatchError, Result};
use crate::store::{ScriptHash, ScriptReply, ScriptStore};

#[derive(Clone)]
pub struct ScriptRegistry {
    name: &'static str,
    body: &'static str,
    store: Arc<dyn ScriptStore>,
    handle: Arc<RwLock<Option<ScriptHash>>>,
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("name", &self.name)
            .finish()
    }
}

impl ScriptRegistry {
    pub fn new(name: &'static str, body: &'static str, store: Arc<dyn ScriptStore>) -> Self {
        Self {
            name,
            body,
            store,
            handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Cached handle, uploading the body on first use
    pub async fn handle(&self) -> Result<ScriptHash> {
        if let Some(hash) = self.handle.read().await.clone() {
            return Ok(hash);
        }
        self.refresh().await
    }

    /// Upload the body unconditionally and cache the returned handle
    pub async fn refresh(&self) -> Result<ScriptHash> {
        let hash = self.store.script_load(self.body).await?;
        debug!(script = self.name, hash = %hash, "Uploaded script");
        *self.handle.write().await = Some(hash.clone());
        Ok(hash)
    }

    /// The handle currently cached, without touching the store
    pub async fn cached(&self) -> Option<ScriptHash> {
        self.handle.read().await.clone()
    }

    /// Evaluate the script. One round trip once a handle is cached; never retried.
    pub async fn eval(&self, keys: Vec<String>, args: Vec<String>) -> Result<ScriptReply> {
        let hash = self.handle().await?;
        match self.store.eval_sha(&hash, keys, args).await {
            Err(err @ KeylatchError::ScriptMissing(_)) => {
                warn!(script = self.name, hash = %hash, "Store lost script, dropping cached handle");
                let mut cached = self.handle.write().await;
                // a refresh may already have replaced it
                if cached.as_ref() == Some(&hash) {
                    *cached = None;
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Start re-uploading the body every `interval` until the returned task is dropped
    pub fn spawn_refresh(&self, interval: Duration) -> RefreshTask {
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately; first use uploads anyway
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = registry.refresh().await {
                    warn!(script = registry.name, error = %err, "Script refresh failed");
                }
            }
        });
        RefreshTask { handle }
    }
}

/// Background re-upload loop; aborted when dropped
#[derive(Debug)]
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
