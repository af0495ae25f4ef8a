//! Token bucket rate limiter evaluated inside the store.
//!
//! The whole read, refill, decide, write sequence is one script run, so
//! concurrent callers on the same bucket (threads or separate processes) never
//! interleave. Callers stamp each request with their own wall clock; clients
//! sharing a bucket are assumed to have roughly synchronised clocks.
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::keys::{AffinityTag, BucketKeys};
use crate::error::{KeylatchError, Result};
use crate::reply_error;
use crate::script_registry::{RefreshTask, ScriptRegistry};
use crate::scripts;
use crate::settings::LimiterSettings;
use crate::store::{ScriptReply, ScriptStore};

/// Outcome of one token request.
/// `granted == false` is the normal "quota exceeded" answer, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenGrant {
    pub remaining: u64,
    pub granted: bool,
}

pub struct RateLimiter {
    settings: LimiterSettings,
    keys: BucketKeys,
    script: ScriptRegistry,
    _refresh: RefreshTask,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .field("keys", &self.keys)
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter and start re-uploading the bucket script.
    /// Dropping the limiter stops the re-upload task.
    pub async fn new(store: Arc<dyn ScriptStore>, settings: LimiterSettings) -> Result<Self> {
        settings.validate()?;
        let tag = settings
            .cluster_mode
            .then(|| AffinityTag::for_resource(&settings.unique_key));
        let keys = BucketKeys::new(&settings.unique_key, tag.as_ref());
        let script = ScriptRegistry::new("token_bucket", scripts::TOKEN_BUCKET, store);
        let refresh = script.spawn_refresh(settings.script_reload_interval());
        info!(
            unique_key = %settings.unique_key,
            capacity = settings.capacity,
            tokens_per_second = settings.tokens_per_second,
            ttl_seconds = settings.ttl_seconds(),
            cluster_mode = settings.cluster_mode,
            "Rate limiter ready"
        );
        Ok(Self {
            settings,
            keys,
            script,
            _refresh: refresh,
        })
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn keys(&self) -> &BucketKeys {
        &self.keys
    }

    /// Take `count` tokens from the bucket if it has them, stamped with the local clock
    pub async fn request_tokens(&self, count: u64) -> Result<TokenGrant> {
        self.request_tokens_at(count, Utc::now().timestamp_micros())
            .await
    }

    /// Take `count` tokens as of `now_micros` (unix microseconds)
    pub async fn request_tokens_at(&self, count: u64, now_micros: i64) -> Result<TokenGrant> {
        if count > self.settings.capacity {
            return Err(KeylatchError::OverCapacityRequest {
                requested: count,
                capacity: self.settings.capacity,
            });
        }
        let args = vec![
            now_micros.to_string(),
            self.settings.capacity.to_string(),
            self.settings.ttl_seconds().to_string(),
            count.to_string(),
            self.settings.token_interval_micros().to_string(),
        ];
        let reply = self.script.eval(self.keys.to_vec(), args).await?;
        let grant = parse_grant(reply)?;
        debug!(
            unique_key = %self.settings.unique_key,
            requested = count,
            remaining = grant.remaining,
            granted = grant.granted,
            "Token request"
        );
        Ok(grant)
    }
}

fn parse_grant(reply: ScriptReply) -> Result<TokenGrant> {
    if let ScriptReply::List(items) = &reply {
        if let [remaining, granted] = items.as_slice() {
            let remaining = remaining
                .as_integer()
                .and_then(|n| u64::try_from(n).ok());
            let granted = match granted.as_integer() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            };
            if let (Some(remaining), Some(granted)) = (remaining, granted) {
                return Ok(TokenGrant { remaining, granted });
            }
        }
    }
    Err(reply_error!("token bucket script returned {:?}", reply))
}
