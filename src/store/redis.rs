use std::time::Duration;

use async_trait::async_trait;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface};
use fred::prelude::{RedisClient, RedisConfig};
use fred::types::{Expiration, RedisValue, SetOptions};
use tracing::info;

use super::{ScriptHash, ScriptReply, ScriptStore};
use crate::error::Result;
use crate::settings::StoreSettings;

/// `ScriptStore` backed by a Redis server or cluster
#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

impl RedisStore {
    /// Connect to the store described by `settings` and wait for the first connection
    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        let config = RedisConfig::from_url(&settings.redis_url)?;
        let client = RedisClient::new(config, None, None, None);
        client.init().await?;
        info!(url = %settings.redacted_url(), "Connected to redis");
        Ok(Self { client })
    }

    pub fn from_client(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let reply: RedisValue = self
            .client
            .set(
                key,
                value,
                Some(Expiration::PX(ttl_ms)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        // NX answers OK on success and nil when the key already exists
        Ok(!reply.is_null())
    }

    async fn script_load(&self, body: &str) -> Result<ScriptHash> {
        let sha: String = self.client.script_load(body).await?;
        Ok(ScriptHash::new(sha))
    }

    async fn eval_sha(
        &self,
        hash: &ScriptHash,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> Result<ScriptReply> {
        let reply: RedisValue = self.client.evalsha(hash.as_str(), keys, args).await?;
        Ok(to_script_reply(reply))
    }
}

fn to_script_reply(value: RedisValue) -> ScriptReply {
    match value {
        RedisValue::Null => ScriptReply::Nil,
        RedisValue::Integer(n) => ScriptReply::Integer(n),
        RedisValue::Boolean(b) => ScriptReply::Integer(i64::from(b)),
        RedisValue::String(s) => {
            let text: &str = &s;
            ScriptReply::Text(text.to_owned())
        }
        RedisValue::Bytes(b) => ScriptReply::Text(String::from_utf8_lossy(&b).into_owned()),
        RedisValue::Array(values) => {
            ScriptReply::List(values.into_iter().map(to_script_reply).collect())
        }
        other => ScriptReply::Text(format!("{:?}", other)),
    }
}
