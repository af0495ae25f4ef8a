//! Store client seam.
//!
//! Everything the coordination primitives need from the remote key-value store
//! fits in three calls: a conditional set with expiry, a script upload that
//! returns a handle, and an evaluation of a script by handle. `RedisStore`
//! talks to a real Redis (or Redis Cluster) and `MemoryStore` emulates the same
//! semantics inside the current process.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Content-derived handle of an uploaded script body
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct ScriptHash(String);

impl ScriptHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reply of a script evaluation: a scalar or an ordered list of replies
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Integer(i64),
    Text(String),
    List(Vec<ScriptReply>),
}

impl ScriptReply {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScriptReply::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Set `key` to `value` with expiry `ttl` only if the key does not exist.
    /// Returns true when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Upload a script body and return its handle
    async fn script_load(&self, body: &str) -> Result<ScriptHash>;

    /// Run a previously uploaded script atomically against `keys` with positional `args`
    async fn eval_sha(
        &self,
        hash: &ScriptHash,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> Result<ScriptReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_as_integer() {
        assert_eq!(ScriptReply::Integer(1).as_integer(), Some(1));
        assert_eq!(ScriptReply::Text("1".to_string()).as_integer(), None);
        assert_eq!(ScriptReply::Nil.as_integer(), None);
    }
}
