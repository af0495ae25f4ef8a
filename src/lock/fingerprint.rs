use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

static PROCESS_FINGERPRINT: OnceLock<Fingerprint> = OnceLock::new();

/// Fencing token a lock holder writes into the lock key
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A fresh random token
    pub fn generate() -> Self {
        Self(rand::random::<u64>().to_string())
    }

    /// The token shared by every lock in this process.
    ///
    /// Generated on first call and stable for the rest of the process lifetime.
    /// Locks sharing it are indistinguishable to the store, so two of them on the
    /// same key can release each other; use [`Fingerprint::generate`] when one
    /// process runs independent holders.
    pub fn process_wide() -> Self {
        PROCESS_FINGERPRINT.get_or_init(Self::generate).clone()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(token: &str) -> Self {
        Fingerprint::new(token)
    }
}

impl From<String> for Fingerprint {
    fn from(token: String) -> Self {
        Fingerprint::new(token)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
