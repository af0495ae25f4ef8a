//! Distributed mutual-exclusion lock.
//!
//! Acquire is a single `SET key token PX lease NX`. Release runs the unlock
//! script, which deletes the key only while it still holds our token, so a
//! holder whose lease ran out cannot remove the next holder's lock. There is no
//! renewal: the lease must outlast the critical section.
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::Result;
use crate::reply_error;
use crate::script_registry::{RefreshTask, ScriptRegistry};
use crate::scripts;
use crate::settings::LockSettings;
use crate::store::{ScriptReply, ScriptStore};

pub mod fingerprint;

pub use fingerprint::Fingerprint;

pub struct LockManager {
    store: Arc<dyn ScriptStore>,
    settings: LockSettings,
    fingerprint: Fingerprint,
    unlock: ScriptRegistry,
    _refresh: RefreshTask,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_key", &self.settings.lock_key)
            .field("lease_ms", &self.settings.lease_ms)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl LockManager {
    /// Build a lock manager and start re-uploading the unlock script.
    /// Dropping the manager stops the re-upload task.
    pub async fn new(
        store: Arc<dyn ScriptStore>,
        settings: LockSettings,
        fingerprint: Fingerprint,
    ) -> Result<Self> {
        settings.validate()?;
        let unlock = ScriptRegistry::new("unlock", scripts::UNLOCK, store.clone());
        let refresh = unlock.spawn_refresh(settings.script_reload_interval());
        Ok(Self {
            store,
            settings,
            fingerprint,
            unlock,
            _refresh: refresh,
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn lock_key(&self) -> &str {
        &self.settings.lock_key
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Try once to take the lock. Ok(false) means somebody else holds it.
    pub async fn try_acquire(&self) -> Result<bool> {
        let acquired = self
            .store
            .set_if_absent(
                &self.settings.lock_key,
                self.fingerprint.as_str(),
                self.settings.lease(),
            )
            .await?;
        debug!(
            lock_key = %self.settings.lock_key,
            acquired,
            "Lock acquire attempt"
        );
        Ok(acquired)
    }

    /// Delete the lock if it still carries our token. Ok(false) means it did not.
    pub async fn try_release(&self) -> Result<bool> {
        let reply = self
            .unlock
            .eval(
                vec![self.settings.lock_key.clone()],
                vec![self.fingerprint.to_string()],
            )
            .await?;
        let released = match reply {
            ScriptReply::Integer(1) => true,
            ScriptReply::Integer(0) => false,
            other => {
                return Err(reply_error!(
                    "unlock script returned {:?} for {}",
                    other,
                    self.settings.lock_key
                ))
            }
        };
        debug!(
            lock_key = %self.settings.lock_key,
            released,
            "Lock release attempt"
        );
        Ok(released)
    }

    /// Like [`try_acquire`](Self::try_acquire), but a store error also reads as `false`
    pub async fn acquire(&self) -> bool {
        match self.try_acquire().await {
            Ok(acquired) => acquired,
            Err(err) => {
                error!(lock_key = %self.settings.lock_key, error = %err, "Lock acquire failed");
                false
            }
        }
    }

    /// Like [`try_release`](Self::try_release), but a store error also reads as `false`
    pub async fn release(&self) -> bool {
        match self.try_release().await {
            Ok(released) => released,
            Err(err) => {
                error!(lock_key = %self.settings.lock_key, error = %err, "Lock release failed");
                false
            }
        }
    }
}
