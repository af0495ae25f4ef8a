//! Token bucket arithmetic shared by the Lua script and the in-memory store.
//! For inspiration see: https://en.wikipedia.org/wiki/Token_bucket
//!
//! Tokens are whole numbers. Refill is rounded down, and the timestamp only
//! advances by the time that was turned into tokens, so partial progress toward
//! the next token survives between calls. A full bucket banks nothing.
use serde::{Deserialize, Serialize};

/// Fixed shape of one bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BucketParams {
    pub capacity: u64,
    // microseconds needed to generate a single token
    pub interval_micros: u64,
}

/// Stored state of one bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BucketState {
    // Count of tokens
    pub tokens: u64,
    // timestamp in unix microseconds
    pub last_refill_micros: i64,
}

impl BucketState {
    /// A bucket nobody has touched yet (or whose keys expired) starts full
    pub fn cold(params: &BucketParams, now_micros: i64) -> Self {
        Self {
            tokens: params.capacity,
            last_refill_micros: now_micros,
        }
    }

    /// Rebuild state from whatever the store still holds
    pub fn load(
        tokens: Option<u64>,
        last_refill_micros: Option<i64>,
        params: &BucketParams,
        now_micros: i64,
    ) -> Self {
        let cold = Self::cold(params, now_micros);
        Self {
            tokens: tokens.unwrap_or(cold.tokens).min(params.capacity),
            last_refill_micros: last_refill_micros.unwrap_or(cold.last_refill_micros),
        }
    }

    /// Add the tokens generated since the last refill, never above capacity.
    /// A clock that reads earlier than the stored timestamp adds nothing.
    pub fn refill(&mut self, params: &BucketParams, now_micros: i64) -> &mut Self {
        let elapsed = now_micros.saturating_sub(self.last_refill_micros).max(0) as u64;
        let generated = elapsed / params.interval_micros.max(1);
        let refill = generated.min(params.capacity.saturating_sub(self.tokens));
        self.tokens += refill;
        if self.tokens >= params.capacity {
            self.last_refill_micros = self.last_refill_micros.max(now_micros);
        } else {
            // refill * interval <= elapsed, so this stays at or before now
            let spent = refill.saturating_mul(params.interval_micros) as i64;
            self.last_refill_micros = self.last_refill_micros.saturating_add(spent);
        }
        self
    }

    /// Check if `requested` tokens can be taken
    pub fn check_if_allowed(&self, requested: u64) -> bool {
        self.tokens >= requested
    }

    /// Subtract `requested` tokens
    pub fn decrement(&mut self, requested: u64) -> &mut Self {
        self.tokens = self.tokens.saturating_sub(requested);
        self
    }

    /// Take `requested` tokens if available; returns whether they were granted
    pub fn take(&mut self, requested: u64) -> bool {
        if self.check_if_allowed(requested) {
            self.decrement(requested);
            true
        } else {
            false
        }
    }
}
