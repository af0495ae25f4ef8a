//! Distributed coordination over a shared Redis.
//!
//! Two primitives for processes that share nothing but a store able to run
//! atomic scripts:
//!
//! - [`lock::LockManager`]: a leased mutual-exclusion lock stamped with a
//!   fencing token.
//! - [`limiters::RateLimiter`]: a token bucket whose refill-and-take step runs
//!   as a single script inside the store.
//!
//! Both upload their scripts through a [`script_registry::ScriptRegistry`] that
//! keeps re-uploading them in the background while the owner is alive.
pub mod cli;
pub mod error;
pub mod limiters;
pub mod lock;
pub mod script_registry;
pub mod scripts;
pub mod settings;
pub mod store;

pub use error::{KeylatchError, Result};
pub use limiters::{RateLimiter, TokenGrant};
pub use lock::{Fingerprint, LockManager};
