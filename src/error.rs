use std::fmt;

use fred::error::RedisError;

/// Main error type for keylatch coordination primitives
#[derive(Debug)]
pub enum KeylatchError {
    /// Transport failure talking to the store; never retried internally
    StoreUnavailable(String),

    /// Malformed construction parameters
    InvalidConfiguration(String),

    /// A single request asked for more tokens than the bucket can ever hold
    OverCapacityRequest { requested: u64, capacity: u64 },

    /// The store does not know the script handle we sent
    ScriptMissing(String),

    /// The store answered with a reply shape we cannot interpret
    UnexpectedReply(String),
}

impl fmt::Display for KeylatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeylatchError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            KeylatchError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
            KeylatchError::OverCapacityRequest {
                requested,
                capacity,
            } => write!(
                f,
                "Invalid request: {} tokens requested but bucket capacity is {}",
                requested, capacity
            ),
            KeylatchError::ScriptMissing(msg) => write!(f, "Script missing: {}", msg),
            KeylatchError::UnexpectedReply(msg) => write!(f, "Unexpected store reply: {}", msg),
        }
    }
}

impl std::error::Error for KeylatchError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, KeylatchError>;

impl KeylatchError {
    /// True for errors that come from talking to the store rather than from the caller
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            KeylatchError::StoreUnavailable(_)
                | KeylatchError::ScriptMissing(_)
                | KeylatchError::UnexpectedReply(_)
        )
    }
}

impl From<RedisError> for KeylatchError {
    fn from(err: RedisError) -> Self {
        let message = err.to_string();
        // Redis reports an evicted or flushed script cache this way
        if message.to_ascii_uppercase().contains("NOSCRIPT") {
            KeylatchError::ScriptMissing(message)
        } else {
            KeylatchError::StoreUnavailable(message)
        }
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::KeylatchError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::KeylatchError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::error::KeylatchError::StoreUnavailable($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::KeylatchError::StoreUnavailable(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! reply_error {
    ($msg:expr) => {
        $crate::error::KeylatchError::UnexpectedReply($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::KeylatchError::UnexpectedReply(format!($fmt, $($arg)*))
    };
}
