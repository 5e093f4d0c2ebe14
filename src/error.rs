//! Session error types

use std::fmt;

/// Errors that can occur during session operations
#[derive(Debug)]
pub enum SessionError {
    /// Invalid or incomplete configuration (e.g. no secret key)
    Config(String),
    /// Error from the session store
    Store(String),
    /// Error during serialization/deserialization
    Serialization(String),
    /// Signed payload failed verification
    InvalidSignature,
    /// Signed payload is older than the configured maximum age
    ExpiredSignature(u64),
    /// `pop` on a missing key without a default
    KeyNotFound(String),
    /// The session key already exists in the store
    Create,
    /// The row to update no longer exists or could not be written
    Update,
    /// Database error (when sqlite-store feature is enabled)
    #[cfg(feature = "sqlite-store")]
    Database(sqlx::Error),
    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    Redis(redis::RedisError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Config(msg) => write!(f, "Session configuration error: {}", msg),
            SessionError::Store(msg) => write!(f, "Session store error: {}", msg),
            SessionError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            SessionError::InvalidSignature => write!(f, "Invalid session signature"),
            SessionError::ExpiredSignature(age) => {
                write!(f, "Session signature expired {} seconds ago", age)
            }
            SessionError::KeyNotFound(key) => write!(f, "Key not found in session: {}", key),
            SessionError::Create => write!(f, "Unable to create a new session key"),
            SessionError::Update => write!(f, "Unable to update session; it may have been deleted"),
            #[cfg(feature = "sqlite-store")]
            SessionError::Database(e) => write!(f, "Database error: {}", e),
            #[cfg(feature = "redis-store")]
            SessionError::Redis(e) => write!(f, "Redis error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "sqlite-store")]
            SessionError::Database(e) => Some(e),
            #[cfg(feature = "redis-store")]
            SessionError::Redis(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite-store")]
impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::Database(err)
    }
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        SessionError::Redis(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
