//! Session store trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SessionError;

/// A persisted session row
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Unique session key, also carried in the cookie
    pub session_key: String,
    /// Signed, encoded session data
    pub session_data: String,
    /// After this instant the record is ignored by lookups
    pub expire_date: DateTime<Utc>,
}

impl SessionRecord {
    /// Check if the record has expired
    pub fn is_expired(&self) -> bool {
        self.expire_date <= Utc::now()
    }
}

/// Trait for session storage backends
///
/// Stores only deal in encoded records; lazy loading, dirty tracking and key
/// generation live in [`Session`](crate::Session).
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Short backend name, mixed into the signing salt
    fn backend_name(&self) -> &'static str;

    /// Salt for signing payloads written through this backend
    fn salt(&self) -> String {
        format!("salvo_db_session.{}", self.backend_name())
    }

    /// Whether a record exists for `session_key`
    async fn exists(&self, session_key: &str) -> Result<bool, SessionError>;

    /// Get the encoded data of an unexpired record
    ///
    /// Returns None if the record doesn't exist or has expired
    async fn load(&self, session_key: &str) -> Result<Option<String>, SessionError>;

    /// Write a record.
    ///
    /// With `must_create`, fails with [`SessionError::Create`] if the key is
    /// taken. Without it, fails with [`SessionError::Update`] if there is no
    /// row to update.
    async fn save(&self, record: &SessionRecord, must_create: bool) -> Result<(), SessionError>;

    /// Delete the record for `session_key`, if any
    async fn delete(&self, session_key: &str) -> Result<(), SessionError>;

    /// Remove expired records, returning how many were removed.
    ///
    /// Backends with native expiry may return `Ok(0)` without doing anything.
    async fn clear_expired(&self) -> Result<u64, SessionError>;
}
