//! In-memory session store
//!
//! This is primarily for development and testing.
//! For production, use SqliteStore or RedisStore.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{SessionRecord, SessionStore};
use crate::error::SessionError;

/// In-memory session store
///
/// Warning: This store is not suitable for production use because:
/// - Sessions are lost on server restart
/// - Sessions are not shared across multiple server instances
/// - Memory usage grows until `clear_expired` runs
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the stored record, expired or not
    pub fn record(&self, session_key: &str) -> Option<SessionRecord> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Number of stored records, including expired ones
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, session_key: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.read().contains_key(session_key))
    }

    async fn load(&self, session_key: &str) -> Result<Option<String>, SessionError> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(session_key)
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.session_data.clone()))
    }

    async fn save(&self, record: &SessionRecord, must_create: bool) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let exists = sessions.contains_key(&record.session_key);

        if must_create && exists {
            return Err(SessionError::Create);
        }
        if !must_create && !exists {
            return Err(SessionError::Update);
        }

        sessions.insert(record.session_key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_key: &str) -> Result<(), SessionError> {
        self.sessions.write().remove(session_key);
        Ok(())
    }

    async fn clear_expired(&self) -> Result<u64, SessionError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, stored| !stored.is_expired());
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(key: &str, expires_in: Duration) -> SessionRecord {
        SessionRecord {
            session_key: key.to_string(),
            session_data: "payload".to_string(),
            expire_date: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        store.save(&record("test-id", Duration::hours(1)), true).await.unwrap();
        assert!(store.exists("test-id").await.unwrap());
        assert_eq!(store.load("test-id").await.unwrap().as_deref(), Some("payload"));

        store.delete("test-id").await.unwrap();
        assert!(store.load("test-id").await.unwrap().is_none());
        assert!(!store.exists("test-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_create_and_update_rules() {
        let store = MemoryStore::new();
        let rec = record("test-id", Duration::hours(1));

        assert!(matches!(store.save(&rec, false).await, Err(SessionError::Update)));
        store.save(&rec, true).await.unwrap();
        assert!(matches!(store.save(&rec, true).await, Err(SessionError::Create)));
        store.save(&rec, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        store.save(&record("old", Duration::seconds(-1)), true).await.unwrap();
        store.save(&record("new", Duration::hours(1)), true).await.unwrap();

        // expired rows are invisible to load but still exist until cleared
        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.exists("old").await.unwrap());

        assert_eq!(store.clear_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.record("new").is_some());
    }
}
