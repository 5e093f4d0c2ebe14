//! Redis session store
//!
//! - Key: `prefix + session_key` (default prefix: "session:")
//! - Value: the signed session payload
//! - TTL: derived from the record's expire date, so Redis evicts expired
//!   sessions itself and `clear_expired` has nothing to do

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{SessionRecord, SessionStore};
use crate::error::SessionError;

/// Redis session store
///
/// # Example
///
/// ```rust,ignore
/// use salvo_db_session::RedisStore;
///
/// let client = redis::Client::open("redis://127.0.0.1/")?;
/// let store = RedisStore::new(client).await?;
/// ```
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Create a new Redis store with the default "session:" prefix
    pub async fn new(client: redis::Client) -> Result<Self, SessionError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection_manager(conn))
    }

    /// Create a new Redis store from a connection string
    pub async fn from_url(url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(url)
            .map_err(|e| SessionError::Store(format!("Failed to create Redis client: {}", e)))?;
        Self::new(client).await
    }

    /// Create a new Redis store from an existing connection manager
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: "session:".to_string(),
        }
    }

    /// Build with custom prefix
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Make a storage key from session key
    fn make_key(&self, session_key: &str) -> String {
        format!("{}{}", self.prefix, session_key)
    }
}

/// Seconds until `record` expires, at least 1 so SET EX accepts it
fn ttl_secs(record: &SessionRecord) -> i64 {
    (record.expire_date - Utc::now()).num_seconds().max(1)
}

#[async_trait]
impl SessionStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn exists(&self, session_key: &str) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.make_key(session_key)).await?)
    }

    async fn load(&self, session_key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(self.make_key(session_key)).await?)
    }

    async fn save(&self, record: &SessionRecord, must_create: bool) -> Result<(), SessionError> {
        if record.is_expired() {
            if must_create {
                return Err(SessionError::Create);
            }
            return self.delete(&record.session_key).await;
        }

        let mut conn = self.conn.clone();
        let condition = if must_create { "NX" } else { "XX" };

        // SET ... NX/XX replies nil when the condition fails
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.make_key(&record.session_key))
            .arg(&record.session_data)
            .arg(condition)
            .arg("EX")
            .arg(ttl_secs(record))
            .query_async(&mut conn)
            .await?;

        match (reply, must_create) {
            (Some(_), _) => Ok(()),
            (None, true) => Err(SessionError::Create),
            (None, false) => Err(SessionError::Update),
        }
    }

    async fn delete(&self, session_key: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.make_key(session_key)).await?;
        Ok(())
    }

    async fn clear_expired(&self) -> Result<u64, SessionError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    // Tests require a running Redis instance
    // Run with: cargo test --features redis-store -- --ignored

    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ttl_is_at_least_one_second() {
        let record = SessionRecord {
            session_key: "k".to_string(),
            session_data: String::new(),
            expire_date: Utc::now(),
        };
        assert_eq!(ttl_secs(&record), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_store_basic() {
        let store = RedisStore::from_url("redis://127.0.0.1/")
            .await
            .unwrap()
            .with_prefix("test-session:");

        let mut record = SessionRecord {
            session_key: uuid::Uuid::new_v4().simple().to_string(),
            session_data: "payload".to_string(),
            expire_date: Utc::now() + Duration::hours(1),
        };

        assert!(matches!(store.save(&record, false).await, Err(SessionError::Update)));
        store.save(&record, true).await.unwrap();
        assert!(matches!(store.save(&record, true).await, Err(SessionError::Create)));

        record.session_data = "changed".to_string();
        store.save(&record, false).await.unwrap();
        assert_eq!(
            store.load(&record.session_key).await.unwrap().as_deref(),
            Some("changed")
        );
        assert!(store.exists(&record.session_key).await.unwrap());
        assert_eq!(store.clear_expired().await.unwrap(), 0);

        store.delete(&record.session_key).await.unwrap();
        assert!(store.load(&record.session_key).await.unwrap().is_none());
    }
}
