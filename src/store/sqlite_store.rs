//! SQLite session store
//!
//! Sessions live in a single table:
//! - `session_key`: unique key carried in the cookie
//! - `session_data`: signed, encoded session payload
//! - `expire_date`: Unix timestamp in milliseconds; expired rows are ignored
//!   by lookups and removed by `clear_expired`

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::{SessionRecord, SessionStore};
use crate::error::SessionError;

/// SQLite-backed session store
///
/// # Example
///
/// ```rust,ignore
/// use salvo_db_session::SqliteStore;
///
/// let store = SqliteStore::connect("sqlite://sessions.db").await?;
/// store.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store on an existing pool. Call [`migrate`](Self::migrate)
    /// before use unless the table already exists.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url`
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the session table and its expiry index if they don't exist
    pub async fn migrate(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                session_key TEXT PRIMARY KEY NOT NULL,
                session_data TEXT NOT NULL,
                expire_date INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_expire_date ON session(expire_date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let result = sqlx::query(
            r#"
            INSERT INTO session (session_key, session_data, expire_date)
            VALUES (?, ?, ?)
            ON CONFLICT(session_key) DO NOTHING
            "#,
        )
        .bind(&record.session_key)
        .bind(&record.session_data)
        .bind(record.expire_date.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(SessionError::Create),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(SessionError::Create),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let result = sqlx::query(
            "UPDATE session SET session_data = ?, expire_date = ? WHERE session_key = ?",
        )
        .bind(&record.session_data)
        .bind(record.expire_date.timestamp_millis())
        .bind(&record.session_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(SessionError::Update),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to update session: {}", e);
                Err(SessionError::Update)
            }
        }
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn exists(&self, session_key: &str) -> Result<bool, SessionError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM session WHERE session_key = ?")
            .bind(session_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn load(&self, session_key: &str) -> Result<Option<String>, SessionError> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT session_data FROM session WHERE session_key = ? AND expire_date > ?",
        )
        .bind(session_key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(data)
    }

    async fn save(&self, record: &SessionRecord, must_create: bool) -> Result<(), SessionError> {
        if must_create {
            self.insert(record).await
        } else {
            self.update(record).await
        }
    }

    async fn delete(&self, session_key: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM session WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_expired(&self) -> Result<u64, SessionError> {
        let done = sqlx::query("DELETE FROM session WHERE expire_date < ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
