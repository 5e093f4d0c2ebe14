//! Per-request session state machine

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::signing::SessionEncoder;
use crate::store::{SessionRecord, SessionStore};

/// Reserved key holding a per-session expiry override
pub const EXPIRY_KEY: &str = "_session_expiry";

/// Keys shorter than this are treated as absent
pub const MIN_SESSION_KEY_LEN: usize = 8;

const MAX_CREATE_ATTEMPTS: usize = 16;

/// Session key/value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData {
    data: HashMap<String, Value>,
}

impl SessionData {
    /// Get a value from session data
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get the raw JSON value for a key
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Set a value in session data
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), v);
        }
    }

    /// Insert a raw JSON value, returning the previous one
    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.data.insert(key, value)
    }

    /// Remove a value from session data
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Clear all session data
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Check if session data is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}

impl From<HashMap<String, Value>> for SessionData {
    fn from(data: HashMap<String, Value>) -> Self {
        Self { data }
    }
}

impl FromIterator<(String, Value)> for SessionData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

/// Custom expiry for a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expire after this many seconds of inactivity; `0` expires at browser close
    Seconds(i64),
    /// Expire at now + duration
    In(Duration),
    /// Expire at a fixed time
    At(DateTime<Utc>),
}

impl Expiry {
    /// End the session when the browser closes
    pub const BROWSER_CLOSE: Expiry = Expiry::Seconds(0);

    fn to_value(self) -> Value {
        match self {
            Expiry::Seconds(secs) => Value::from(secs),
            Expiry::In(duration) => Value::from(shift(Utc::now(), duration).to_rfc3339()),
            Expiry::At(at) => Value::from(at.min(latest_expiry()).to_rfc3339()),
        }
    }
}

/// 9999-12-31T23:59:59Z, the last instant with a four-digit RFC 3339 year
const LATEST_EXPIRY_TIMESTAMP: i64 = 253_402_300_799;

/// Upper bound for any expiry date
pub fn latest_expiry() -> DateTime<Utc> {
    DateTime::from_timestamp(LATEST_EXPIRY_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at + delta`, clamped to `[UNIX_EPOCH, latest_expiry()]`
fn shift(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    let shifted = at.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
        DateTime::<Utc>::UNIX_EPOCH
    } else {
        latest_expiry()
    });
    shifted.clamp(DateTime::<Utc>::UNIX_EPOCH, latest_expiry())
}

fn default_age_secs(default_age: u64) -> i64 {
    i64::try_from(default_age).unwrap_or(i64::MAX)
}

fn parse_expiry_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Seconds until expiry, measured from `modification`
pub fn expiry_age(expiry: Option<&Value>, modification: DateTime<Utc>, default_age: u64) -> i64 {
    match expiry {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) | None => default_age_secs(default_age),
            Some(secs) => secs,
        },
        Some(Value::String(s)) => match parse_expiry_date(s) {
            Some(at) => (at - modification).num_seconds(),
            None => default_age_secs(default_age),
        },
        _ => default_age_secs(default_age),
    }
}

/// Absolute expiry time, measured from `modification`.
///
/// Ages past the representable range saturate at [`latest_expiry`].
pub fn expiry_date(
    expiry: Option<&Value>,
    modification: DateTime<Utc>,
    default_age: u64,
) -> DateTime<Utc> {
    if let Some(at) = expiry.and_then(Value::as_str).and_then(parse_expiry_date) {
        return at;
    }
    let age = expiry_age(expiry, modification, default_age);
    match Duration::try_seconds(age) {
        Some(delta) => shift(modification, delta),
        None if age < 0 => DateTime::<Utc>::UNIX_EPOCH,
        None => latest_expiry(),
    }
}

fn validate_session_key(key: Option<String>) -> Option<String> {
    key.filter(|k| k.len() >= MIN_SESSION_KEY_LEN)
}

#[derive(Debug, Default)]
struct SessionState {
    session_key: Option<String>,
    /// `None` until the first access loads from the store
    cache: Option<SessionData>,
}

/// A request's session.
///
/// Data is loaded from the store on first access. Clones share state, so the
/// copy held by a handler and the one held by the middleware agree on the
/// accessed/modified/deleted flags.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    encoder: Arc<SessionEncoder>,
    config: Arc<SessionConfig>,
    state: Arc<RwLock<SessionState>>,
    accessed: Arc<AtomicBool>,
    modified: Arc<AtomicBool>,
    deleted: Arc<AtomicBool>,
}

impl Session {
    /// Create a session for `session_key` (usually taken from a cookie).
    ///
    /// Fails if the configuration has no secret key.
    pub fn new(
        store: Arc<dyn SessionStore>,
        config: Arc<SessionConfig>,
        session_key: Option<String>,
    ) -> Result<Self, SessionError> {
        let encoder = SessionEncoder::from_config(&config, store.salt())?;
        Ok(Self::with_encoder(store, Arc::new(encoder), config, session_key))
    }

    /// Create a session sharing an existing encoder
    pub fn with_encoder(
        store: Arc<dyn SessionStore>,
        encoder: Arc<SessionEncoder>,
        config: Arc<SessionConfig>,
        session_key: Option<String>,
    ) -> Self {
        Self {
            store,
            encoder,
            config,
            state: Arc::new(RwLock::new(SessionState {
                session_key: validate_session_key(session_key),
                cache: None,
            })),
            accessed: Arc::new(AtomicBool::new(false)),
            modified: Arc::new(AtomicBool::new(false)),
            deleted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The current session key, if one is assigned
    pub fn session_key(&self) -> Option<String> {
        self.state.read().session_key.clone()
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed.load(Ordering::SeqCst)
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }

    fn set_session_key(&self, key: Option<String>) {
        self.state.write().session_key = validate_session_key(key);
    }

    async fn ensure_loaded(&self) -> Result<(), SessionError> {
        if self.state.read().cache.is_some() {
            return Ok(());
        }
        let data = self.load().await?;
        let mut state = self.state.write();
        if state.cache.is_none() {
            state.cache = Some(data);
        }
        Ok(())
    }

    async fn with_data<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> Result<R, SessionError> {
        self.ensure_loaded().await?;
        self.accessed.store(true, Ordering::SeqCst);
        let mut state = self.state.write();
        Ok(f(state.cache.get_or_insert_with(SessionData::default)))
    }

    /// Get a value, deserialized into `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.with_data(|data| data.get(key)).await
    }

    /// Get the raw JSON value for a key
    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError> {
        self.with_data(|data| data.value(key).cloned()).await
    }

    /// Set a value
    pub async fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        self.with_data(|data| data.insert(key.to_string(), value)).await?;
        self.mark_modified();
        Ok(())
    }

    /// Remove and return a value.
    ///
    /// A missing key returns `default` when given, else `KeyNotFound`.
    pub async fn pop(&self, key: &str, default: Option<Value>) -> Result<Value, SessionError> {
        match self.with_data(|data| data.remove(key)).await? {
            Some(value) => {
                self.mark_modified();
                Ok(value)
            }
            None => default.ok_or_else(|| SessionError::KeyNotFound(key.to_string())),
        }
    }

    /// Return the value for `key`, inserting `value` first if absent.
    ///
    /// Always marks the session modified, even when nothing was inserted.
    pub async fn set_default<T: Serialize>(&self, key: &str, value: T) -> Result<Value, SessionError> {
        let value = serde_json::to_value(value)?;
        let current = self
            .with_data(|data| {
                data.data
                    .entry(key.to_string())
                    .or_insert(value)
                    .clone()
            })
            .await?;
        self.mark_modified();
        Ok(current)
    }

    /// Merge the given entries into the session
    pub async fn update<I>(&self, entries: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.with_data(|data| data.data.extend(entries)).await?;
        self.mark_modified();
        Ok(())
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool, SessionError> {
        self.with_data(|data| data.contains(key)).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, SessionError> {
        self.with_data(|data| data.keys().cloned().collect()).await
    }

    pub async fn values(&self) -> Result<Vec<Value>, SessionError> {
        self.with_data(|data| data.values().cloned().collect()).await
    }

    pub async fn items(&self) -> Result<Vec<(String, Value)>, SessionError> {
        self.with_data(|data| data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .await
    }

    /// Snapshot of the loaded session data
    pub async fn data(&self) -> Result<SessionData, SessionError> {
        self.with_data(|data| data.clone()).await
    }

    /// Remove all values, keeping the session key
    pub fn clear(&self) {
        self.state.write().cache = Some(SessionData::default());
        self.accessed.store(true, Ordering::SeqCst);
        self.mark_modified();
    }

    /// True if no key is assigned and nothing is cached
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.session_key.is_none() && state.cache.as_ref().map_or(true, SessionData::is_empty)
    }

    /// Remove the session from the store and forget its key.
    ///
    /// A later save generates a new key.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.clear();
        self.deleted.store(true, Ordering::SeqCst);
        self.delete(None).await?;
        self.set_session_key(None);
        Ok(())
    }

    /// Move the current data to a new session key, deleting the old record
    pub async fn cycle_key(&self) -> Result<(), SessionError> {
        let data = self.data().await?;
        let old_key = self.session_key();
        self.create().await?;
        self.state.write().cache = Some(data);
        if let Some(key) = old_key {
            self.delete(Some(&key)).await?;
        }
        tracing::debug!("Rotated session key");
        Ok(())
    }

    /// Seconds until the session expires
    pub async fn get_expiry_age(&self) -> Result<i64, SessionError> {
        self.expiry_age_at(Utc::now()).await
    }

    /// Seconds until the session expires, counted from `modification`
    pub async fn expiry_age_at(&self, modification: DateTime<Utc>) -> Result<i64, SessionError> {
        let expiry = self.get_value(EXPIRY_KEY).await?;
        Ok(expiry_age(expiry.as_ref(), modification, self.config.cookie_age))
    }

    /// When the session expires
    pub async fn get_expiry_date(&self) -> Result<DateTime<Utc>, SessionError> {
        self.expiry_date_at(Utc::now()).await
    }

    /// When the session expires, counted from `modification`
    pub async fn expiry_date_at(
        &self,
        modification: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SessionError> {
        let expiry = self.get_value(EXPIRY_KEY).await?;
        Ok(expiry_date(expiry.as_ref(), modification, self.config.cookie_age))
    }

    /// Override the expiry for this session; `None` reverts to the configured
    /// policy
    pub async fn set_expiry(&self, expiry: Option<Expiry>) -> Result<(), SessionError> {
        match expiry {
            Some(expiry) => {
                let value = expiry.to_value();
                self.with_data(|data| data.insert(EXPIRY_KEY.to_string(), value))
                    .await?;
            }
            None => {
                self.with_data(|data| data.remove(EXPIRY_KEY)).await?;
            }
        }
        self.mark_modified();
        Ok(())
    }

    /// Whether the session cookie should end with the browser session
    pub async fn get_expire_at_browser_close(&self) -> Result<bool, SessionError> {
        match self.get_value(EXPIRY_KEY).await? {
            None | Some(Value::Null) => Ok(self.config.expire_at_browser_close),
            Some(expiry) => Ok(expiry.as_i64() == Some(0)),
        }
    }

    /// Whether `session_key` names a stored session
    pub async fn exists(&self, session_key: &str) -> Result<bool, SessionError> {
        self.store.exists(session_key).await
    }

    async fn new_session_key(&self) -> Result<String, SessionError> {
        loop {
            let key = Uuid::new_v4().simple().to_string();
            if !self.store.exists(&key).await? {
                return Ok(key);
            }
        }
    }

    /// Fetch and decode the stored data for the current key.
    ///
    /// A missing, expired or tampered record yields empty data and clears the
    /// key so that the next save creates a fresh session.
    pub async fn load(&self) -> Result<SessionData, SessionError> {
        let Some(key) = self.session_key() else {
            return Ok(SessionData::default());
        };

        let decoded = match self.store.load(&key).await? {
            Some(blob) => match self.encoder.try_decode(&blob) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!("Session data corrupted: {}", e);
                    None
                }
            },
            None => None,
        };

        match decoded {
            Some(data) => Ok(data),
            None => {
                let mut state = self.state.write();
                if state.session_key.as_deref() == Some(key.as_str()) {
                    state.session_key = None;
                }
                Ok(SessionData::default())
            }
        }
    }

    async fn persist(
        &self,
        session_key: String,
        must_create: bool,
        modification: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let data = self.state.read().cache.clone().unwrap_or_default();
        let record = SessionRecord {
            session_key,
            session_data: self.encoder.encode(&data)?,
            expire_date: expiry_date(data.value(EXPIRY_KEY), modification, self.config.cookie_age),
        };
        self.store.save(&record, must_create).await
    }

    /// Persist the session.
    ///
    /// With `must_create` the record must not exist yet (`Create` otherwise);
    /// without it the record must already exist (`Update` otherwise). A
    /// session without a key is created instead.
    pub async fn save(&self, must_create: bool) -> Result<(), SessionError> {
        self.save_at(must_create, Utc::now()).await
    }

    /// [`save`](Self::save) with the record's expiry counted from `modification`
    pub async fn save_at(
        &self,
        must_create: bool,
        modification: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.session_key().is_none() {
            return self.create_at(modification).await;
        }
        if !must_create {
            self.ensure_loaded().await?;
        }
        match self.session_key() {
            Some(key) => self.persist(key, must_create, modification).await,
            None => self.create_at(modification).await,
        }
    }

    /// Assign a fresh key and store the current data under it
    pub async fn create(&self) -> Result<(), SessionError> {
        self.create_at(Utc::now()).await
    }

    async fn create_at(&self, modification: DateTime<Utc>) -> Result<(), SessionError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let key = self.new_session_key().await?;
            self.set_session_key(Some(key.clone()));
            match self.persist(key, true, modification).await {
                Ok(()) => {
                    self.mark_modified();
                    tracing::debug!("Created new session");
                    return Ok(());
                }
                Err(SessionError::Create) => continue,
                Err(e) => return Err(e),
            }
        }
        self.set_session_key(None);
        Err(SessionError::Create)
    }

    /// Delete the record for `session_key`, or for the current key
    pub async fn delete(&self, session_key: Option<&str>) -> Result<(), SessionError> {
        let key = match session_key {
            Some(key) => key.to_string(),
            None => match self.session_key() {
                Some(key) => key,
                None => return Ok(()),
            },
        };
        self.store.delete(&key).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("session_key", &state.session_key)
            .field("data", &state.cache)
            .field("accessed", &self.is_accessed())
            .field("modified", &self.is_modified())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
