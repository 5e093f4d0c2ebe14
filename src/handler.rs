//! Session middleware handler for Salvo

use chrono::{DateTime, Utc};
use salvo_core::http::cookie::time::{Duration as CookieDuration, OffsetDateTime};
use salvo_core::http::cookie::{self, Cookie, CookieBuilder};
use salvo_core::http::header::{HeaderValue, VARY};
use salvo_core::prelude::*;
use std::sync::Arc;

use crate::config::{SameSite, SessionConfig};
use crate::error::SessionError;
use crate::session::Session;
use crate::signing::SessionEncoder;
use crate::store::SessionStore;

/// Depot key under which the request's [`Session`] is stored
pub const SESSION_DEPOT_KEY: &str = "salvo.db.session";

/// Session middleware for Salvo
///
/// Reads the session key from the configured cookie, exposes a lazily loaded
/// [`Session`] through the depot, and after the request either persists the
/// session and refreshes the cookie or removes the cookie when the session
/// was flushed.
pub struct SessionHandler<S: SessionStore> {
    store: Arc<S>,
    encoder: Arc<SessionEncoder>,
    config: Arc<SessionConfig>,
}

impl<S: SessionStore> SessionHandler<S> {
    /// Create a new session handler
    ///
    /// Fails if the configuration has no secret key.
    pub fn new(store: S, config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create a handler around a store that is also used elsewhere
    /// (e.g. by [`spawn_cleanup_task`](crate::store::spawn_cleanup_task))
    pub fn with_shared_store(store: Arc<S>, config: SessionConfig) -> Result<Self, SessionError> {
        let encoder = SessionEncoder::from_config(&config, store.salt())?;
        Ok(Self {
            store,
            encoder: Arc::new(encoder),
            config: Arc::new(config),
        })
    }

    /// The backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a session for an incoming request
    fn start_session(&self, req: &Request) -> Session {
        let session_key = req
            .cookie(&self.config.cookie_name)
            .map(|c| c.value().to_string());
        Session::with_encoder(
            self.store.clone(),
            self.encoder.clone(),
            self.config.clone(),
            session_key,
        )
    }

    /// Cookie with every configured attribute except its lifetime.
    ///
    /// Browsers only replace a cookie whose attributes match, so the session
    /// cookie and its removal share this.
    fn cookie_builder(&self, value: String) -> CookieBuilder<'static> {
        let mut builder = Cookie::build((self.config.cookie_name.clone(), value))
            .path(self.config.cookie_path.clone())
            .http_only(self.config.cookie_http_only)
            .secure(self.config.cookie_secure)
            .partitioned(self.config.cookie_partitioned)
            .same_site(cookie_same_site(self.config.cookie_same_site));

        if let Some(domain) = &self.config.cookie_domain {
            builder = builder.domain(domain.clone());
        }
        builder
    }

    /// Build the session cookie for `session_key`, with its lifetime counted
    /// from `modification`
    async fn session_cookie(
        &self,
        session: &Session,
        session_key: String,
        modification: DateTime<Utc>,
    ) -> Result<Cookie<'static>, SessionError> {
        let mut builder = self.cookie_builder(session_key);

        // Browser-close sessions get neither max-age nor expires
        if !session.get_expire_at_browser_close().await? {
            let max_age = session.expiry_age_at(modification).await?;
            builder = builder.max_age(CookieDuration::seconds(max_age));
            let expires = session.expiry_date_at(modification).await?;
            if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires.timestamp()) {
                builder = builder.expires(expires);
            }
        }

        Ok(builder.build())
    }

    /// Cookie that clears the session cookie on the client
    fn removal_cookie(&self) -> Cookie<'static> {
        self.cookie_builder(String::new())
            .max_age(CookieDuration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }

    /// Persist the session and refresh the cookie
    async fn commit(&self, session: &Session, res: &mut Response) -> Result<(), SessionError> {
        // One timestamp, so the stored expiry and the cookie's agree
        let modification = Utc::now();
        session.save_at(false, modification).await?;
        if let Some(session_key) = session.session_key() {
            let cookie = self.session_cookie(session, session_key, modification).await?;
            res.add_cookie(cookie);
        }
        Ok(())
    }
}

fn cookie_same_site(same_site: SameSite) -> cookie::SameSite {
    match same_site {
        SameSite::Strict => cookie::SameSite::Strict,
        SameSite::Lax => cookie::SameSite::Lax,
        SameSite::None => cookie::SameSite::None,
    }
}

impl<S: SessionStore> Clone for SessionHandler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            encoder: Arc::clone(&self.encoder),
            config: Arc::clone(&self.config),
        }
    }
}

#[async_trait]
impl<S: SessionStore> Handler for SessionHandler<S> {
    async fn handle(&self, req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
        let had_cookie = req.cookie(&self.config.cookie_name).is_some();
        let session = self.start_session(req);
        depot.insert(SESSION_DEPOT_KEY, session.clone());

        // Continue with the request
        ctrl.call_next(req, depot, res).await;

        if session.is_accessed() {
            res.headers_mut().append(VARY, HeaderValue::from_static("Cookie"));
        }

        // A flushed session, or a stale cookie that led to nothing
        if session.is_deleted() || (had_cookie && session.is_empty()) {
            res.add_cookie(self.removal_cookie());
            return;
        }

        let should_save = session.is_modified() || self.config.save_every_request;
        if !should_save || session.is_empty() {
            return;
        }

        // Don't persist anything for a failed response
        if res.status_code.map_or(false, |code| code.is_server_error()) {
            return;
        }

        match self.commit(&session, res).await {
            Ok(()) => {}
            Err(SessionError::Update) => {
                // The row vanished mid-request, e.g. a concurrent logout
                tracing::warn!("Session was deleted before the request finished");
                res.status_code(StatusCode::BAD_REQUEST);
            }
            Err(e) => {
                tracing::error!("Failed to save session: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_missing_secret_fails_fast() {
        let result = SessionHandler::new(MemoryStore::new(), SessionConfig::default());
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_same_site_mapping() {
        assert_eq!(cookie_same_site(SameSite::Strict), cookie::SameSite::Strict);
        assert_eq!(cookie_same_site(SameSite::Lax), cookie::SameSite::Lax);
        assert_eq!(cookie_same_site(SameSite::None), cookie::SameSite::None);
    }

    #[tokio::test]
    async fn test_session_cookie_attributes() {
        let config = SessionConfig::new("secret")
            .with_cookie_name("sid")
            .with_cookie_domain("example.com")
            .with_cookie_age(600)
            .with_secure(true)
            .with_partitioned(true);
        let handler = SessionHandler::new(MemoryStore::new(), config).unwrap();
        let session = Session::with_encoder(
            handler.store.clone(),
            handler.encoder.clone(),
            handler.config.clone(),
            None,
        );

        let now = Utc::now();
        let cookie = handler
            .session_cookie(&session, "abcdefgh12345678".to_string(), now)
            .await
            .unwrap();
        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "abcdefgh12345678");
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.partitioned(), Some(true));
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(600)));
        assert_eq!(
            cookie.expires_datetime().map(|at| at.unix_timestamp()),
            Some(now.timestamp() + 600)
        );
    }

    #[test]
    fn test_removal_cookie_keeps_attributes() {
        let config = SessionConfig::new("secret")
            .with_cookie_name("sid")
            .with_cookie_domain("example.com")
            .with_secure(true)
            .with_partitioned(true)
            .with_same_site(SameSite::None);
        let handler = SessionHandler::new(MemoryStore::new(), config).unwrap();

        let cookie = handler.removal_cookie();
        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.partitioned(), Some(true));
        assert_eq!(cookie.same_site(), Some(cookie::SameSite::None));
        assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
    }

    #[tokio::test]
    async fn test_commit_uses_one_timestamp() {
        let handler = SessionHandler::new(MemoryStore::new(), SessionConfig::new("secret")).unwrap();
        let session = handler.start_session(&Request::new());
        session.set("user_id", 42).await.unwrap();

        let mut res = Response::new();
        handler.commit(&session, &mut res).await.unwrap();

        let key = session.session_key().unwrap();
        let record = handler.store().record(&key).unwrap();
        let cookie = res.cookie(handler.config.cookie_name.as_str()).unwrap();
        assert_eq!(
            cookie.expires_datetime().map(|at| at.unix_timestamp()),
            Some(record.expire_date.timestamp())
        );
    }

    #[tokio::test]
    async fn test_browser_close_cookie_has_no_expiry() {
        let config = SessionConfig::new("secret").with_expire_at_browser_close(true);
        let handler = SessionHandler::new(MemoryStore::new(), config).unwrap();
        let session = Session::with_encoder(
            handler.store.clone(),
            handler.encoder.clone(),
            handler.config.clone(),
            None,
        );

        let cookie = handler
            .session_cookie(&session, "abcdefgh12345678".to_string(), Utc::now())
            .await
            .unwrap();
        assert_eq!(cookie.max_age(), None);
        assert!(cookie.expires().is_none());
    }
}
