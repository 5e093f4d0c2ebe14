//! Session configuration

use std::time::Duration;

use crate::error::SessionError;

/// Two weeks, in seconds
pub const DEFAULT_COOKIE_AGE: u64 = 60 * 60 * 24 * 7 * 2;

/// Configuration for the session middleware
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Secret key(s) for signing session payloads.
    /// The first secret is used for signing new payloads.
    /// All secrets are tried when verifying signatures (for secret rotation).
    pub secrets: Vec<String>,

    /// Name of the session cookie (default: "session_id")
    pub cookie_name: String,

    /// Default session lifetime in seconds (default: two weeks).
    /// Used whenever a session has no custom expiry.
    pub cookie_age: u64,

    /// Whether sessions without a custom expiry end when the browser closes
    /// (default: false)
    pub expire_at_browser_close: bool,

    /// Cookie path (default: "/")
    pub cookie_path: String,

    /// Cookie domain (default: None - current domain only)
    pub cookie_domain: Option<String>,

    /// HttpOnly flag for cookie (default: true)
    pub cookie_http_only: bool,

    /// Secure flag for cookie (default: false)
    pub cookie_secure: bool,

    /// SameSite attribute for cookie
    pub cookie_same_site: SameSite,

    /// Partitioned (CHIPS) flag for cookie (default: false)
    pub cookie_partitioned: bool,

    /// Whether to save the session on every request, even when unmodified
    /// (default: false)
    pub save_every_request: bool,

    /// Maximum age of a signed session payload in seconds (default: None).
    /// Older payloads decode as an empty session.
    pub token_max_age: Option<u64>,
}

/// SameSite cookie attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    /// Strict - cookie only sent for same-site requests
    Strict,
    /// Lax - cookie sent for same-site requests and top-level navigations
    Lax,
    /// None - cookie sent for all requests (requires Secure)
    None,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secrets: Vec::new(),
            cookie_name: "session_id".to_string(),
            cookie_age: DEFAULT_COOKIE_AGE,
            expire_at_browser_close: false,
            cookie_path: "/".to_string(),
            cookie_domain: None,
            cookie_http_only: true,
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
            cookie_partitioned: false,
            save_every_request: false,
            token_max_age: None,
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration with the given secret
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self {
            secrets: vec![secret.into()],
            ..Default::default()
        }
    }

    /// Create a new session configuration with multiple secrets for rotation
    pub fn with_secrets<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets.into_iter().map(|s| s.into()).collect(),
            ..Default::default()
        }
    }

    /// Add a fallback secret that is still accepted when verifying
    pub fn with_fallback_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.secrets.push(secret.into());
        self
    }

    /// Set the cookie name (default: "session_id")
    pub fn with_cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the default session age in seconds
    pub fn with_cookie_age(mut self, seconds: u64) -> Self {
        self.cookie_age = seconds;
        self
    }

    /// Set the default session age from a Duration
    pub fn with_cookie_age_duration(mut self, duration: Duration) -> Self {
        self.cookie_age = duration.as_secs();
        self
    }

    /// Set the default browser-close policy
    pub fn with_expire_at_browser_close(mut self, expire: bool) -> Self {
        self.expire_at_browser_close = expire;
        self
    }

    /// Set the cookie path (default: "/")
    pub fn with_cookie_path<S: Into<String>>(mut self, path: S) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Set the cookie domain
    pub fn with_cookie_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Set the HttpOnly flag (default: true)
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.cookie_http_only = http_only;
        self
    }

    /// Set the Secure flag (default: false)
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Set the SameSite attribute (default: Lax)
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie_same_site = same_site;
        self
    }

    /// Set the Partitioned flag (default: false)
    pub fn with_partitioned(mut self, partitioned: bool) -> Self {
        self.cookie_partitioned = partitioned;
        self
    }

    /// Set whether to save on every request (default: false)
    pub fn with_save_every_request(mut self, save: bool) -> Self {
        self.save_every_request = save;
        self
    }

    /// Reject signed payloads older than `seconds`
    pub fn with_token_max_age(mut self, seconds: impl Into<Option<u64>>) -> Self {
        self.token_max_age = seconds.into();
        self
    }

    /// Check that the configuration can be used to sign sessions
    pub fn validate(&self) -> Result<(), SessionError> {
        match self.secrets.first() {
            Some(secret) if !secret.is_empty() => Ok(()),
            _ => Err(SessionError::Config(
                "no secret key configured; use SessionConfig::new(secret)".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_secret() {
        let config = SessionConfig::default();
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
        assert_eq!(config.cookie_name, "session_id");
        assert_eq!(config.cookie_age, 1_209_600);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SessionConfig::new("").validate().is_err());
        assert!(SessionConfig::new("s3cret").validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new("new")
            .with_fallback_secret("old")
            .with_cookie_age_duration(Duration::from_secs(60))
            .with_partitioned(true)
            .with_same_site(SameSite::Strict);

        assert_eq!(config.secrets, vec!["new".to_string(), "old".to_string()]);
        assert_eq!(config.cookie_age, 60);
        assert!(config.cookie_partitioned);
        assert_eq!(config.cookie_same_site, SameSite::Strict);
    }
}
