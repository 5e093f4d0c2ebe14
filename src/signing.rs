//! Signed session payloads
//!
//! Session data is stored as an opaque token:
//! `base64url(json) + ":" + timestamp + ":" + base64url(hmac_sha256(value, key))`
//! where `key = sha256(salt + "signer" + secret)`. The salt carries the store
//! backend name, so a token written by one backend is rejected by another.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::SessionData;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = ':';

/// Encodes session data into signed tokens and back.
#[derive(Clone, Debug)]
pub struct SessionEncoder {
    secrets: Vec<String>,
    salt: String,
    max_age: Option<u64>,
}

impl SessionEncoder {
    /// Create an encoder. The first secret signs; every secret verifies.
    pub fn new<S: Into<String>>(secrets: Vec<String>, salt: S) -> Result<Self, SessionError> {
        if secrets.first().map_or(true, |s| s.is_empty()) {
            return Err(SessionError::Config(
                "no secret key configured; use SessionConfig::new(secret)".to_string(),
            ));
        }
        Ok(Self {
            secrets,
            salt: salt.into(),
            max_age: None,
        })
    }

    /// Create an encoder from the middleware configuration
    pub fn from_config<S: Into<String>>(config: &SessionConfig, salt: S) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::new(config.secrets.clone(), salt)?.with_max_age(config.token_max_age))
    }

    /// Reject tokens older than `max_age` seconds
    pub fn with_max_age(mut self, max_age: Option<u64>) -> Self {
        self.max_age = max_age;
        self
    }

    /// The salt mixed into the signing key
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Serialize and sign session data
    pub fn encode(&self, data: &SessionData) -> Result<String, SessionError> {
        let json = serde_json::to_vec(data)?;
        let value = format!(
            "{}{}{}",
            URL_SAFE_NO_PAD.encode(json),
            SEPARATOR,
            Utc::now().timestamp()
        );
        let signature = self.signature(&value, &self.secrets[0]);
        Ok(format!("{}{}{}", value, SEPARATOR, signature))
    }

    /// Verify and deserialize a token.
    ///
    /// Never fails: a tampered, expired or malformed token yields empty
    /// session data.
    pub fn decode(&self, token: &str) -> SessionData {
        match self.try_decode(token) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Session data corrupted: {}", e);
                SessionData::default()
            }
        }
    }

    /// Verify and deserialize a token, reporting why it was rejected
    pub fn try_decode(&self, token: &str) -> Result<SessionData, SessionError> {
        let (value, signature) = token
            .rsplit_once(SEPARATOR)
            .ok_or(SessionError::InvalidSignature)?;

        if !self.secrets.iter().any(|secret| self.verify(value, signature, secret)) {
            return Err(SessionError::InvalidSignature);
        }

        let (payload, timestamp) = value
            .rsplit_once(SEPARATOR)
            .ok_or(SessionError::InvalidSignature)?;

        if let Some(max_age) = self.max_age {
            let signed_at: i64 = timestamp
                .parse()
                .map_err(|_| SessionError::InvalidSignature)?;
            let age = u64::try_from(Utc::now().timestamp().saturating_sub(signed_at)).unwrap_or(0);
            if age > max_age {
                return Err(SessionError::ExpiredSignature(age - max_age));
            }
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn mac(&self, secret: &str) -> HmacSha256 {
        let key = Sha256::new()
            .chain_update(self.salt.as_bytes())
            .chain_update(b"signer")
            .chain_update(secret.as_bytes())
            .finalize();
        HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size")
    }

    fn signature(&self, value: &str, secret: &str) -> String {
        let mut mac = self.mac(secret);
        mac.update(value.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn verify(&self, value: &str, signature: &str, secret: &str) -> bool {
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac(secret);
        mac.update(value.as_bytes());
        // constant-time comparison
        mac.verify_slice(&provided).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoder() -> SessionEncoder {
        SessionEncoder::new(vec!["keyboard cat".to_string()], "salvo_db_session.test").unwrap()
    }

    fn sample() -> SessionData {
        let mut data = SessionData::default();
        data.set("user_id", 42);
        data.set("cart", json!({"items": [1, 2, 3], "note": "a:b:c"}));
        data
    }

    #[test]
    fn test_encode_and_decode() {
        let encoder = encoder();
        let token = encoder.encode(&sample()).unwrap();
        assert_eq!(token.matches(':').count(), 2);
        assert_eq!(encoder.decode(&token), sample());
    }

    #[test]
    fn test_empty_session_decodes_empty() {
        let encoder = encoder();
        let token = encoder.encode(&SessionData::default()).unwrap();
        assert!(encoder.try_decode(&token).unwrap().is_empty());
    }

    #[test]
    fn test_any_flipped_byte_is_rejected() {
        let encoder = encoder();
        let token = encoder.encode(&sample()).unwrap();

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == token {
                continue;
            }
            assert!(encoder.decode(&tampered).is_empty(), "byte {} accepted", i);
        }
    }

    #[test]
    fn test_malformed_tokens() {
        let encoder = encoder();
        assert!(encoder.decode("").is_empty());
        assert!(encoder.decode("no-separator").is_empty());
        assert!(encoder.decode("a:b").is_empty());
        assert!(matches!(
            encoder.try_decode("a:b"),
            Err(SessionError::InvalidSignature)
        ));
    }

    #[test]
    fn test_salt_separates_backends() {
        let a = SessionEncoder::new(vec!["secret".to_string()], "salvo_db_session.sqlite").unwrap();
        let b = SessionEncoder::new(vec!["secret".to_string()], "salvo_db_session.redis").unwrap();

        let token = a.encode(&sample()).unwrap();
        assert!(b.decode(&token).is_empty());
        assert_eq!(a.decode(&token), sample());
    }

    #[test]
    fn test_secret_rotation() {
        let old = SessionEncoder::new(vec!["old-secret".to_string()], "salt").unwrap();
        let token = old.encode(&sample()).unwrap();

        let rotated = SessionEncoder::new(
            vec!["new-secret".to_string(), "old-secret".to_string()],
            "salt",
        )
        .unwrap();
        assert_eq!(rotated.decode(&token), sample());

        let dropped = SessionEncoder::new(vec!["new-secret".to_string()], "salt").unwrap();
        assert!(dropped.decode(&token).is_empty());
    }

    #[test]
    fn test_max_age() {
        let encoder = encoder().with_max_age(Some(60));
        let fresh = encoder.encode(&sample()).unwrap();
        assert_eq!(encoder.decode(&fresh), sample());

        // Re-sign a payload with a timestamp two minutes in the past
        let (value, _) = fresh.rsplit_once(':').unwrap();
        let (payload, _) = value.rsplit_once(':').unwrap();
        let stale = format!("{}:{}", payload, Utc::now().timestamp() - 120);
        let token = format!("{}:{}", stale, encoder.signature(&stale, "keyboard cat"));

        assert!(matches!(
            encoder.try_decode(&token),
            Err(SessionError::ExpiredSignature(_))
        ));
        assert!(encoder.decode(&token).is_empty());

        let forever = self::encoder().with_max_age(Some(u64::MAX));
        assert_eq!(forever.try_decode(&token).unwrap(), sample());
    }

    #[test]
    fn test_missing_secret_fails_fast() {
        assert!(matches!(
            SessionEncoder::new(vec![], "salt"),
            Err(SessionError::Config(_))
        ));
        assert!(SessionEncoder::from_config(&SessionConfig::default(), "salt").is_err());
    }
}
