//! Core traits: time source and pluggable session hooks.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use http::HeaderMap;
use serde_json::Value;
use thiserror::Error;

use crate::{
    Cookies, SessionConfig, SessionData, SessionId, Token, TokenError,
    token::{TOKEN_SEPARATOR, derive_session_id, is_valid_owner},
};

/// Legacy cookie naming the owner of a bare-secret token.
pub const LEGACY_OWNER_COOKIE: &str = "x-cloud-ipaddress";

/// Time source for liveness bookkeeping.
pub trait Clock: Send + Sync {
    /// Current time in Unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Hook error.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Serialization failed: {0}")]
    Serialize(String),
    #[error("Deserialization failed: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Overridable behaviour of a session host.
///
/// Every method has a default; implement only what you need to change.
/// Inject the implementation when building the host.
pub trait SessionHooks: Send + Sync {
    /// Encode session data for the peer wire. Absent data encodes as `{}`.
    ///
    /// # Errors
    /// Returns error if the data cannot be encoded.
    fn serialize(&self, data: Option<&SessionData>) -> Result<String, HookError> {
        match data {
            Some(data) => {
                serde_json::to_string(data).map_err(|e| HookError::Serialize(e.to_string()))
            }
            None => Ok("{}".to_string()),
        }
    }

    /// Decode session data from the peer wire. Blank input and `null`
    /// decode as an empty mapping.
    ///
    /// # Errors
    /// Returns error if the input is not a JSON object.
    fn deserialize(&self, raw: &str) -> Result<SessionData, HookError> {
        if raw.trim().is_empty() {
            return Ok(SessionData::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Null) => Ok(SessionData::new()),
            Ok(other) => Err(HookError::Deserialize(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(HookError::Deserialize(e.to_string())),
        }
    }

    /// Derive the session id for a client secret.
    ///
    /// # Errors
    /// Returns error if the key cannot be used.
    fn derive(&self, secret: &str, key: &str) -> Result<SessionId, HookError> {
        Ok(derive_session_id(secret, key)?)
    }

    /// Find the raw token on a request. The header wins over the cookie.
    fn extract_token(&self, headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .or_else(|| Cookies::from_headers(headers).get(name).map(str::to_string))
    }

    /// Parse an extracted token. Accepts `owner|secret`, and the legacy
    /// bare secret whose owner sits in the `x-cloud-ipaddress` cookie (no
    /// such cookie means `local_address` owns it). An owner that is not an
    /// IP address makes the token invalid.
    fn parse_token(&self, raw: &str, headers: &HeaderMap, local_address: &str) -> Option<Token> {
        if raw.contains(TOKEN_SEPARATOR) {
            return Token::parse(raw);
        }
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        let owner = Cookies::from_headers(headers)
            .get(LEGACY_OWNER_COOKIE)
            .filter(|v| !v.is_empty())
            .unwrap_or(local_address);
        if !is_valid_owner(owner) {
            tracing::debug!(owner, "Ignoring legacy token with invalid owner");
            return None;
        }
        Some(Token::new(owner, raw))
    }

    /// Render the `Set-Cookie` value carrying the token.
    fn write_cookie(&self, name: &str, value: &str, secure: bool) -> String {
        let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Whether a request path skips session handling entirely.
    fn bypass(&self, path: &str, config: &SessionConfig) -> bool {
        config.is_excluded(path)
    }
}

/// The built-in hook set: JSON payloads, HMAC-SHA256 ids, header/cookie tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl SessionHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_serialize() {
        let hooks = DefaultHooks;
        assert_eq!(hooks.serialize(None).unwrap(), "{}");

        let data = json!({"key": "value"}).as_object().cloned().unwrap();
        assert_eq!(hooks.serialize(Some(&data)).unwrap(), r#"{"key":"value"}"#);
    }

    #[test]
    fn test_deserialize() {
        let hooks = DefaultHooks;
        assert!(assert_ok!(hooks.deserialize("")).is_empty());
        assert!(assert_ok!(hooks.deserialize("null")).is_empty());

        let data = assert_ok!(hooks.deserialize(r#"{"key":"value"}"#));
        assert_eq!(data["key"], "value");

        assert_err!(hooks.deserialize("[1,2]"));
        assert_err!(hooks.deserialize("{broken"));
    }

    #[test]
    fn test_header_beats_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("my.sid", HeaderValue::from_static("h|header-secret"));
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("my.sid=c|cookie-secret"),
        );
        assert_eq!(
            DefaultHooks.extract_token(&headers, "my.sid").as_deref(),
            Some("h|header-secret")
        );

        headers.remove("my.sid");
        assert_eq!(
            DefaultHooks.extract_token(&headers, "my.sid").as_deref(),
            Some("c|cookie-secret")
        );
    }

    #[test]
    fn test_parse_legacy_token() {
        let mut headers = HeaderMap::new();
        let local = DefaultHooks.parse_token("1234567890", &headers, "10.0.0.1").unwrap();
        assert_eq!(local, Token::new("10.0.0.1", "1234567890"));

        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("my.sid=1234567890; x-cloud-ipaddress=192.168.1.1"),
        );
        let remote = DefaultHooks.parse_token("1234567890", &headers, "10.0.0.1").unwrap();
        assert_eq!(remote.owner_host, "192.168.1.1");

        assert!(DefaultHooks.parse_token("a|b|c", &headers, "10.0.0.1").is_none());
        assert!(DefaultHooks.parse_token(" ", &headers, "10.0.0.1").is_none());
    }

    #[test]
    fn test_legacy_owner_must_be_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("my.sid=1234567890; x-cloud-ipaddress=attacker.example"),
        );
        assert!(DefaultHooks.parse_token("1234567890", &headers, "10.0.0.1").is_none());
        assert!(DefaultHooks.parse_token("evil.example|s", &headers, "10.0.0.1").is_none());
    }

    #[test]
    fn test_write_cookie() {
        let plain = DefaultHooks.write_cookie("sid", "h|s", false);
        assert!(plain.starts_with("sid=h|s; Path=/"));
        assert!(!plain.contains("Secure"));
        assert!(DefaultHooks.write_cookie("sid", "h|s", true).ends_with("; Secure"));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance_secs(2);
        assert_eq!(clock.now_millis(), 3_000);
        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
    }
}
