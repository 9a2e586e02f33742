//! Session identity and the per-session record.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tree-shaped session payload.
pub type SessionData = Map<String, Value>;

/// Opaque session identifier derived from a client secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an already-derived identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a host keeps for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Last time a request resolved to this session (Unix epoch millis).
    pub last_touched: i64,
    /// Session payload. Never null; empty object by default.
    #[serde(default)]
    pub data: SessionData,
}

impl SessionRecord {
    /// Create an empty record touched at `now`.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            last_touched: now,
            data: SessionData::new(),
        }
    }

    /// Whether this record has been idle for longer than `expiry_secs`.
    #[must_use]
    pub fn is_expired(&self, now: i64, expiry_secs: u64) -> bool {
        let window = i64::try_from(expiry_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        now.saturating_sub(self.last_touched) > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let record = SessionRecord::new(0);
        assert!(!record.is_expired(3_600_000, 3600));
        assert!(record.is_expired(3_600_001, 3600));
    }

    #[test]
    fn test_record_wire_names() {
        let record = SessionRecord::new(42);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"lastTouched":42,"data":{}}"#);

        let parsed: SessionRecord = serde_json::from_str(r#"{"lastTouched":7}"#).unwrap();
        assert!(parsed.data.is_empty());
    }
}
