//! Client token format and session id derivation.
//!
//! A token is `ownerHost|secret`. The owner is the address of the host that
//! minted (or last adopted) the session. The secret never changes. The
//! session id is `base64(HMAC-SHA256(key, secret))`, so every host sharing
//! the key derives the same id.

use std::{fmt, net::IpAddr};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::SessionId;

/// Separator between owner host and secret.
pub const TOKEN_SEPARATOR: char = '|';

type HmacSha256 = Hmac<Sha256>;

/// Token error.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Client-carried session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Address of the host that owns the session data.
    pub owner_host: String,
    /// Client secret, generated once.
    pub secret: String,
}

impl Token {
    /// Build a token from its parts.
    #[must_use]
    pub fn new(owner_host: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            owner_host: owner_host.into(),
            secret: secret.into(),
        }
    }

    /// Mint a token with a fresh secret owned by `owner_host`.
    #[must_use]
    pub fn mint(owner_host: impl Into<String>) -> Self {
        Self::new(owner_host, generate_secret())
    }

    /// Parse `ownerHost|secret`.
    ///
    /// Returns `None` unless the value splits into exactly two non-empty parts
    /// and the owner is an IP address.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(TOKEN_SEPARATOR);
        let owner = parts.next()?;
        let secret = parts.next()?;
        if parts.next().is_some() || !is_valid_owner(owner) || secret.is_empty() {
            return None;
        }
        Some(Self::new(owner, secret))
    }

    /// Same secret, new owner.
    #[must_use]
    pub fn with_owner(mut self, owner_host: impl Into<String>) -> Self {
        self.owner_host = owner_host.into();
        self
    }

    /// Wire form of the token.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{TOKEN_SEPARATOR}{}", self.owner_host, self.secret)
    }
}

/// Whether `owner` may name the host a session lives on.
///
/// The owner is client-supplied and ends up in a peer URL, so only literal
/// IP addresses are accepted.
#[must_use]
pub fn is_valid_owner(owner: &str) -> bool {
    owner.parse::<IpAddr>().is_ok()
}

/// Generate a high-entropy client secret (32 lowercase hex chars).
#[must_use]
pub fn generate_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Derive the session id for `secret` under `key`.
///
/// # Errors
/// Returns error if the MAC cannot be keyed.
pub fn derive_session_id(secret: &str, key: &str) -> Result<SessionId, TokenError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
    mac.update(secret.as_bytes());
    Ok(SessionId::new(BASE64.encode(mac.finalize().into_bytes())))
}
