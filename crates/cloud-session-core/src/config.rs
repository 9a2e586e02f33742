//! Configuration shared by every component of a host.

use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::is_valid_owner;

/// Which peer action a host uses to pull a session it does not own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchAction {
    /// Leave the owner's record in place.
    Copy,
    /// Move the record: the owner deletes it after replying.
    #[default]
    Transfer,
}

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Signing key must not be empty")]
    EmptySigningKey,
    #[error("Token name must not be empty")]
    EmptyTokenName,
    #[error("Peer path must start with '/': {0}")]
    InvalidPeerPath(String),
    #[error("Expiry must be at least one second")]
    ZeroExpiry,
    #[error("Local address must be an IP address: {0}")]
    InvalidLocalAddress(String),
}

/// Session configuration.
///
/// Every field is optional when deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Talk to peers over HTTPS and mark cookies `Secure`.
    pub secure: bool,
    /// Keep the last touched session in `snapshot_path` across restarts.
    pub dev_persistence: bool,
    /// Fleet-wide key for id derivation and peer authorization.
    pub signing_key: String,
    /// Cookie and header name carrying the token.
    pub token_name: String,
    /// Idle time after which a session is swept.
    pub expiry_secs: u64,
    /// Seconds between sweeps. Zero or negative disables sweeping.
    pub sweep_interval_secs: i64,
    /// Route of the peer endpoint.
    pub peer_path: String,
    /// Port every host serves the peer endpoint on.
    pub peer_port: u16,
    /// Recovery file used in development mode.
    pub snapshot_path: PathBuf,
    /// Requests whose path starts with one of these get no session.
    pub excluded_prefixes: Vec<String>,
    /// Whole-request timeout for peer calls. `None` waits forever.
    pub peer_timeout_ms: Option<u64>,
    /// Connect timeout for peer calls.
    pub peer_connect_timeout_ms: Option<u64>,
    /// Action used to pull a remotely owned session.
    pub fetch_action: FetchAction,
    /// Address peers reach this host on. Discovered when unset.
    pub local_address: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure: false,
            dev_persistence: false,
            signing_key: "cl0udS3sS10nK3y".to_string(),
            token_name: "x-cloud-session".to_string(),
            expiry_secs: 3600,
            sweep_interval_secs: 600,
            peer_path: "/cloud-session".to_string(),
            peer_port: 3000,
            snapshot_path: PathBuf::from("./session"),
            excluded_prefixes: Vec::new(),
            peer_timeout_ms: None,
            peer_connect_timeout_ms: None,
            fetch_action: FetchAction::Transfer,
            local_address: None,
        }
    }
}

impl SessionConfig {
    /// Set the signing key.
    #[must_use]
    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = key.into();
        self
    }

    /// Set the token cookie/header name.
    #[must_use]
    pub fn with_token_name(mut self, name: impl Into<String>) -> Self {
        self.token_name = name.into();
        self
    }

    /// Set the peer port.
    #[must_use]
    pub fn with_peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    /// Pin the local address instead of discovering it.
    #[must_use]
    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    /// Add a path prefix that bypasses session handling.
    #[must_use]
    pub fn with_excluded_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_prefixes.push(prefix.into());
        self
    }

    /// Enable development persistence to `path`.
    #[must_use]
    pub fn with_dev_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev_persistence = true;
        self.snapshot_path = path.into();
        self
    }

    /// Set the sweep schedule. `-1` disables sweeping.
    #[must_use]
    pub fn with_sweep_interval_secs(mut self, secs: i64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Set the peer request timeout.
    #[must_use]
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the fetch action.
    #[must_use]
    pub fn with_fetch_action(mut self, action: FetchAction) -> Self {
        self.fetch_action = action;
        self
    }

    /// Check the values that would make the system misbehave.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_key.is_empty() {
            return Err(ConfigError::EmptySigningKey);
        }
        if self.token_name.is_empty() {
            return Err(ConfigError::EmptyTokenName);
        }
        if !self.peer_path.starts_with('/') {
            return Err(ConfigError::InvalidPeerPath(self.peer_path.clone()));
        }
        if self.expiry_secs == 0 {
            return Err(ConfigError::ZeroExpiry);
        }
        if let Some(address) = &self.local_address {
            if !is_valid_owner(address) {
                return Err(ConfigError::InvalidLocalAddress(address.clone()));
            }
        }
        Ok(())
    }

    /// Sweep period, `None` when sweeping is disabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        u64::try_from(self.sweep_interval_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub fn peer_timeout(&self) -> Option<Duration> {
        self.peer_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn peer_connect_timeout(&self) -> Option<Duration> {
        self.peer_connect_timeout_ms.map(Duration::from_millis)
    }

    /// Whether `path` skips session handling.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.is_peer_path(path)
            || self
                .excluded_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    /// Whether `path` is the peer endpoint or below it.
    #[must_use]
    pub fn is_peer_path(&self, path: &str) -> bool {
        path.strip_prefix(self.peer_path.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    /// Address peers reach this host on.
    ///
    /// Uses `local_address` when set, otherwise the address of the interface
    /// that routes outbound traffic, otherwise loopback.
    #[must_use]
    pub fn resolve_local_address(&self) -> String {
        self.local_address
            .clone()
            .unwrap_or_else(|| discover_local_ip().to_string())
    }
}

fn discover_local_ip() -> IpAddr {
    // Connecting a UDP socket only selects a route, nothing is sent.
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or_else(|| {
            tracing::warn!("Could not discover local address, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        })
}
