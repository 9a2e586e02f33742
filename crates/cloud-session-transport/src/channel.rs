//! Point-to-point channel to another host of the fleet.

use async_trait::async_trait;
use cloud_session_core::{SessionData, SessionId, Token, UpdateOp};
use thiserror::Error;

use crate::protocol::PeerAction;

/// Peer channel error.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer {host} unreachable: {message}")]
    Unreachable { host: String, message: String },
    #[error("Peer {host} timed out")]
    Timeout { host: String },
    #[error("Peer {host} replied with status {status}")]
    Status { host: String, status: u16 },
    #[error("Peer {host} sent an undecodable reply: {message}")]
    Decode { host: String, message: String },
    #[error("Invalid peer request: {0}")]
    InvalidRequest(String),
}

/// One call to a peer's replication endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRequest {
    pub action: PeerAction,
    /// Client token identifying the session on the peer.
    pub token: Option<Token>,
    /// Shared signing key, authorizes the call regardless of residency.
    pub signing_key: Option<String>,
    /// Explicit target id, honored only with the signing key.
    pub target: Option<SessionId>,
    /// Path updates for [`PeerAction::Update`].
    pub updates: Vec<UpdateOp>,
}

impl PeerRequest {
    /// A bare request for `action`.
    #[must_use]
    pub const fn new(action: PeerAction) -> Self {
        Self {
            action,
            token: None,
            signing_key: None,
            target: None,
            updates: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: SessionId) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_updates(mut self, updates: Vec<UpdateOp>) -> Self {
        self.updates = updates;
        self
    }
}

/// Transport used to reach the replication endpoint of another host.
///
/// Implementations resolve to the decoded reply: `Some(data)` when the
/// peer returned session data, `None` for an empty reply.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Issue `request` to `host`.
    async fn request(
        &self,
        host: &str,
        request: PeerRequest,
    ) -> Result<Option<SessionData>, PeerError>;
}
