//! Wire protocol of the peer endpoint.
//!
//! `POST {peer_path}?action=<action>&key=<signing key>&sid=<target id>`
//! with the client token in the token header. Update calls carry an
//! [`UpdateBody`] as JSON. Replies are either an empty body or the
//! serialized session data.

use std::fmt;

use cloud_session_core::{FetchAction, SessionId, UpdateOp};
use serde::{Deserialize, Serialize};

/// One of the four replication actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerAction {
    /// Return the resident data, keep the record.
    #[serde(rename = "copy_session")]
    Copy,
    /// Return the resident data, then delete the record.
    #[serde(rename = "transfer_session")]
    Transfer,
    /// Delete the record.
    #[serde(rename = "destroy_session")]
    Destroy,
    /// Apply path updates to the record in place.
    #[serde(rename = "update_session")]
    Update,
}

impl PeerAction {
    /// Query-string value of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy_session",
            Self::Transfer => "transfer_session",
            Self::Destroy => "destroy_session",
            Self::Update => "update_session",
        }
    }

    /// Parse a query-string value. Unknown values are `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "copy_session" => Some(Self::Copy),
            "transfer_session" => Some(Self::Transfer),
            "destroy_session" => Some(Self::Destroy),
            "update_session" => Some(Self::Update),
            _ => None,
        }
    }

    /// Whether the reply carries session data.
    #[must_use]
    pub const fn returns_data(self) -> bool {
        matches!(self, Self::Copy | Self::Transfer)
    }

    /// Whether the action removes the record.
    #[must_use]
    pub const fn deletes(self) -> bool {
        matches!(self, Self::Transfer | Self::Destroy)
    }
}

impl fmt::Display for PeerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FetchAction> for PeerAction {
    fn from(action: FetchAction) -> Self {
        match action {
            FetchAction::Copy => Self::Copy,
            FetchAction::Transfer => Self::Transfer,
        }
    }
}

/// Query parameters of a peer call.
///
/// Every field is a plain string so a malformed query still parses and
/// gets the empty reply instead of a rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Shared signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Explicit target session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Body of an `update_session` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBody {
    /// Explicit target session id; overrides the query's `sid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<SessionId>,
    #[serde(default)]
    pub updates: Vec<UpdateOp>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_action_names() {
        for action in [
            PeerAction::Copy,
            PeerAction::Transfer,
            PeerAction::Destroy,
            PeerAction::Update,
        ] {
            assert_eq!(PeerAction::parse(action.as_str()), Some(action));
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{action}\""));
        }
        assert_eq!(PeerAction::parse("transfer_sesssion"), None);
        assert_eq!(PeerAction::parse("TEST"), None);
    }

    #[test]
    fn test_action_effects() {
        assert!(PeerAction::Copy.returns_data() && !PeerAction::Copy.deletes());
        assert!(PeerAction::Transfer.returns_data() && PeerAction::Transfer.deletes());
        assert!(!PeerAction::Destroy.returns_data() && PeerAction::Destroy.deletes());
        assert!(!PeerAction::Update.returns_data() && !PeerAction::Update.deletes());
    }

    #[test]
    fn test_update_body_wire_format() {
        let body: UpdateBody = serde_json::from_value(json!({
            "updates": [
                {"path": "/node1/node2/node3", "value": "Hello"},
                {"path": "/node1/node2/node4", "value": "World"}
            ]
        }))
        .unwrap();
        assert!(body.sid.is_none());
        assert_eq!(body.updates.len(), 2);
        assert_eq!(body.updates[1], UpdateOp::new("/node1/node2/node4", "World"));
    }
}
