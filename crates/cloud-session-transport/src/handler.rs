//! Server side of the peer replication protocol.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use cloud_session_core::{
    SessionConfig, SessionData, SessionHooks, SessionId, UpdateOp, apply_updates,
};
use cloud_session_store::SessionStore;
use subtle::ConstantTimeEq;

use crate::protocol::{PeerAction, PeerQuery, UpdateBody};

/// Reply of the peer endpoint.
///
/// Unauthorized, malformed and no-op calls all get the same empty reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerReply {
    Empty,
    /// Serialized session data.
    Data(String),
}

impl IntoResponse for PeerReply {
    fn into_response(self) -> Response {
        match self {
            Self::Empty => ().into_response(),
            Self::Data(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
        }
    }
}

/// Services copy/transfer/destroy/update calls against the local store.
#[derive(Clone)]
pub struct PeerProtocolHandler {
    store: SessionStore,
    hooks: Arc<dyn SessionHooks>,
    config: Arc<SessionConfig>,
    local_address: Arc<str>,
}

impl PeerProtocolHandler {
    #[must_use]
    pub fn new(
        store: SessionStore,
        hooks: Arc<dyn SessionHooks>,
        config: Arc<SessionConfig>,
        local_address: Arc<str>,
    ) -> Self {
        Self {
            store,
            hooks,
            config,
            local_address,
        }
    }

    /// Axum router serving the endpoint at the configured peer path.
    #[must_use]
    pub fn router(self) -> Router {
        let path = self.config.peer_path.clone();
        Router::new()
            .route(&path, post(peer_endpoint))
            .with_state(self)
    }

    /// Handle one call.
    pub fn handle(&self, query: &PeerQuery, headers: &HeaderMap, body: &[u8]) -> PeerReply {
        let Some(action) = query.action.as_deref().and_then(PeerAction::parse) else {
            tracing::debug!(action = ?query.action, "Ignoring peer call with unknown action");
            return PeerReply::Empty;
        };

        let update = if action == PeerAction::Update {
            match serde_json::from_slice::<UpdateBody>(body) {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!("Ignoring malformed update body: {e}");
                    return PeerReply::Empty;
                }
            }
        } else {
            UpdateBody::default()
        };

        let Some(id) = self.authorize(query, headers, update.sid) else {
            tracing::debug!(%action, "Unauthorized peer call");
            return PeerReply::Empty;
        };

        tracing::debug!(session_id = %id, %action, "Peer call");
        self.apply(action, &id, &update.updates)
    }

    /// Resolve the target session, or `None` if the caller may not act.
    fn authorize(
        &self,
        query: &PeerQuery,
        headers: &HeaderMap,
        body_sid: Option<SessionId>,
    ) -> Option<SessionId> {
        let token_id = self
            .hooks
            .extract_token(headers, &self.config.token_name)
            .and_then(|raw| self.hooks.parse_token(&raw, headers, &self.local_address))
            .and_then(|token| {
                self.hooks
                    .derive(&token.secret, &self.config.signing_key)
                    .inspect_err(|e| tracing::warn!("Cannot derive session id: {e}"))
                    .ok()
            });

        if self.key_matches(query.key.as_deref()) {
            body_sid
                .or_else(|| query.sid.clone().map(SessionId::new))
                .or(token_id)
        } else {
            token_id.filter(|id| self.store.contains(id))
        }
    }

    fn key_matches(&self, provided: Option<&str>) -> bool {
        provided.is_some_and(|key| {
            bool::from(key.as_bytes().ct_eq(self.config.signing_key.as_bytes()))
        })
    }

    fn apply(&self, action: PeerAction, id: &SessionId, updates: &[UpdateOp]) -> PeerReply {
        match action {
            PeerAction::Copy => self
                .store
                .get(id)
                .map_or(PeerReply::Empty, |record| self.encode(id, &record.data)),
            PeerAction::Transfer => {
                let Some(record) = self.store.take(id) else {
                    return PeerReply::Empty;
                };
                let reply = self.encode(id, &record.data);
                if reply == PeerReply::Empty {
                    // Keep the data if it could not be sent.
                    self.store.insert(id.clone(), record);
                }
                reply
            }
            PeerAction::Destroy => {
                self.store.delete(id);
                PeerReply::Empty
            }
            PeerAction::Update => {
                let applied = self
                    .store
                    .with_data_mut(id, |data| apply_updates(data, updates));
                match applied {
                    Some(count) => {
                        tracing::debug!(session_id = %id, applied = count, total = updates.len(), "Session updated");
                    }
                    None => tracing::warn!(session_id = %id, "Update for unknown session ignored"),
                }
                PeerReply::Empty
            }
        }
    }

    fn encode(&self, id: &SessionId, data: &SessionData) -> PeerReply {
        match self.hooks.serialize(Some(data)) {
            Ok(body) => PeerReply::Data(body),
            Err(e) => {
                tracing::error!(session_id = %id, "Failed to serialize session: {e}");
                PeerReply::Empty
            }
        }
    }
}

async fn peer_endpoint(
    State(handler): State<PeerProtocolHandler>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> PeerReply {
    let query = Query::<PeerQuery>::try_from_uri(&uri)
        .map(|Query(query)| query)
        .unwrap_or_default();
    handler.handle(&query, &headers, &body)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use cloud_session_core::{DefaultHooks, derive_session_id};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    const KEY: &str = "mySecretKey";
    const SECRET: &str = "1234567890";

    fn setup() -> (SessionStore, PeerProtocolHandler, SessionId) {
        let store = SessionStore::new();
        let config = SessionConfig::default()
            .with_signing_key(KEY)
            .with_token_name("my.sid");
        let handler = PeerProtocolHandler::new(
            store.clone(),
            Arc::new(DefaultHooks),
            Arc::new(config),
            Arc::from("10.0.0.1"),
        );
        let id = derive_session_id(SECRET, KEY).unwrap();
        (store, handler, id)
    }

    fn seed(store: &SessionStore, id: &SessionId) {
        store.replace_data(id, json!({"user": "alice"}).as_object().cloned().unwrap());
    }

    fn query(action: &str, key: Option<&str>) -> PeerQuery {
        PeerQuery {
            action: Some(action.to_string()),
            key: key.map(str::to_string),
            sid: None,
        }
    }

    fn token_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("my.sid", format!("10.0.0.1|{SECRET}").parse().unwrap());
        headers
    }

    #[test]
    fn test_copy_keeps_record() {
        let (store, handler, id) = setup();
        seed(&store, &id);

        let reply = handler.handle(&query("copy_session", Some(KEY)), &token_headers(), b"");
        assert_eq!(reply, PeerReply::Data(r#"{"user":"alice"}"#.to_string()));
        assert!(store.contains(&id));
    }

    #[test]
    fn test_transfer_removes_record() {
        let (store, handler, id) = setup();
        seed(&store, &id);

        let reply = handler.handle(&query("transfer_session", Some(KEY)), &token_headers(), b"");
        assert_eq!(reply, PeerReply::Data(r#"{"user":"alice"}"#.to_string()));
        assert!(!store.contains(&id));

        let again = handler.handle(&query("transfer_session", Some(KEY)), &token_headers(), b"");
        assert_eq!(again, PeerReply::Empty);
    }

    #[test]
    fn test_destroy_removes_record() {
        let (store, handler, id) = setup();
        seed(&store, &id);

        let reply = handler.handle(&query("destroy_session", Some(KEY)), &token_headers(), b"");
        assert_eq!(reply, PeerReply::Empty);
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_update_in_place() {
        let (store, handler, id) = setup();
        store.ensure(&id);

        let body = json!({"updates": [
            {"path": "/node1/node2/node3", "value": "Hello"},
            {"path": "/node1/node2/node4", "value": "World"}
        ]})
        .to_string();
        let reply = handler.handle(
            &query("update_session", Some(KEY)),
            &token_headers(),
            body.as_bytes(),
        );
        assert_eq!(reply, PeerReply::Empty);

        let data = store.get(&id).unwrap().data;
        assert_eq!(data["node1"]["node2"]["node3"], "Hello");
        assert_eq!(data["node1"]["node2"]["node4"], "World");
    }

    #[test]
    fn test_update_explicit_target_with_key() {
        let (store, handler, _) = setup();
        let other = SessionId::new("other-session");
        store.ensure(&other);

        let body = json!({"sid": "other-session", "updates": [{"path": "a", "value": 1}]}).to_string();
        handler.handle(&query("update_session", Some(KEY)), &HeaderMap::new(), body.as_bytes());
        assert_eq!(store.get(&other).unwrap().data["a"], 1);
    }

    #[test]
    fn test_update_unknown_session_is_ignored() {
        let (store, handler, id) = setup();
        let body = json!({"updates": [{"path": "a", "value": 1}]}).to_string();
        let reply = handler.handle(&query("update_session", Some(KEY)), &token_headers(), body.as_bytes());
        assert_eq!(reply, PeerReply::Empty);
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_update_without_key_or_resident_token_is_refused() {
        let (store, handler, id) = setup();
        let other = SessionId::new("other-session");
        seed(&store, &other);
        let body = json!({"sid": "other-session", "updates": [{"path": "a", "value": 1}]})
            .to_string();

        // No token at all.
        let reply = handler.handle(&query("update_session", None), &HeaderMap::new(), body.as_bytes());
        assert_eq!(reply, PeerReply::Empty);

        // Token for a session this host does not hold.
        let reply = handler.handle(&query("update_session", None), &token_headers(), body.as_bytes());
        assert_eq!(reply, PeerReply::Empty);

        assert!(!store.contains(&id));
        assert_eq!(store.get(&other).unwrap().data, json!({"user": "alice"}).as_object().cloned().unwrap());
    }

    #[test]
    fn test_update_without_key_targets_resident_token_session() {
        let (store, handler, id) = setup();
        let other = SessionId::new("other-session");
        seed(&store, &id);
        seed(&store, &other);

        // The body sid is ignored without the key.
        let body = json!({"sid": "other-session", "updates": [{"path": "a", "value": 1}]})
            .to_string();
        handler.handle(&query("update_session", None), &token_headers(), body.as_bytes());

        assert_eq!(store.get(&id).unwrap().data["a"], 1);
        assert!(store.get(&other).unwrap().data.get("a").is_none());
    }

    #[test]
    fn test_token_alone_authorizes_resident_session() {
        let (store, handler, id) = setup();

        // Not resident: nothing to act on.
        let reply = handler.handle(&query("copy_session", None), &token_headers(), b"");
        assert_eq!(reply, PeerReply::Empty);

        seed(&store, &id);
        let reply = handler.handle(&query("copy_session", None), &token_headers(), b"");
        assert!(matches!(reply, PeerReply::Data(_)));
    }

    #[test]
    fn test_explicit_sid_needs_key() {
        let (store, handler, _) = setup();
        let victim = SessionId::new("victim");
        seed(&store, &victim);

        let mut q = query("destroy_session", Some("wrong-key"));
        q.sid = Some("victim".to_string());
        handler.handle(&q, &HeaderMap::new(), b"");
        assert!(store.contains(&victim));

        q.key = Some(KEY.to_string());
        handler.handle(&q, &HeaderMap::new(), b"");
        assert!(!store.contains(&victim));
    }

    #[test]
    fn test_malformed_calls_do_nothing() {
        let (store, handler, id) = setup();
        seed(&store, &id);
        let before = store.get(&id).unwrap();

        for q in [
            PeerQuery::default(),
            query("TEST", Some(KEY)),
            query("transfer_sesssion", Some(KEY)),
        ] {
            assert_eq!(handler.handle(&q, &token_headers(), b""), PeerReply::Empty);
        }
        let reply = handler.handle(&query("update_session", Some(KEY)), &token_headers(), b"{not json");
        assert_eq!(reply, PeerReply::Empty);

        let mut invalid_cookie = HeaderMap::new();
        invalid_cookie.insert(axum::http::header::COOKIE, " ".parse().unwrap());
        let reply = handler.handle(&query("transfer_session", None), &invalid_cookie, b"");
        assert_eq!(reply, PeerReply::Empty);

        assert_eq!(store.get(&id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_router_serves_endpoint() {
        let (store, handler, id) = setup();
        seed(&store, &id);
        let app = handler.router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cloud-session?action=copy_session&key=mySecretKey")
                    .header("cookie", format!("my.sid=10.0.0.1|{SECRET}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let data: SessionData = serde_json::from_slice(&body).unwrap();
        assert_eq!(data["user"], "alice");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cloud-session?action=copy_session&key=nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
