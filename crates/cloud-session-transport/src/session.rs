//! Resolved session view handed to request handlers.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use cloud_session_core::{SessionData, SessionId};
use cloud_session_store::SessionStore;
use serde_json::Value;

/// The session a request resolved to.
///
/// Reads and writes go straight to the owning host's store, so changes are
/// visible to the next request and to peer calls immediately.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    store: SessionStore,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub const fn new(id: SessionId, store: SessionStore) -> Self {
        Self { id, store }
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Copy of the whole payload. Empty if the record has been removed.
    #[must_use]
    pub fn data(&self) -> SessionData {
        self.store
            .get(&self.id)
            .map(|record| record.data)
            .unwrap_or_default()
    }

    /// Copy of one top-level value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store
            .get(&self.id)
            .and_then(|record| record.data.get(key).cloned())
    }

    /// Set one top-level value. Returns the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let (key, value) = (key.into(), value.into());
        self.update(|data| data.insert(key, value))
    }

    /// Remove one top-level value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.update(|data| data.remove(key))
    }

    /// Mutate the payload in place. Recreates the record if it was removed
    /// while the request was running.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        self.store.upsert_data(&self.id, f)
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Session layer is not installed for this route",
        ))
    }
}
