//! Shared fixtures: an in-process fleet of hosts.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header},
    routing::get,
};
use cloud_session_core::{DefaultHooks, SessionConfig, SessionData, SessionHooks};
use cloud_session_transport::{
    CloudSession, PeerAction, PeerChannel, PeerError, PeerProtocolHandler, PeerQuery, PeerReply,
    PeerRequest, Session, UpdateBody,
};
use tower::ServiceExt;

pub const HOST_A: &str = "10.0.0.1";
pub const HOST_B: &str = "10.0.0.2";
pub const KEY: &str = "mySecretKey";
pub const TOKEN_NAME: &str = "x-cloud-session";

/// Routes peer calls to in-process handlers and records them.
#[derive(Default)]
pub struct LoopbackChannel {
    hosts: Mutex<HashMap<String, PeerProtocolHandler>>,
    requests: Mutex<Vec<(String, PeerRequest)>>,
}

impl LoopbackChannel {
    pub fn register(&self, host: &str, handler: PeerProtocolHandler) {
        self.hosts.lock().unwrap().insert(host.to_string(), handler);
    }

    pub fn calls(&self) -> Vec<(String, PeerAction)> {
        self.requests()
            .into_iter()
            .map(|(host, request)| (host, request.action))
            .collect()
    }

    /// Every request issued so far, with the host it went to.
    pub fn requests(&self) -> Vec<(String, PeerRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerChannel for LoopbackChannel {
    async fn request(
        &self,
        host: &str,
        request: PeerRequest,
    ) -> Result<Option<SessionData>, PeerError> {
        self.requests
            .lock()
            .unwrap()
            .push((host.to_string(), request.clone()));

        let handler = self
            .hosts
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or_else(|| PeerError::Unreachable {
                host: host.to_string(),
                message: "no such host".to_string(),
            })?;

        let query = PeerQuery {
            action: Some(request.action.as_str().to_string()),
            key: request.signing_key.clone(),
            sid: request.target.as_ref().map(ToString::to_string),
        };
        let mut headers = HeaderMap::new();
        if let Some(token) = &request.token {
            headers.insert(
                HeaderName::from_static(TOKEN_NAME),
                HeaderValue::from_str(&token.encode()).unwrap(),
            );
        }
        let body = if request.action == PeerAction::Update {
            serde_json::to_vec(&UpdateBody {
                sid: request.target.clone(),
                updates: request.updates.clone(),
            })
            .unwrap()
        } else {
            Vec::new()
        };

        match handler.handle(&query, &headers, &body) {
            PeerReply::Empty => Ok(None),
            PeerReply::Data(raw) => Ok(Some(DefaultHooks.deserialize(&raw).unwrap())),
        }
    }
}

pub fn config(local: &str) -> SessionConfig {
    SessionConfig::default()
        .with_signing_key(KEY)
        .with_local_address(local)
        .with_excluded_prefix("/static")
        .with_sweep_interval_secs(-1)
}

/// Build a host on the shared channel and register its peer handler.
pub fn host(channel: &Arc<LoopbackChannel>, config: SessionConfig) -> CloudSession {
    let local = config.local_address.clone().unwrap();
    let session = CloudSession::builder(config)
        .channel(channel.clone())
        .build()
        .unwrap();
    channel.register(&local, session.peer_handler());
    session
}

/// Increment a counter kept in the session.
async fn count(session: Session) -> String {
    let next = session
        .get("count")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        + 1;
    session.insert("count", next);
    next.to_string()
}

pub fn app(session: &CloudSession) -> Router {
    Router::new()
        .route("/count", get(count))
        .route("/static/app.js", get(|| async { "static" }))
        .layer(session.layer())
        .merge(session.peer_router())
}

pub async fn get_with_cookie(app: &Router, path: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `name=value` part of every `Set-Cookie` header.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string())
        .collect()
}

/// A host with development persistence writing under `dir`.
pub fn dev_host(channel: &Arc<LoopbackChannel>, local: &str, dir: &Path) -> CloudSession {
    host(channel, config(local).with_dev_persistence(dir.join("session")))
}

pub fn cookie_for(host: &str, secret: &str) -> String {
    format!("{TOKEN_NAME}={host}|{secret}")
}
