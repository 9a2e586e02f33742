//! Per-request session routing.
//!
//! Every request that is not excluded ends up with a [`Session`] extension
//! before the inner service runs. If the client's token names another host
//! as owner, the session is pulled from that host first and this host
//! becomes the owner.

use std::task::{Context, Poll};

use axum::http::{HeaderMap, HeaderValue, Request, Response, header::SET_COOKIE};
use cloud_session_core::{SessionData, Token};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::{CloudSession, Session, channel::PeerRequest};

/// Outcome of resolving one request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub session: Session,
    /// Token the client should hold after this request.
    pub token: Token,
    /// `Set-Cookie` value, when the client's token has to change.
    pub set_cookie: Option<String>,
}

impl CloudSession {
    /// Resolve the session for a request.
    ///
    /// `None` means the request bypasses session handling. Never fails: a
    /// bad token or an unreachable owner yields a fresh, empty session.
    pub async fn resolve(&self, headers: &HeaderMap, path: &str) -> Option<Resolution> {
        let config = self.config();
        let hooks = self.hooks();
        let store = self.store();
        let local = self.local_address();

        if hooks.bypass(path, config) {
            return None;
        }

        let parsed = hooks
            .extract_token(headers, &config.token_name)
            .and_then(|raw| hooks.parse_token(&raw, headers, local));
        let (mut token, minted) = match parsed {
            Some(token) => (token, false),
            None => {
                tracing::debug!("No valid session token, minting a new one");
                (Token::mint(local), true)
            }
        };
        let mut reissue = minted;

        let id = match hooks.derive(&token.secret, &config.signing_key) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Cannot derive session id: {e}");
                return None;
            }
        };

        let created = store.ensure(&id);
        // A minted id is brand new; only a returning client can be restored.
        if created && !minted && config.dev_persistence {
            if let Some(data) = store.recover(&id) {
                tracing::debug!(session_id = %id, "Hydrated session from recovery snapshot");
                store.replace_data(&id, data);
            }
        }
        store.touch(&id);

        if token.owner_host != local {
            let owner = token.owner_host.clone();
            // The owner is client-chosen; the token alone authorizes the fetch.
            let request = PeerRequest::new(config.fetch_action.into()).with_token(token.clone());
            tracing::debug!(session_id = %id, host = %owner, action = %request.action, "Fetching remote session");

            let data = match self.channel().request(&owner, request).await {
                Ok(data) => data.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(session_id = %id, host = %owner, "Remote session fetch failed, continuing empty: {e}");
                    SessionData::new()
                }
            };
            store.replace_data(&id, data);
            token = token.with_owner(local);
            reissue = true;
        }

        if config.dev_persistence {
            if let Err(e) = store.persist(&id) {
                tracing::error!(session_id = %id, "Failed to write recovery snapshot: {e}");
            }
        }

        let set_cookie = reissue
            .then(|| hooks.write_cookie(&config.token_name, &token.encode(), config.secure));
        Some(Resolution {
            session: Session::new(id, store.clone()),
            token,
            set_cookie,
        })
    }
}

/// A `Layer` that resolves the session of every request.
#[derive(Clone)]
pub struct CloudSessionLayer {
    session: CloudSession,
}

impl CloudSessionLayer {
    #[must_use]
    pub const fn new(session: CloudSession) -> Self {
        Self { session }
    }
}

impl<S> Layer<S> for CloudSessionLayer {
    type Service = CloudSessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CloudSessionService {
            inner,
            session: self.session.clone(),
        }
    }
}

/// A `Service` that attaches the resolved [`Session`] and forwards the
/// token cookie on the response.
#[derive(Clone)]
pub struct CloudSessionService<S> {
    inner: S,
    session: CloudSession,
}

impl<S, B, ResBody> Service<Request<B>> for CloudSessionService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // Keep the service that was polled ready for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let session = self.session.clone();

        Box::pin(async move {
            if request.extensions().get::<Session>().is_some() {
                return inner.call(request).await;
            }

            let resolution = session
                .resolve(request.headers(), request.uri().path())
                .await;
            let Some(resolution) = resolution else {
                return inner.call(request).await;
            };

            request.extensions_mut().insert(resolution.session);
            let mut response = inner.call(request).await?;

            if let Some(cookie) = resolution.set_cookie {
                match HeaderValue::from_str(&cookie) {
                    Ok(value) => {
                        response.headers_mut().append(SET_COOKIE, value);
                    }
                    Err(e) => tracing::warn!("Session cookie is not a valid header value: {e}"),
                }
            }
            Ok(response)
        })
    }
}
