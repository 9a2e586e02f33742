//! The facade a host application builds once per process.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{Router, http::HeaderMap};
use cloud_session_core::{
    Clock, ConfigError, DefaultHooks, SessionConfig, SessionData, SessionHooks, SessionId,
    SystemClock, Token, UpdateOp,
};
use cloud_session_store::{RecoverySnapshot, SessionStore, Sweeper};
use thiserror::Error;

use crate::{
    channel::{PeerChannel, PeerError, PeerRequest},
    handler::PeerProtocolHandler,
    middleware::CloudSessionLayer,
    protocol::PeerAction,
};

/// Setup error.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Peer channel setup failed: {0}")]
    Peer(#[from] PeerError),
    #[error("No peer channel configured")]
    NoChannel,
}

struct Shared {
    config: Arc<SessionConfig>,
    hooks: Arc<dyn SessionHooks>,
    store: SessionStore,
    channel: Arc<dyn PeerChannel>,
    local_address: Arc<str>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Builder for [`CloudSession`].
pub struct CloudSessionBuilder {
    config: SessionConfig,
    hooks: Arc<dyn SessionHooks>,
    channel: Option<Arc<dyn PeerChannel>>,
    clock: Arc<dyn Clock>,
}

impl CloudSessionBuilder {
    /// Replace the default hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the HTTP peer channel.
    #[must_use]
    pub fn channel(mut self, channel: Arc<dyn PeerChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and assemble the host.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the peer channel
    /// cannot be created.
    pub fn build(self) -> Result<CloudSession, SetupError> {
        self.config.validate()?;

        let channel = match self.channel {
            Some(channel) => channel,
            None => default_channel(&self.config, &self.hooks)?,
        };

        let store = if self.config.dev_persistence {
            SessionStore::with_snapshot(
                self.clock,
                RecoverySnapshot::new(self.config.snapshot_path.clone()),
            )
        } else {
            SessionStore::with_clock(self.clock)
        };

        let local_address: Arc<str> = Arc::from(self.config.resolve_local_address());
        tracing::info!(local_address = %local_address, peer_path = %self.config.peer_path, "Cloud session ready");

        Ok(CloudSession {
            shared: Arc::new(Shared {
                config: Arc::new(self.config),
                hooks: self.hooks,
                store,
                channel,
                local_address,
                sweeper: Mutex::new(None),
            }),
        })
    }
}

#[cfg(feature = "http-client")]
fn default_channel(
    config: &SessionConfig,
    hooks: &Arc<dyn SessionHooks>,
) -> Result<Arc<dyn PeerChannel>, SetupError> {
    let client = crate::client::HttpPeerClient::new(config.into(), Arc::clone(hooks))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "http-client"))]
fn default_channel(
    _config: &SessionConfig,
    _hooks: &Arc<dyn SessionHooks>,
) -> Result<Arc<dyn PeerChannel>, SetupError> {
    Err(SetupError::NoChannel)
}

/// Replicated session host.
///
/// Cheap to clone. Hand [`CloudSession::layer`] to the application router
/// and mount [`CloudSession::peer_router`] so other hosts can reach this one.
#[derive(Clone)]
pub struct CloudSession {
    shared: Arc<Shared>,
}

impl CloudSession {
    /// Start building a host from `config`.
    #[must_use]
    pub fn builder(config: SessionConfig) -> CloudSessionBuilder {
        CloudSessionBuilder {
            config,
            hooks: Arc::new(DefaultHooks),
            channel: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build a host with default hooks and the HTTP peer channel.
    ///
    /// # Errors
    /// See [`CloudSessionBuilder::build`].
    pub fn new(config: SessionConfig) -> Result<Self, SetupError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn hooks(&self) -> &dyn SessionHooks {
        self.shared.hooks.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.shared.store
    }

    pub(crate) fn channel(&self) -> &dyn PeerChannel {
        self.shared.channel.as_ref()
    }

    /// Address other hosts reach this one on.
    #[must_use]
    pub fn local_address(&self) -> &str {
        &self.shared.local_address
    }

    /// Tower layer resolving the session of each request.
    #[must_use]
    pub fn layer(&self) -> CloudSessionLayer {
        CloudSessionLayer::new(self.clone())
    }

    /// Server side of the peer protocol.
    #[must_use]
    pub fn peer_handler(&self) -> PeerProtocolHandler {
        PeerProtocolHandler::new(
            self.shared.store.clone(),
            Arc::clone(&self.shared.hooks),
            Arc::clone(&self.shared.config),
            Arc::clone(&self.shared.local_address),
        )
    }

    /// Router serving the peer endpoint.
    #[must_use]
    pub fn peer_router(&self) -> Router {
        self.peer_handler().router()
    }

    /// Start the recurring expiry sweep.
    ///
    /// Returns `false` if sweeping is disabled or already running. Must be
    /// called from within a Tokio runtime.
    pub fn start_sweeper(&self) -> bool {
        let Some(interval) = self.config().sweep_interval() else {
            return false;
        };
        let mut sweeper = self
            .shared
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(Sweeper::is_running) {
            return false;
        }
        *sweeper = Some(Sweeper::start(
            self.shared.store.clone(),
            interval,
            self.config().expiry_secs,
        ));
        true
    }

    /// Stop the expiry sweep, if running.
    pub async fn stop_sweeper(&self) {
        let sweeper = self
            .shared
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    /// Remove every expired session now.
    pub fn clean_all(&self) -> Vec<SessionId> {
        self.shared.store.sweep_now(self.config().expiry_secs)
    }

    fn request_token(&self, headers: &HeaderMap) -> Option<Token> {
        let hooks = self.hooks();
        hooks
            .extract_token(headers, &self.config().token_name)
            .and_then(|raw| hooks.parse_token(&raw, headers, self.local_address()))
    }

    fn signed(&self, action: PeerAction) -> PeerRequest {
        PeerRequest::new(action).with_signing_key(self.config().signing_key.clone())
    }

    /// Destroy the session of the request that carries `headers`.
    ///
    /// The local copy is always dropped; when another host owns the
    /// session, that host is told to drop it as well. A request without a
    /// valid token is a no-op.
    ///
    /// # Errors
    /// Returns error if the owning host cannot be reached.
    pub async fn destroy(&self, headers: &HeaderMap) -> Result<(), PeerError> {
        let Some(token) = self.request_token(headers) else {
            return Ok(());
        };
        let id = self
            .hooks()
            .derive(&token.secret, &self.config().signing_key)
            .map_err(|e| PeerError::InvalidRequest(e.to_string()))?;
        self.shared.store.delete(&id);
        tracing::debug!(session_id = %id, owner = %token.owner_host, "Destroying session");

        if token.owner_host == self.local_address() {
            return Ok(());
        }
        // The owner is client-chosen; the token alone authorizes the destroy.
        let owner = token.owner_host.clone();
        self.channel()
            .request(&owner, PeerRequest::new(PeerAction::Destroy).with_token(token))
            .await
            .map(|_| ())
    }

    /// Copy a session from `host` without taking ownership.
    ///
    /// Targets `id` when given, otherwise the session of the request.
    ///
    /// # Errors
    /// Returns error if `host` cannot be reached.
    pub async fn get_session(
        &self,
        headers: &HeaderMap,
        host: &str,
        id: Option<SessionId>,
    ) -> Result<Option<SessionData>, PeerError> {
        let mut request = self.signed(PeerAction::Copy);
        if let Some(token) = self.request_token(headers) {
            request = request.with_token(token);
        }
        if let Some(id) = id {
            request = request.with_target(id);
        }
        self.channel().request(host, request).await
    }

    /// Apply path updates to a session held by `host`.
    ///
    /// Targets `id` when given, otherwise the session of the request.
    ///
    /// # Errors
    /// Returns error if `host` cannot be reached.
    pub async fn update_session(
        &self,
        headers: &HeaderMap,
        host: &str,
        updates: Vec<UpdateOp>,
        id: Option<SessionId>,
    ) -> Result<(), PeerError> {
        let mut request = self.signed(PeerAction::Update).with_updates(updates);
        if let Some(token) = self.request_token(headers) {
            request = request.with_token(token);
        }
        if let Some(id) = id {
            request = request.with_target(id);
        }
        self.channel().request(host, request).await.map(|_| ())
    }
}
