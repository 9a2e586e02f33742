//! HTTP implementation of [`PeerChannel`].

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use cloud_session_core::{SessionConfig, SessionData, SessionHooks};
use http::header::CONTENT_TYPE;

use crate::{
    channel::{PeerChannel, PeerError, PeerRequest},
    protocol::{PeerAction, PeerQuery, UpdateBody},
};

/// Settings of the HTTP peer client.
#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    /// Port every peer serves the endpoint on.
    pub port: u16,
    /// Use HTTPS.
    pub secure: bool,
    /// Endpoint path.
    pub path: String,
    /// Header carrying the client token.
    pub token_name: String,
    /// Whole-request timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl From<&SessionConfig> for PeerClientConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            port: config.peer_port,
            secure: config.secure,
            path: config.peer_path.clone(),
            token_name: config.token_name.clone(),
            timeout: config.peer_timeout(),
            connect_timeout: config.peer_connect_timeout(),
        }
    }
}

/// Peer channel speaking the replication protocol over HTTP(S).
#[derive(Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
    config: PeerClientConfig,
    hooks: Arc<dyn SessionHooks>,
}

impl HttpPeerClient {
    /// Create a client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: PeerClientConfig, hooks: Arc<dyn SessionHooks>) -> Result<Self, PeerError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| PeerError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            hooks,
        })
    }

    /// URL of the replication endpoint on `host`.
    ///
    /// `host` must be an IP address or a plain DNS name; anything that could
    /// alter the URL is rejected.
    ///
    /// # Errors
    /// Returns error if `host` is not a valid peer address.
    pub fn endpoint(&self, host: &str) -> Result<String, PeerError> {
        let scheme = if self.config.secure { "https" } else { "http" };
        let authority = match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.config.port).to_string(),
            Err(_) if is_dns_name(host) => format!("{host}:{}", self.config.port),
            Err(_) => {
                return Err(PeerError::InvalidRequest(format!(
                    "Invalid peer host: {host:?}"
                )));
            }
        };
        Ok(format!("{scheme}://{authority}{}", self.config.path))
    }

    fn map_transport_error(host: &str, err: &reqwest::Error) -> PeerError {
        if err.is_timeout() {
            PeerError::Timeout {
                host: host.to_string(),
            }
        } else {
            PeerError::Unreachable {
                host: host.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn is_dns_name(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[async_trait]
impl PeerChannel for HttpPeerClient {
    async fn request(
        &self,
        host: &str,
        request: PeerRequest,
    ) -> Result<Option<SessionData>, PeerError> {
        let query = PeerQuery {
            action: Some(request.action.as_str().to_string()),
            key: request.signing_key,
            sid: request.target.as_ref().map(ToString::to_string),
        };

        let mut builder = self.client.post(self.endpoint(host)?).query(&query);
        if let Some(token) = &request.token {
            builder = builder.header(self.config.token_name.as_str(), token.encode());
        }
        if request.action == PeerAction::Update {
            let body = UpdateBody {
                sid: request.target,
                updates: request.updates,
            };
            let json = serde_json::to_vec(&body)
                .map_err(|e| PeerError::InvalidRequest(e.to_string()))?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(json);
        }

        tracing::debug!(host, action = %request.action, "Calling peer");
        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_transport_error(host, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                host: host.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_transport_error(host, &e))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        self.hooks
            .deserialize(&body)
            .map(Some)
            .map_err(|e| PeerError::Decode {
                host: host.to_string(),
                message: e.to_string(),
            })
    }
}
