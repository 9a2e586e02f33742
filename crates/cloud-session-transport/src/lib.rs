//! Routing middleware and peer replication for cloud sessions.
//!
//! Provides:
//! - `CloudSession` - Per-process facade (layer, peer router, sweeper, operations)
//! - `CloudSessionLayer` - Tower layer resolving the session of each request
//! - `Session` - Resolved session view (axum extractor)
//! - `PeerProtocolHandler` - Server side of copy/transfer/destroy/update
//! - `PeerChannel` - Client side abstraction, `HttpPeerClient` (feature: http-client)

pub mod api;
pub mod channel;
#[cfg(feature = "http-client")]
pub mod client;
pub mod handler;
pub mod middleware;
pub mod protocol;
pub mod session;

pub use api::{CloudSession, CloudSessionBuilder, SetupError};
pub use channel::{PeerChannel, PeerError, PeerRequest};
#[cfg(feature = "http-client")]
pub use client::{HttpPeerClient, PeerClientConfig};
pub use handler::{PeerProtocolHandler, PeerReply};
pub use middleware::{CloudSessionLayer, CloudSessionService, Resolution};
pub use protocol::{PeerAction, PeerQuery, UpdateBody};
pub use session::Session;
