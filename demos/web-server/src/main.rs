//! Example web server sharing sessions with its peers.
//!
//! Run with: cargo run -p cloud-session-web-example
//!
//! Start a second copy on another machine (or with another
//! `local_address`) and point a load balancer at both; the visit counter
//! follows the browser from host to host.
//!
//! Set `CLOUD_SESSION_CONFIG` to a JSON file to override the defaults, e.g.
//! `{"signing_key": "k", "peer_port": 3000, "dev_persistence": true}`.

use std::{net::SocketAddr, path::Path};

use anyhow::Context as _;
use axum::{
    Router,
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse},
    routing::get,
};
use cloud_session_core::SessionConfig;
use cloud_session_transport::{CloudSession, Session};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "CLOUD_SESSION_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cloud_session_transport=debug".into()),
        )
        .init();

    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => load_config(Path::new(&path))?,
        Err(_) => SessionConfig::default(),
    };
    let port = config.peer_port;

    let cloud = CloudSession::new(config).context("failed to set up cloud sessions")?;
    cloud.start_sweeper();

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/logout", get(logout_handler))
        .layer(cloud.layer())
        .with_state(cloud.clone())
        .merge(cloud.peer_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(local_address = %cloud.local_address(), "Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cloud.stop_sweeper().await;
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<SessionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

async fn index_handler(State(cloud): State<CloudSession>, session: Session) -> Html<String> {
    let visits = session.update(|data| {
        let next = data
            .get("visits")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
            + 1;
        data.insert("visits".to_string(), next.into());
        next
    });

    Html(format!(
        "<!doctype html><title>cloud session</title>\
         <p>Served by <b>{}</b></p>\
         <p>Visits in this session: <b>{visits}</b></p>\
         <p><a href=\"/logout\">Log out</a></p>",
        cloud.local_address()
    ))
}

async fn logout_handler(
    State(cloud): State<CloudSession>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match cloud.destroy(&headers).await {
        Ok(()) => Html("<p>Session destroyed. <a href=\"/\">Start over</a></p>".to_string()),
        Err(e) => {
            tracing::warn!("Owner did not confirm destroy: {e}");
            Html(format!("<p>Destroyed locally, owner unreachable: {e}</p>"))
        }
    }
}
