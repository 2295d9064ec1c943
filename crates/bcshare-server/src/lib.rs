//! HTTP front end: the `/ws` signaling endpoint and the expiring relay API.

pub mod config;
pub mod relay_http;
mod signal_ws;

pub use config::ServerConfig;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use signaling::SignalingHub;
use std::sync::Arc;
use storage::RelayStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Room for multipart framing around the largest accepted upload.
const BODY_SLACK: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SignalingHub>,
    pub relay: Arc<RelayStore>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.relay.max_upload_bytes().saturating_add(BODY_SLACK)).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(relay_http::health))
        .route("/ws", get(signal_ws::upgrade))
        .route("/api/lightning-config", get(relay_http::lightning_config))
        .route("/api/lightning-validate-code", post(relay_http::validate_code))
        .route("/api/lightning-upload-init", post(relay_http::upload_init))
        .route("/api/lightning-upload-chunk", post(relay_http::upload_chunk))
        .route("/api/lightning-upload", post(relay_http::upload))
        .route("/api/lightning-metadata/:id", get(relay_http::metadata))
        .route("/api/file-download/:id", get(relay_http::download))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct BcshareServer {
    cfg: ServerConfig,
    state: AppState,
}

impl BcshareServer {
    pub fn new(cfg: ServerConfig) -> Result<Self> {
        let relay = RelayStore::new(&cfg.relay).context("Failed to open relay store")?;
        Ok(Self::with_relay(cfg, Arc::new(relay)))
    }

    /// Use an already built relay store (e.g. one on a manual clock).
    pub fn with_relay(cfg: ServerConfig, relay: Arc<RelayStore>) -> Self {
        let hub = Arc::new(SignalingHub::new(cfg.hub.clone()));
        Self {
            cfg,
            state: AppState { hub, relay },
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve on `listener` until `shutdown` fires, sweeping the relay store
    /// in the background.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        let sweeper = self
            .state
            .relay
            .clone()
            .spawn_sweeper(self.cfg.relay.sweep_interval(), shutdown.child_token());

        tracing::info!("Listening on {}", addr);
        tracing::info!(
            "Relay TTL {}s, sweep every {}s, initiator policy {}",
            self.cfg.relay.ttl_secs,
            self.cfg.relay.sweep_interval_secs,
            self.cfg.hub.initiator
        );

        let app = router(self.state.clone());
        let stop = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .context("Server error")?;

        shutdown.cancel();
        let _ = sweeper.await;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Bind the configured address and serve until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.cfg.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.cfg.bind))?;

        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutting down");
                    on_signal.cancel();
                }
                Err(e) => tracing::warn!("Cannot listen for Ctrl+C: {}", e),
            }
        });

        self.serve(listener, shutdown).await
    }
}
