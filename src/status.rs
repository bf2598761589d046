//! Read-only playout status.
//!
//! The orchestrator publishes a snapshot after every transition. When a bind
//! address is configured, a tiny HTTP server exposes it for dashboards and
//! health checks; it never influences playback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::orchestrator::Phase;
use crate::session::PlaybackSession;
use crate::shutdown::Shutdown;

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub session_id: Uuid,
    pub title: String,
    pub path: String,
    pub index: usize,
    pub elapsed_s: u64,
    pub duration_s: Option<u64>,
    pub overlay: Option<String>,
    /// False once the text source rejected an update for this item.
    pub overlay_enabled: bool,
}

impl From<&PlaybackSession> for NowPlaying {
    fn from(s: &PlaybackSession) -> Self {
        Self {
            session_id: s.id,
            title: s.item.title.clone(),
            path: s.item.path.to_string_lossy().to_string(),
            index: s.index,
            elapsed_s: s.elapsed.as_secs(),
            duration_s: s.duration.map(|d| d.as_secs()),
            overlay: s.last_overlay().map(str::to_string),
            overlay_enabled: s.overlay_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub version: String,
    pub phase: Phase,
    pub now: Option<NowPlaying>,
    pub catalog_size: usize,
    pub consecutive_failures: usize,
    pub reconnects: u32,
    pub started_at: String,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        let started_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            phase: Phase::Reconnecting,
            now: None,
            catalog_size: 0,
            consecutive_failures: 0,
            reconnects: 0,
            started_at,
        }
    }

    pub fn shared() -> SharedStatus {
        Arc::new(RwLock::new(Self::new()))
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(status)
}

async fn get_status(State(status): State<SharedStatus>) -> Json<StatusSnapshot> {
    Json(status.read().await.clone())
}

/// Serve the status API until shutdown.
pub async fn serve(addr: SocketAddr, status: SharedStatus, mut shutdown: Shutdown) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("status endpoint on http://{addr}/api/v1/status");
    axum::serve(listener, build_router(status))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
