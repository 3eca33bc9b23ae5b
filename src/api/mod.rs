//! REST API server for onair.
//!
//! Provides HTTP endpoints for:
//! - DJ console control (go live, source switching, mute, gain, noise gate)
//! - Listener playback control and station status

pub mod error;
pub mod routes;

use crate::broadcast::BroadcastSession;
use crate::listener::ListenerSession;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::dj::DjState;
pub use routes::listener::ListenerState;

enum Mode {
    Dj(DjState),
    Listener(ListenerState),
}

pub struct ApiServer {
    port: u16,
    mode: Mode,
}

impl ApiServer {
    pub fn dj(port: u16, session: Arc<BroadcastSession>) -> Self {
        Self {
            port,
            mode: Mode::Dj(DjState { session }),
        }
    }

    pub fn listener(port: u16, session: Arc<ListenerSession>) -> Self {
        Self {
            port,
            mode: Mode::Listener(ListenerState { session }),
        }
    }

    pub fn router(&self) -> Router {
        let app = Router::new()
            // Root and version endpoints
            .route("/", get(status))
            .route("/version", get(version));

        let app = match &self.mode {
            Mode::Dj(state) => app.nest("/dj", routes::dj::router(state.clone())),
            Mode::Listener(state) => {
                app.nest("/listener", routes::listener::router(state.clone()))
            }
        };

        app.layer(ServiceBuilder::new())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /version       - Get version info");
        match self.mode {
            Mode::Dj(_) => {
                info!("  GET  /dj/status     - Broadcast and switch status");
                info!("  GET  /dj/level      - Latest input level");
                info!("  POST /dj/live       - Go live on a source");
                info!("  POST /dj/source/switch - Hot-swap the on-air source");
                info!("  POST /dj/end        - End the broadcast");
                info!("  POST /dj/mute       - Set or toggle mute");
                info!("  POST /dj/gain       - Set output gain");
                info!("  POST /dj/noise-gate - Configure the noise gate");
            }
            Mode::Listener(_) => {
                info!("  GET  /listener/status - Playback and station status");
                info!("  POST /listener/play   - Start playback");
                info!("  POST /listener/pause  - Pause playback");
                info!("  POST /listener/stop   - Stop playback");
                info!("  POST /listener/volume - Set volume");
                info!("  POST /listener/mute   - Set or toggle mute");
            }
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "onair",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "onair"
    }))
}
