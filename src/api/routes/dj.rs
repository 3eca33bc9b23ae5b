//! DJ control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Broadcast status and live level (GET /status, GET /level)
//! - Going live, switching and ending (POST /live, /source/switch, /end)
//! - Control panel (POST /mute, /gain, /noise-gate)

use crate::api::error::{ApiError, ApiResult};
use crate::broadcast::BroadcastSession;
use crate::capture::AudioSourceId;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DjState {
    pub session: Arc<BroadcastSession>,
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub source: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MuteRequest {
    /// Toggles when omitted.
    #[serde(default)]
    pub muted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GainRequest {
    pub gain: f32,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoiseGateRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub threshold_db: Option<i32>,
}

pub fn router(state: DjState) -> Router {
    Router::new()
        .route("/status", get(dj_status))
        .route("/level", get(level))
        .route("/live", post(go_live))
        .route("/source/switch", post(switch_source))
        .route("/end", post(end_broadcast))
        .route("/mute", post(mute))
        .route("/gain", post(gain))
        .route("/noise-gate", post(noise_gate))
        .with_state(state)
}

fn parse_source(raw: &str) -> ApiResult<AudioSourceId> {
    raw.parse::<AudioSourceId>().map_err(|e| {
        warn!("API: rejected source '{}'", raw);
        ApiError::from(e)
    })
}

async fn dj_status(State(state): State<DjState>) -> Json<Value> {
    let coordinator = state.session.coordinator();
    Json(json!({
        "panel": state.session.panel().get().await,
        "switch": coordinator.status(),
        "active_source": coordinator.active_source_id(),
        "active_stream": coordinator.active_stream(),
        "capture_supported": coordinator.is_capture_supported(),
    }))
}

async fn level(State(state): State<DjState>) -> Json<Value> {
    let sample = state.session.monitor().latest();
    let display = sample.as_ref().map(|s| s.display());
    Json(json!({
        "sample": sample,
        "display": display,
    }))
}

async fn go_live(
    State(state): State<DjState>,
    Json(req): Json<SourceRequest>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&req.source)?;
    info!("API: go live on {}", source);
    let report = state.session.go_live(source).await?;
    Ok(Json(json!({ "live": true, "report": report })))
}

async fn switch_source(
    State(state): State<DjState>,
    Json(req): Json<SourceRequest>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&req.source)?;
    info!("API: switch source to {}", source);
    let report = state.session.coordinator().switch_source(source).await?;
    Ok(Json(json!({ "switched": true, "report": report })))
}

async fn end_broadcast(State(state): State<DjState>) -> Json<Value> {
    info!("API: end broadcast");
    state.session.teardown().await;
    Json(json!({ "live": false }))
}

async fn mute(
    State(state): State<DjState>,
    body: Option<Json<MuteRequest>>,
) -> ApiResult<Json<Value>> {
    let panel = state.session.panel();
    let requested = body.and_then(|Json(req)| req.muted);
    let muted = match requested {
        Some(muted) => {
            panel.set_muted(muted).await?;
            muted
        }
        None => panel.toggle_mute().await?,
    };
    Ok(Json(json!({ "muted": muted })))
}

async fn gain(
    State(state): State<DjState>,
    Json(req): Json<GainRequest>,
) -> ApiResult<Json<Value>> {
    let gain = state.session.panel().set_gain(req.gain).await?;
    Ok(Json(json!({ "gain": gain })))
}

async fn noise_gate(
    State(state): State<DjState>,
    Json(req): Json<NoiseGateRequest>,
) -> ApiResult<Json<Value>> {
    if req.enabled.is_none() && req.threshold_db.is_none() {
        return Err(ApiError::bad_request(
            "Provide 'enabled' and/or 'threshold_db'",
        ));
    }

    let panel = state.session.panel();
    if let Some(enabled) = req.enabled {
        panel.set_noise_gate_enabled(enabled).await?;
    }
    if let Some(threshold) = req.threshold_db {
        panel.set_noise_gate_threshold(threshold).await?;
    }

    let gate = panel.get().await.noise_gate();
    Ok(Json(json!({
        "enabled": gate.enabled,
        "threshold_db": gate.threshold_db,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorSettings, NoiseGateConfig};
    use crate::test_support::{EventLog, FakeCapture, FakeOutputNode, FakeStream, FakeTransport};
    use reqwest::StatusCode;

    struct Harness {
        base: String,
        capture: Arc<FakeCapture>,
        output: Arc<FakeOutputNode>,
    }

    async fn serve() -> Harness {
        let capture = FakeCapture::new();
        let output = Arc::new(FakeOutputNode::default());
        let session = Arc::new(BroadcastSession::new(
            capture.clone(),
            FakeTransport::new(EventLog::default()),
            output.clone(),
            MonitorSettings::default(),
            NoiseGateConfig::default(),
        ));

        let app = router(DjState { session });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Harness {
            base: format!("http://{}", addr),
            capture,
            output,
        }
    }

    #[tokio::test]
    async fn test_controls_require_live_broadcast() {
        let h = serve().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/gain", h.base))
            .json(&json!({ "gain": 0.5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "not_live");
    }

    #[tokio::test]
    async fn test_go_live_then_adjust_panel() {
        let h = serve().await;
        let client = reqwest::Client::new();
        h.capture.push_stream(FakeStream::with_audio("Desktop Audio"));

        let resp = client
            .post(format!("{}/live", h.base))
            .json(&json!({ "source": "desktop" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = client
            .post(format!("{}/gain", h.base))
            .json(&json!({ "gain": 1.7 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["gain"], 1.0);

        let body: Value = client
            .post(format!("{}/mute", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["muted"], true);
        assert!(h.output.muted());

        let body: Value = client
            .post(format!("{}/noise-gate", h.base))
            .json(&json!({ "enabled": true, "threshold_db": -5 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["enabled"], true);
        assert_eq!(body["threshold_db"], NoiseGateConfig::MAX_THRESHOLD_DB);

        let status: Value = client
            .get(format!("{}/status", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["panel"]["is_live"], true);
        assert_eq!(status["active_source"], "desktop");
        assert_eq!(status["switch"]["phase"], "committed");
    }

    #[tokio::test]
    async fn test_unknown_source_is_bad_request() {
        let h = serve().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/source/switch", h.base))
            .json(&json!({ "source": "microphone" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "unsupported");
        assert_eq!(h.capture.prompt_count(), 0);
    }
}
