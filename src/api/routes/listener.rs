//! Listener playback endpoints.
//!
//! Provides HTTP endpoints for:
//! - Playback and station status (GET /status)
//! - Transport controls (POST /play, /pause, /stop)
//! - Volume and mute (POST /volume, /mute)

use crate::api::error::ApiResult;
use crate::listener::{ListenerSession, PollSnapshot};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ListenerState {
    pub session: Arc<ListenerSession>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub volume: u8,
}

#[derive(Debug, Default, Deserialize)]
pub struct MuteRequest {
    /// Toggles when omitted.
    #[serde(default)]
    pub muted: Option<bool>,
}

pub fn router(state: ListenerState) -> Router {
    Router::new()
        .route("/status", get(listener_status))
        .route("/play", post(play))
        .route("/pause", post(pause))
        .route("/stop", post(stop))
        .route("/volume", post(volume))
        .route("/mute", post(mute))
        .with_state(state)
}

fn station_json(snapshot: &PollSnapshot) -> Value {
    let status = snapshot.status.as_ref();
    json!({
        "live": snapshot.is_live(),
        "now_playing": status.and_then(|s| s.now_playing()),
        "stream_url": status.and_then(|s| s.playable_url()),
        "server": status.map(|s| s.server),
        "broadcast": status.and_then(|s| s.broadcast.clone()),
        "fetch_error": snapshot.fetch_error.as_ref().map(|e| e.user_message()),
        "consecutive_failures": snapshot.consecutive_failures,
        "last_success_at": snapshot.last_success_at,
    })
}

async fn listener_status(State(state): State<ListenerState>) -> Json<Value> {
    let session = &state.session;
    Json(json!({
        "playback": session.engine().session(),
        "banner_visible": session.banner().is_visible(),
        "station": station_json(&session.poller().snapshot()),
    }))
}

async fn play(State(state): State<ListenerState>) -> ApiResult<Json<Value>> {
    info!("API: play");
    state.session.engine().play().await?;
    Ok(Json(json!({ "playback": state.session.engine().session() })))
}

async fn pause(State(state): State<ListenerState>) -> ApiResult<Json<Value>> {
    state.session.engine().pause().await?;
    Ok(Json(json!({ "playback": state.session.engine().session() })))
}

async fn stop(State(state): State<ListenerState>) -> ApiResult<Json<Value>> {
    state.session.engine().stop().await?;
    Ok(Json(json!({ "playback": state.session.engine().session() })))
}

async fn volume(
    State(state): State<ListenerState>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<Json<Value>> {
    let volume = state.session.engine().set_volume(req.volume).await?;
    Ok(Json(json!({
        "volume": volume,
        "muted": state.session.engine().session().is_muted,
    })))
}

async fn mute(
    State(state): State<ListenerState>,
    body: Option<Json<MuteRequest>>,
) -> ApiResult<Json<Value>> {
    let engine = state.session.engine();
    let muted = match body.and_then(|Json(req)| req.muted) {
        Some(muted) => {
            engine.set_muted(muted).await?;
            muted
        }
        None => engine.toggle_mute().await?,
    };
    Ok(Json(json!({ "muted": muted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{BroadcastStreamStatus, ListenerSettings};
    use crate::test_support::{FakeOutput, FakeStatusClient, OutputCall};
    use reqwest::StatusCode;
    use std::time::Duration;

    fn settings() -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(3),
            banner_grace: Duration::from_secs(4),
            default_volume: 80,
        }
    }

    async fn serve(status: Arc<FakeStatusClient>) -> (String, Arc<FakeOutput>) {
        let output = FakeOutput::new();
        let session = Arc::new(ListenerSession::start(output.clone(), status, settings()));
        let app = router(ListenerState { session });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), output)
    }

    #[tokio::test]
    async fn test_play_when_offline_is_conflict() {
        let status = FakeStatusClient::new();
        status.push_ok(BroadcastStreamStatus::default());
        let (base, output) = serve(status).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/play", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "not_live");
        assert_eq!(output.load_count(), 0);
    }

    #[tokio::test]
    async fn test_play_and_volume_round_trip() {
        let status = FakeStatusClient::new();
        status.push_ok(BroadcastStreamStatus {
            live: true,
            streaming: true,
            stream_url: Some("radio.example.edu/live".into()),
            ..Default::default()
        });
        let (base, output) = serve(status).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/play", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["playback"]["state"], "playing");

        let body: Value = client
            .post(format!("{}/volume", base))
            .json(&json!({ "volume": 0 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["volume"], 0);
        assert_eq!(body["muted"], true);
        assert!(output.calls().contains(&OutputCall::SetVolume(0)));

        let status: Value = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["banner_visible"], false);
        assert_eq!(status["playback"]["url"], "http://radio.example.edu/live");
    }
}
