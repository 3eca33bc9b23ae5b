use crate::api::ApiServer;
use crate::audio::SystemAudioCapture;
use crate::broadcast::{AircheckTransport, BroadcastSession};
use crate::capture::AudioSourceId;
use crate::config::Config;
use crate::listener::{HttpStatusClient, ListenerSession};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run_dj(config: Config) -> Result<()> {
    info!("Starting onair DJ console");

    let aircheck_dir = config.aircheck_dir()?;
    std::fs::create_dir_all(&aircheck_dir).context("Failed to create aircheck directory")?;
    let aircheck = Arc::new(AircheckTransport::new(aircheck_dir, config.capture.sample_rate));
    info!("Aircheck recordings will be written to {:?}", aircheck.dir());

    let platform = Arc::new(SystemAudioCapture::new(
        config.capture.device_hint.clone(),
        config.capture.sample_rate,
        config.capture.analysis_window,
    ));

    let session = Arc::new(BroadcastSession::new(
        platform,
        aircheck.clone(),
        aircheck,
        config.monitor_settings(),
        config.noise_gate(),
    ));

    let shutdown = CancellationToken::new();
    let api = spawn_api(ApiServer::dj(config.api.port, Arc::clone(&session)), &shutdown);

    match session.go_live(AudioSourceId::Desktop).await {
        Ok(report) => info!("On air from {} ({})", report.source, report.stream),
        Err(e) => error!("Could not go live: {}", e.user_message()),
    }

    info!("onair DJ console is ready!");
    info!(
        "Switch source: curl -X POST http://127.0.0.1:{}/dj/source/switch -H 'Content-Type: application/json' -d '{{\"source\":\"desktop\"}}'",
        config.api.port
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down DJ console");

    session.teardown().await;
    shutdown.cancel();
    let _ = api.await;
    Ok(())
}

#[cfg(unix)]
pub async fn run_listener(config: Config) -> Result<()> {
    use crate::global;
    use crate::listener::MpvOutput;

    info!("Starting onair listener");

    let status = Arc::new(
        HttpStatusClient::new(
            &config.server.base_url,
            &config.server.status_path,
            config.request_timeout(),
        )
        .context("Failed to build status client")?,
    );
    info!("Following station at {}", status.url());

    let socket_path = global::mpv_socket_path()?;
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create mpv socket directory")?;
    }
    let output = Arc::new(MpvOutput::new(
        config.playback.mpv_binary.clone(),
        socket_path,
        config.load_timeout(),
    ));

    let session = Arc::new(ListenerSession::start(
        output,
        status,
        config.listener_settings(),
    ));

    let shutdown = CancellationToken::new();
    let api = spawn_api(
        ApiServer::listener(config.api.port, Arc::clone(&session)),
        &shutdown,
    );

    info!("onair listener is ready!");
    info!(
        "Start playback: curl -X POST http://127.0.0.1:{}/listener/play",
        config.api.port
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down listener");

    session.teardown().await;
    shutdown.cancel();
    let _ = api.await;
    Ok(())
}

#[cfg(not(unix))]
pub async fn run_listener(_config: Config) -> Result<()> {
    anyhow::bail!("The listener requires mpv IPC over a unix socket")
}

fn spawn_api(server: ApiServer, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = server.start(shutdown).await {
            error!("API server failed: {}", e);
        }
    })
}
