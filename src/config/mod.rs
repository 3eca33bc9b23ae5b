use crate::global;
use crate::listener::ListenerSettings;
use crate::monitor::{MonitorSettings, NoiseGateConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub poller: PollerConfig,
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
    pub monitor: MonitorConfig,
    pub noise_gate: NoiseGateSection,
    pub banner: BannerConfig,
    pub aircheck: AircheckConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Station backend, e.g. `https://radio.example.edu`.
    pub base_url: String,
    pub status_path: String,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            status_path: "/api/stream/status".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// 0-100
    pub default_volume: u8,
    pub mpv_binary: String,
    pub load_timeout_ms: u64,
    /// Wait before the single automatic reload.
    pub retry_delay_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: 80,
            mpv_binary: "mpv".to_string(),
            load_timeout_ms: 10_000,
            retry_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Substring matched against input device names to find the desktop
    /// audio monitor.
    pub device_hint: String,
    pub sample_rate: u32,
    pub analysis_window: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_hint: "monitor".to_string(),
            sample_rate: 48_000,
            analysis_window: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub frame_rate: u32,
    pub silence_floor_db: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            silence_floor_db: crate::audio::SILENCE_FLOOR_DB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseGateSection {
    pub enabled: bool,
    pub threshold_db: i32,
}

impl Default for NoiseGateSection {
    fn default() -> Self {
        let gate = NoiseGateConfig::default();
        Self {
            enabled: gate.enabled,
            threshold_db: gate.threshold_db,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerConfig {
    pub grace_ms: u64,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self { grace_ms: 4000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AircheckConfig {
    /// Defaults to `<data dir>/airchecks`.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    pub fn aircheck_dir(&self) -> Result<PathBuf> {
        match &self.aircheck.directory {
            Some(dir) => Ok(dir.clone()),
            None => global::aircheck_dir(),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            frame_rate: self.monitor.frame_rate.max(1),
            floor_db: self.monitor.silence_floor_db,
            window: self.capture.analysis_window.max(1),
        }
    }

    pub fn noise_gate(&self) -> NoiseGateConfig {
        NoiseGateConfig::new(self.noise_gate.enabled, self.noise_gate.threshold_db)
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_millis(self.poller.interval_ms.max(1)),
            retry_delay: Duration::from_millis(self.playback.retry_delay_ms),
            banner_grace: Duration::from_millis(self.banner.grace_ms),
            default_volume: self.playback.default_volume.min(100),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.playback.load_timeout_ms)
    }
}
