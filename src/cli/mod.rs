use crate::config::Config;
use crate::listener::{HttpStatusClient, StatusClient};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "onair")]
#[command(about = "Live campus radio: DJ capture console and resilient listener", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Station backend base URL (overrides config)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Local control API port (overrides config)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Go on air from desktop audio and serve the DJ control API
    Dj(DjCliArgs),
    /// Follow the station and play the live stream (default)
    Listen,
    /// Fetch and print the station's current stream status
    Status,
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
pub struct DjCliArgs {
    /// Directory for the aircheck recording (default: data dir)
    #[arg(long)]
    pub aircheck: Option<PathBuf>,
}

impl Cli {
    /// Fold command line overrides into the loaded config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server.base_url = server.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(CliCommand::Dj(args)) = &self.command {
            if let Some(dir) = &args.aircheck {
                config.aircheck.directory = Some(dir.clone());
            }
        }
    }
}

pub async fn handle_status_command(config: &Config) -> Result<()> {
    let client = HttpStatusClient::new(
        &config.server.base_url,
        &config.server.status_path,
        config.request_timeout(),
    )
    .context("Failed to build status client")?;

    let status = client
        .fetch_status()
        .await
        .with_context(|| format!("Failed to fetch status from {}", client.url()))?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(url) = status.playable_url() {
        println!("\nLive: {}", url);
        if let Some(now_playing) = status.now_playing() {
            println!("Now playing: {}", now_playing);
        }
    } else {
        println!("\nStation is off air");
    }

    Ok(())
}
