use anyhow::Result;
use clap::Parser;
use onair::{
    app,
    cli::{handle_status_command, Cli, CliCommand},
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Some(CliCommand::Version) = cli.command {
        println!("onair {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load()?;
    cli.apply_overrides(&mut config);

    match cli.command {
        Some(CliCommand::Status) => handle_status_command(&config).await,
        Some(CliCommand::Dj(_)) => app::run_dj(config).await,
        Some(CliCommand::Listen) | None => app::run_listener(config).await,
        Some(CliCommand::Version) => Ok(()),
    }
}
