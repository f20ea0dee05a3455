use anyhow::{Context, Result};
use clap::Parser;
use jobhub_realtime::app_log;
use jobhub_realtime::cli::{handle_command, Cli};
use jobhub_realtime::core::ConfigManager;
use std::fs::OpenOptions;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigManager::load()?;

    let log_path = &config.environment.log_file;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true) // Clear file on startup
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let directive = config
        .environment
        .log_directive
        .parse::<Directive>()
        .context("Invalid log directive")?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(EnvFilter::from_default_env().add_directive(directive))
        .init();

    app_log!(
        info,
        "Environment: {}",
        jobhub_realtime::environment::EnvironmentConfig::get_environment()
    );
    app_log!(info, "Hub: {}", config.environment.hub_url);
    app_log!(info, "API: {}", config.environment.api_base_url);

    handle_command(cli, config).await
}
