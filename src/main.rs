use anyhow::Result;
use clap::Parser;
use tracing::info;

mod analytics;
mod args;
mod auth;
mod cfg;
mod csv_sink;
mod error;
mod job;
mod transform;

use analytics::AnalyticsSource;
use args::Args;
use cfg::Cfg;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("Starting ga_extract");

    // Load configuration
    let cfg = Cfg::load(args)?;
    cfg.validate()?;

    // Initialize authentication
    let hub = auth::create_analytics_hub(&cfg.auth).await?;
    let source = AnalyticsSource::new(hub);

    let summary = job::run_job(&source, &cfg).await?;

    if summary.failures() > 0 {
        anyhow::bail!("{} of {} properties did not complete", summary.failures(), summary.properties.len());
    }

    info!(rows = summary.rows_written(), "ga_extract completed successfully");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .init();

    Ok(())
}
