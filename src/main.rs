use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use grader_worker::{config::WorkerConfig, shutdown::install_shutdown_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::parse();
    init_tracing(&config.log_level);

    let settings = config.validate().context("failed to build worker config")?;
    let shutdown = install_shutdown_handler();

    grader_worker::run(settings, shutdown).await
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{log_level},hyper=warn,reqwest=warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .init();
}
