pub mod backoff;
pub mod collection;
pub mod config;
pub mod error;
pub mod interpret;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod sandbox;
pub mod shutdown;
pub mod source;
pub mod staging;
pub mod worker;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    config::WorkerSettings,
    lock::InstanceLock,
    metrics::MetricsRegistry,
    sandbox::SandboxFactory,
    source::{HttpJobSource, WorkerIdentity},
    worker::{SlotContext, spawn_worker_pool},
};

pub async fn run(settings: WorkerSettings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let lock = InstanceLock::acquire(&settings.lock_file)?;

    let executor = SandboxFactory::from_settings(&settings)
        .await
        .context("sandbox backend init failed")?;
    let source = HttpJobSource::new(
        settings.base_url.clone(),
        WorkerIdentity::from_settings(&settings),
        settings.request_timeout,
    )
    .context("failed to build job source client")?;
    let metrics = Arc::new(MetricsRegistry::new());

    tracing::info!(
        worker_id = %settings.worker_id,
        base_url = %settings.base_url,
        slots = settings.max_slots,
        sandbox = executor.name(),
        lock_file = %lock.path().display(),
        "grader worker ready"
    );

    let handles = spawn_worker_pool(
        settings.max_slots,
        SlotContext {
            source: Arc::new(source),
            executor,
            metrics: metrics.clone(),
            work_root: settings.work_root.clone(),
            backoff_initial: settings.backoff_initial,
            backoff_max: settings.backoff_max,
        },
        shutdown,
    );

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "slot task ended abnormally");
        }
    }

    metrics.log_summary();
    drop(lock);
    Ok(())
}
