use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::Backoff,
    collection,
    interpret::interpret,
    metrics::MetricsRegistry,
    models::{Job, OutcomeCollection, TestOutcome},
    sandbox::{ScriptExecutor, ScriptRequest},
    source::JobSource,
    staging::{self, BuildOutcome, Workspace},
};

#[derive(Clone)]
pub struct SlotContext {
    pub source: Arc<dyn JobSource>,
    pub executor: Arc<dyn ScriptExecutor>,
    pub metrics: Arc<MetricsRegistry>,
    pub work_root: PathBuf,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

pub fn spawn_worker_pool(
    slots: usize,
    ctx: SlotContext,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..slots)
        .map(|slot| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                slot_loop(slot, ctx, shutdown).await;
            })
        })
        .collect()
}

async fn slot_loop(slot: usize, ctx: SlotContext, shutdown: CancellationToken) {
    let mut backoff = Backoff::new(ctx.backoff_initial, ctx.backoff_max);
    tracing::info!(slot, "slot started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        // Not raced against shutdown: the source may already have committed the claim.
        let fetched = ctx.source.fetch().await;

        match fetched {
            Ok(Some(job)) => {
                backoff.reset();
                ctx.metrics.claimed();
                handle_job(slot, &ctx, job).await;
                continue;
            }
            Ok(None) => {
                ctx.metrics.empty_poll();
                tracing::trace!(slot, "no work available");
            }
            Err(err) => {
                ctx.metrics.poll_error();
                tracing::warn!(slot, kind = err.code(), error = %err, "poll failed");
            }
        }

        let delay = backoff.next();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!(slot, "slot stopped");
}

async fn handle_job(slot: usize, ctx: &SlotContext, job: Job) {
    tracing::info!(
        slot,
        submission_id = %job.submission_id,
        test_setup_id = %job.test_setup_id,
        attempt = job.attempt,
        "claimed job"
    );

    let processed = process_job(
        &job,
        ctx.source.as_ref(),
        ctx.executor.as_ref(),
        &ctx.work_root,
    )
    .await;

    match processed {
        Ok(collection) => {
            ctx.metrics.timed_out(collection.timeout_count as u64);
            tracing::info!(
                slot,
                submission_id = %collection.submission_id,
                attempt = collection.attempt,
                build_status = ?collection.build_status,
                passed = collection.pass_count,
                failed = collection.fail_count,
                errors = collection.error_count,
                timeouts = collection.timeout_count,
                total_ms = collection.total_time_ms,
                "job finished"
            );

            // Not retried: a second report could double-count the attempt.
            match ctx.source.report(&collection, &job).await {
                Ok(()) => ctx.metrics.reported(),
                Err(err) => {
                    ctx.metrics.report_failed();
                    tracing::error!(
                        slot,
                        submission_id = %job.submission_id,
                        attempt = job.attempt,
                        error = %err,
                        "failed to report results, result lost"
                    );
                }
            }
        }
        Err(err) => {
            ctx.metrics.abandoned();
            let reason = format!("{err:#}");
            tracing::error!(
                slot,
                submission_id = %job.submission_id,
                test_setup_id = %job.test_setup_id,
                attempt = job.attempt,
                error = %reason,
                "abandoning job"
            );
            if let Err(err) = ctx.source.report_death(&job, &reason).await {
                tracing::warn!(
                    slot,
                    submission_id = %job.submission_id,
                    error = %err,
                    "death notification failed"
                );
            }
        }
    }
}

/// `Err` means an internal fault; build and test failures come back as a collection.
pub async fn process_job(
    job: &Job,
    source: &dyn JobSource,
    executor: &dyn ScriptExecutor,
    work_root: &Path,
) -> anyhow::Result<OutcomeCollection> {
    let workspace = Workspace::create(work_root, job)?;
    let processed = process_in_workspace(&workspace, job, source, executor).await;
    remove_workspace(workspace, job).await;
    processed
}

async fn process_in_workspace(
    workspace: &Workspace,
    job: &Job,
    source: &dyn JobSource,
    executor: &dyn ScriptExecutor,
) -> anyhow::Result<OutcomeCollection> {
    staging::stage(workspace, job, source).await?;

    let missing = staging::missing_required_files(workspace, &job.manifest);
    if !missing.is_empty() {
        return Ok(collection::build_failed(
            job,
            format!("missing required files: {}", missing.join(", ")),
        ));
    }

    if let Some(build) = &job.manifest.build {
        if let BuildOutcome::Failed(diagnostic) =
            staging::run_build(workspace, build, executor).await?
        {
            return Ok(collection::build_failed(job, diagnostic));
        }
    }

    let outcomes = run_tests(workspace, job, executor).await;
    Ok(collection::assemble(outcomes, job))
}

async fn remove_workspace(workspace: Workspace, job: &Job) {
    let path = workspace.path().to_path_buf();
    let error = match tokio::task::spawn_blocking(move || workspace.remove()).await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(err) => format!("cleanup task failed: {err}"),
    };
    tracing::error!(
        submission_id = %job.submission_id,
        test_setup_id = %job.test_setup_id,
        attempt = job.attempt,
        path = %path.display(),
        error = %error,
        "failed to remove workspace"
    );
}

// One script at a time: scripts share the workspace.
async fn run_tests(
    workspace: &Workspace,
    job: &Job,
    executor: &dyn ScriptExecutor,
) -> Vec<TestOutcome> {
    let mut outcomes = Vec::with_capacity(job.manifest.tests.len());

    for entry in &job.manifest.tests {
        let Some(script) = staging::resolve_script(workspace, entry) else {
            tracing::warn!(
                submission_id = %job.submission_id,
                script = %entry.script,
                "test script missing from workspace, skipping"
            );
            continue;
        };

        let request = ScriptRequest::new(
            script,
            workspace.path(),
            job.manifest.time_limit_for(entry),
        );
        let result = executor.execute(request).await;
        tracing::debug!(
            submission_id = %job.submission_id,
            script = %entry.script,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "script finished"
        );
        outcomes.push(interpret(&result, entry, job.attempt));
    }

    outcomes
}
