use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    jobs_claimed: AtomicU64,
    jobs_reported: AtomicU64,
    reports_failed: AtomicU64,
    jobs_abandoned: AtomicU64,
    empty_polls: AtomicU64,
    poll_errors: AtomicU64,
    scripts_timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub jobs_claimed: u64,
    pub jobs_reported: u64,
    pub reports_failed: u64,
    pub jobs_abandoned: u64,
    pub empty_polls: u64,
    pub poll_errors: u64,
    pub scripts_timed_out: u64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claimed(&self) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reported(&self) {
        self.jobs_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_failed(&self) {
        self.reports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self, scripts: u64) {
        self.scripts_timed_out.fetch_add(scripts, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_claimed: self.jobs_claimed.load(Ordering::Relaxed),
            jobs_reported: self.jobs_reported.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            scripts_timed_out: self.scripts_timed_out.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            jobs_claimed = snapshot.jobs_claimed,
            jobs_reported = snapshot.jobs_reported,
            reports_failed = snapshot.reports_failed,
            jobs_abandoned = snapshot.jobs_abandoned,
            empty_polls = snapshot.empty_polls,
            poll_errors = snapshot.poll_errors,
            scripts_timed_out = snapshot.scripts_timed_out,
            "worker totals"
        );
    }
}
