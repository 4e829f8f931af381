use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use wipe_certify::executor::{OverwriteOutcome, OverwriteRequest, Overwriter};
use wipe_certify::health::{HealthProbe, HealthReport};
use wipe_certify::progress::ProgressTracker;
use wipe_certify::{CancelFlag, CapabilityError, Platform};

/// Health probe that always reports the same score
pub struct ScriptedProbe {
    pub score: u8,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(score: u8) -> Self {
        Self {
            score,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn analyze(
        &self,
        _platform: Platform,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<HealthReport, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for percent in [25, 50, 75] {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Interrupted);
            }
            progress.report(percent);
            tokio::task::yield_now().await;
        }

        Ok(HealthReport {
            health_score: self.score,
            bad_sectors: 3,
            temperature: 38,
            read_errors: 1,
            write_errors: 0,
            recommendation: "scripted".to_string(),
        })
    }
}

/// Overwriter that fails a set number of times before succeeding
pub struct ScriptedOverwriter {
    pub outcome: OverwriteOutcome,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedOverwriter {
    pub fn new(size_gb: u64, duration_minutes: u64) -> Self {
        Self {
            outcome: OverwriteOutcome {
                size_gb,
                duration_minutes,
            },
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Overwriter for ScriptedOverwriter {
    async fn overwrite(
        &self,
        request: &OverwriteRequest,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<OverwriteOutcome, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let passes = u64::from(request.wipe_method.passes());
        for pass in 1..=passes {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Interrupted);
            }
            progress.report_fraction(pass, passes);
            tokio::task::yield_now().await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CapabilityError::Failed("write error on pass 1".to_string()));
        }
        Ok(self.outcome)
    }
}

/// Overwriter that reports some progress and then waits to be cancelled
pub struct BlockingOverwriter;

#[async_trait]
impl Overwriter for BlockingOverwriter {
    async fn overwrite(
        &self,
        _request: &OverwriteRequest,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<OverwriteOutcome, CapabilityError> {
        progress.report(40);
        cancel.cancelled().await;
        Err(CapabilityError::Interrupted)
    }
}
