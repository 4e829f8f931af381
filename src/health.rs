//! Device health evaluation and the health gate.
//!
//! A [`HealthProbe`] produces a [`HealthReport`] for the target device. The
//! [`HealthEvaluator`] runs the probe under supervision and makes sure that
//! reported progress reaches 100 exactly once, before the result is handed
//! back to the workflow.

use crate::cancel::CancelFlag;
use crate::progress::ProgressTracker;
use crate::supervisor::{supervise, InFlightRegistry, Supervised};
use crate::{CapabilityError, HealthDetails, Operation, Platform, WorkflowError, WorkflowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Minimum score at which a device may be wiped
pub const HEALTH_GATE_THRESHOLD: u8 = 70;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// 0-100, higher is healthier
    pub health_score: u8,
    pub bad_sectors: u32,
    /// Degrees Celsius
    pub temperature: i32,
    pub read_errors: u32,
    pub write_errors: u32,
    pub recommendation: String,
}

impl HealthReport {
    /// Fields persisted on the session alongside the score
    pub fn details(&self) -> HealthDetails {
        HealthDetails {
            bad_sectors: self.bad_sectors,
            temperature: self.temperature,
            read_errors: self.read_errors,
            write_errors: self.write_errors,
            recommendation: self.recommendation.clone(),
        }
    }

    pub fn gate(&self) -> GateDecision {
        evaluate_gate(self.health_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    Abort,
}

pub fn evaluate_gate(health_score: u8) -> GateDecision {
    if health_score >= HEALTH_GATE_THRESHOLD {
        GateDecision::Proceed
    } else {
        GateDecision::Abort
    }
}

/// Produces a health report for the device backing a session.
///
/// Implementations report progress through `progress` (values above 99 are
/// held until the evaluator finishes the run) and should stop promptly with
/// [`CapabilityError::Interrupted`] once `cancel` fires.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn analyze(
        &self,
        platform: Platform,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<HealthReport, CapabilityError>;
}

pub struct HealthEvaluator {
    probe: Arc<dyn HealthProbe>,
    stall_timeout: Duration,
    in_flight: InFlightRegistry,
}

impl HealthEvaluator {
    pub fn new(probe: Arc<dyn HealthProbe>, stall_timeout: Duration) -> Self {
        Self {
            probe,
            stall_timeout,
            in_flight: InFlightRegistry::new(Operation::HealthCheck),
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Run the probe for `session_id`.
    ///
    /// Only one evaluation per session may be in flight. On success progress
    /// has reached 100 before this returns.
    pub async fn evaluate(
        &self,
        session_id: &str,
        platform: Platform,
        tracker: &ProgressTracker,
        abandon: &CancelFlag,
    ) -> WorkflowResult<HealthReport> {
        let _guard = self.in_flight.try_acquire(session_id)?;

        tracing::info!(session_id, %platform, "Starting health check");

        let run_cancel = CancelFlag::new();
        let mut progress = tracker.subscribe();
        let outcome = supervise(
            self.probe.analyze(platform, tracker, &run_cancel),
            &mut progress,
            abandon,
            &run_cancel,
            self.stall_timeout,
        )
        .await;

        let report = match outcome {
            Supervised::Finished(Ok(report)) => report,
            Supervised::Finished(Err(CapabilityError::Interrupted)) | Supervised::Cancelled => {
                tracing::warn!(session_id, "Health check cancelled");
                return Err(WorkflowError::Cancelled(Operation::HealthCheck));
            }
            Supervised::Finished(Err(source)) => {
                tracing::error!(session_id, error = %source, "Health probe failed");
                return Err(WorkflowError::Capability {
                    operation: Operation::HealthCheck,
                    source,
                });
            }
            Supervised::Stalled => {
                tracing::error!(
                    session_id,
                    timeout = ?self.stall_timeout,
                    "Health check made no progress"
                );
                return Err(WorkflowError::Stalled {
                    operation: Operation::HealthCheck,
                    after: self.stall_timeout,
                });
            }
        };

        if report.health_score > 100 {
            return Err(WorkflowError::Capability {
                operation: Operation::HealthCheck,
                source: CapabilityError::Malformed(format!(
                    "health score {} is outside 0-100",
                    report.health_score
                )),
            });
        }

        tracker.finish();
        tracing::info!(
            session_id,
            health_score = report.health_score,
            decision = ?report.gate(),
            "Health check complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    struct FixedProbe {
        score: u8,
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn analyze(
            &self,
            _platform: Platform,
            progress: &ProgressTracker,
            _cancel: &CancelFlag,
        ) -> Result<HealthReport, CapabilityError> {
            progress.report(50);
            progress.report(100);
            Ok(HealthReport {
                health_score: self.score,
                bad_sectors: 3,
                temperature: 38,
                read_errors: 1,
                write_errors: 0,
                recommendation: "Drive is healthy".to_string(),
            })
        }
    }

    struct BrokenProbe;

    #[async_trait]
    impl HealthProbe for BrokenProbe {
        async fn analyze(
            &self,
            _platform: Platform,
            _progress: &ProgressTracker,
            _cancel: &CancelFlag,
        ) -> Result<HealthReport, CapabilityError> {
            Err(CapabilityError::Unavailable("SMART not supported".to_string()))
        }
    }

    #[test_case(0, GateDecision::Abort ; "zero")]
    #[test_case(55, GateDecision::Abort ; "unhealthy")]
    #[test_case(69, GateDecision::Abort ; "just below threshold")]
    #[test_case(70, GateDecision::Proceed ; "at threshold")]
    #[test_case(92, GateDecision::Proceed ; "healthy")]
    #[test_case(100, GateDecision::Proceed ; "perfect")]
    fn test_health_gate(score: u8, expected: GateDecision) {
        assert_eq!(evaluate_gate(score), expected);
    }

    #[tokio::test]
    async fn test_evaluate_finishes_progress_before_returning() {
        let evaluator =
            HealthEvaluator::new(Arc::new(FixedProbe { score: 92 }), Duration::from_secs(5));
        let tracker = ProgressTracker::new(Operation::HealthCheck);

        let report = evaluator
            .evaluate("sess-1", Platform::Linux, &tracker, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.health_score, 92);
        assert_eq!(tracker.current(), 100);
        assert!(!evaluator.in_flight.is_running("sess-1"));
    }

    #[tokio::test]
    async fn test_evaluate_rejects_out_of_range_score() {
        let evaluator =
            HealthEvaluator::new(Arc::new(FixedProbe { score: 140 }), Duration::from_secs(5));
        let tracker = ProgressTracker::new(Operation::HealthCheck);

        let err = evaluator
            .evaluate("sess-1", Platform::Windows, &tracker, &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Capability {
                source: CapabilityError::Malformed(_),
                ..
            }
        ));
        assert!(tracker.current() < 100);
    }

    #[tokio::test]
    async fn test_evaluate_surfaces_probe_failure_as_retryable() {
        let evaluator = HealthEvaluator::new(Arc::new(BrokenProbe), Duration::from_secs(5));
        let tracker = ProgressTracker::new(Operation::HealthCheck);

        let err = evaluator
            .evaluate("sess-1", Platform::Mac, &tracker, &CancelFlag::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(tracker.current(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_when_already_abandoned() {
        let evaluator =
            HealthEvaluator::new(Arc::new(FixedProbe { score: 92 }), Duration::from_secs(5));
        let tracker = ProgressTracker::new(Operation::HealthCheck);
        let abandon = CancelFlag::new();
        abandon.cancel();

        let err = evaluator
            .evaluate("sess-1", Platform::Android, &tracker, &abandon)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Cancelled(Operation::HealthCheck)));
    }
}
