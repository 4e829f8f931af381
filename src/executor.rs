//! Wipe execution.
//!
//! The [`Overwriter`] capability does the actual overwriting; [`WipeExecutor`]
//! supervises it the same way the health evaluator supervises its probe.

use crate::cancel::CancelFlag;
use crate::progress::ProgressTracker;
use crate::supervisor::{supervise, InFlightRegistry, Supervised};
use crate::{CapabilityError, Operation, WipeMethod, WipeType, WorkflowError, WorkflowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteRequest {
    pub target_path: String,
    pub wipe_type: WipeType,
    pub wipe_method: WipeMethod,
}

/// Figures recorded on the session once the wipe completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteOutcome {
    pub size_gb: u64,
    pub duration_minutes: u64,
}

#[async_trait]
pub trait Overwriter: Send + Sync {
    /// Overwrite the target with the requested algorithm.
    ///
    /// Must return [`CapabilityError::Interrupted`] once `cancel` fires.
    async fn overwrite(
        &self,
        request: &OverwriteRequest,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<OverwriteOutcome, CapabilityError>;
}

pub struct WipeExecutor {
    overwriter: Arc<dyn Overwriter>,
    stall_timeout: Duration,
    in_flight: InFlightRegistry,
}

impl WipeExecutor {
    pub fn new(overwriter: Arc<dyn Overwriter>, stall_timeout: Duration) -> Self {
        Self {
            overwriter,
            stall_timeout,
            in_flight: InFlightRegistry::new(Operation::Wipe),
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    pub async fn execute(
        &self,
        session_id: &str,
        request: &OverwriteRequest,
        tracker: &ProgressTracker,
        abandon: &CancelFlag,
    ) -> WorkflowResult<OverwriteOutcome> {
        let _guard = self.in_flight.try_acquire(session_id)?;

        tracing::info!(
            session_id,
            target = %request.target_path,
            method = %request.wipe_method,
            passes = request.wipe_method.passes(),
            "Starting wipe"
        );

        let run_cancel = CancelFlag::new();
        let mut progress = tracker.subscribe();
        let outcome = supervise(
            self.overwriter.overwrite(request, tracker, &run_cancel),
            &mut progress,
            abandon,
            &run_cancel,
            self.stall_timeout,
        )
        .await;

        match outcome {
            Supervised::Finished(Ok(result)) => {
                tracker.finish();
                tracing::info!(
                    session_id,
                    size_gb = result.size_gb,
                    duration_minutes = result.duration_minutes,
                    "Wipe complete"
                );
                Ok(result)
            }
            Supervised::Finished(Err(CapabilityError::Interrupted)) | Supervised::Cancelled => {
                tracing::warn!(session_id, "Wipe cancelled");
                Err(WorkflowError::Cancelled(Operation::Wipe))
            }
            Supervised::Finished(Err(source)) => {
                tracing::error!(session_id, error = %source, "Overwrite failed");
                Err(WorkflowError::Capability {
                    operation: Operation::Wipe,
                    source,
                })
            }
            Supervised::Stalled => {
                tracing::error!(session_id, timeout = ?self.stall_timeout, "Wipe made no progress");
                Err(WorkflowError::Stalled {
                    operation: Operation::Wipe,
                    after: self.stall_timeout,
                })
            }
        }
    }
}
