//! Shared run supervision for capability invocations: at-most-one in-flight
//! guard per session, cancellation, and stall detection.

use crate::cancel::CancelFlag;
use crate::progress::ProgressUpdate;
use crate::{Operation, WorkflowError, WorkflowResult};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Tracks which sessions currently have an operation running
#[derive(Debug, Clone)]
pub(crate) struct InFlightRegistry {
    operation: Operation,
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl InFlightRegistry {
    pub(crate) fn new(operation: Operation) -> Self {
        Self {
            operation,
            sessions: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub(crate) fn try_acquire(&self, session_id: &str) -> WorkflowResult<InFlightGuard> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !sessions.insert(session_id.to_string()) {
            return Err(WorkflowError::AlreadyRunning {
                operation: self.operation,
                session_id: session_id.to_string(),
            });
        }

        Ok(InFlightGuard {
            session_id: session_id.to_string(),
            sessions: Arc::clone(&self.sessions),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|s| s.contains(session_id))
            .unwrap_or(false)
    }
}

/// Releases the session slot when dropped, including when the owning future is dropped
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    session_id: String,
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.remove(&self.session_id);
    }
}

#[derive(Debug)]
pub(crate) enum Supervised<T> {
    Finished(T),
    Cancelled,
    Stalled,
}

/// Drive `work` to completion unless the workflow is abandoned or the run
/// goes `stall_timeout` without a progress report. Any report counts, even
/// one that leaves the percentage where it was.
///
/// In both of those cases `run_cancel` is signalled before returning so the
/// capability stops whatever it was doing.
pub(crate) async fn supervise<T, F>(
    work: F,
    progress: &mut watch::Receiver<ProgressUpdate>,
    abandon: &CancelFlag,
    run_cancel: &CancelFlag,
    stall_timeout: Duration,
) -> Supervised<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(work);
    let mut watching = true;

    loop {
        tokio::select! {
            biased;

            _ = abandon.cancelled() => {
                run_cancel.cancel();
                return Supervised::Cancelled;
            }

            output = &mut work => return Supervised::Finished(output),

            changed = tokio::time::timeout(stall_timeout, progress.changed()), if watching => {
                match changed {
                    Ok(Ok(())) => continue,
                    // Channel closed: fall back to a plain deadline below
                    Ok(Err(_)) => watching = false,
                    Err(_) => {
                        run_cancel.cancel();
                        return Supervised::Stalled;
                    }
                }
            }

            _ = tokio::time::sleep(stall_timeout), if !watching => {
                run_cancel.cancel();
                return Supervised::Stalled;
            }
        }
    }
}
