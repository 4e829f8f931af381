//! Progress reporting for long-running capabilities.
//!
//! Each run of a health check or wipe gets its own [`ProgressTracker`]. The
//! tracker publishes into a `tokio::sync::watch` channel so any number of
//! observers (CLI progress bar, stall watchdog, tests) can follow along.
//! Every report from the live run bumps [`ProgressUpdate::beat`] and wakes
//! observers, even when the percentage does not move, so a slow capability
//! still shows it is alive.
//!
//! Values only move forward, and capabilities can never report 100 on their
//! own: the evaluator or executor calls [`ProgressTracker::finish`] once the
//! capability has returned successfully, so 100 is reached exactly once and
//! always before completion is signalled.

use crate::Operation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Highest value a capability may report while still running
pub const LAST_PARTIAL_PERCENT: u8 = 99;

pub const COMPLETE_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Increments every time a new run starts on the channel
    pub run: u64,
    pub operation: Option<Operation>,
    pub percent: u8,
    /// Number of reports made by this run
    pub beat: u64,
}

impl ProgressUpdate {
    pub fn is_complete(&self) -> bool {
        self.percent >= COMPLETE_PERCENT
    }
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    run: u64,
    operation: Operation,
    sender: Arc<watch::Sender<ProgressUpdate>>,
}

impl ProgressTracker {
    /// Standalone tracker with its own channel
    pub fn new(operation: Operation) -> Self {
        let (sender, _receiver) = watch::channel(ProgressUpdate::default());
        Self::start(Arc::new(sender), operation)
    }

    /// Begin a new run on an existing channel, resetting progress to zero
    pub fn start(sender: Arc<watch::Sender<ProgressUpdate>>, operation: Operation) -> Self {
        let mut run = 0;
        sender.send_modify(|current| {
            run = current.run + 1;
            *current = ProgressUpdate {
                run,
                operation: Some(operation),
                percent: 0,
                beat: 0,
            };
        });

        Self {
            run,
            operation,
            sender,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Report a percentage. Values below the current one leave the percent
    /// unchanged and anything above 99 is held at 99 until the run finishes.
    /// Either way the report counts as a heartbeat.
    ///
    /// Returns the progress value after the report.
    pub fn report(&self, percent: u8) -> u8 {
        let capped = percent.min(LAST_PARTIAL_PERCENT);
        let run = self.run;
        self.sender.send_if_modified(|current| {
            if current.run != run {
                return false;
            }
            current.percent = current.percent.max(capped);
            current.beat += 1;
            true
        });
        self.current()
    }

    /// Report progress as `done` out of `total` units
    pub fn report_fraction(&self, done: u64, total: u64) -> u8 {
        if total == 0 {
            return self.current();
        }
        let percent = (done.min(total) as u128 * 100 / total as u128) as u8;
        self.report(percent)
    }

    /// Mark the run complete. Returns `true` only for the call that moved
    /// progress to 100.
    pub fn finish(&self) -> bool {
        let run = self.run;
        self.sender.send_if_modified(|current| {
            if current.run == run && current.percent < COMPLETE_PERCENT {
                current.percent = COMPLETE_PERCENT;
                true
            } else {
                false
            }
        })
    }

    /// Current progress of this run (0 once a newer run has replaced it)
    pub fn current(&self) -> u8 {
        let snapshot = *self.sender.borrow();
        if snapshot.run == self.run {
            snapshot.percent
        } else {
            0
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }
}
