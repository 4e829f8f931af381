//! Simulated capabilities for demos and the CLI.
//!
//! Nothing here touches a real device. The probe and overwriter step through
//! progress on a timer and draw their figures from a seeded RNG, so runs can
//! be reproduced with [`SimulatedHealthProbe::with_seed`] and
//! [`SimulatedOverwriter::with_seed`].

use crate::cancel::CancelFlag;
use crate::executor::{OverwriteOutcome, OverwriteRequest, Overwriter};
use crate::health::{HealthProbe, HealthReport, HEALTH_GATE_THRESHOLD};
use crate::progress::ProgressTracker;
use crate::{CapabilityError, Platform};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

const HEALTH_STEP_PERCENT: u8 = 2;
const DEFAULT_HEALTH_TICK: Duration = Duration::from_millis(50);

/// Wipe progress advances in half-percent steps across all passes
const WIPE_TOTAL_STEPS: u64 = 200;
const DEFAULT_WIPE_TICK: Duration = Duration::from_millis(25);

fn recommendation_for(score: u8) -> &'static str {
    if score >= 85 {
        "Disk health is within acceptable parameters for wiping."
    } else if score >= HEALTH_GATE_THRESHOLD {
        "Disk shows minor wear but is safe to wipe."
    } else {
        "Disk health is degraded. Inspect or replace the drive before wiping."
    }
}

fn lock_rng(rng: &Mutex<StdRng>) -> std::sync::MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SimulatedHealthProbe {
    rng: Mutex<StdRng>,
    tick: Duration,
    forced_score: Option<u8>,
}

impl Default for SimulatedHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHealthProbe {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            tick: DEFAULT_HEALTH_TICK,
            forced_score: None,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new()
        }
    }

    /// Always report this health score
    pub fn with_score(mut self, score: u8) -> Self {
        self.forced_score = Some(score);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn draw_report(&self) -> HealthReport {
        let mut rng = lock_rng(&self.rng);
        let health_score = self
            .forced_score
            .unwrap_or_else(|| rng.gen_range(60..=95));

        HealthReport {
            health_score,
            bad_sectors: rng.gen_range(0..50),
            temperature: rng.gen_range(25..=45),
            read_errors: rng.gen_range(0..20),
            write_errors: rng.gen_range(0..10),
            recommendation: recommendation_for(health_score).to_string(),
        }
    }
}

#[async_trait]
impl HealthProbe for SimulatedHealthProbe {
    async fn analyze(
        &self,
        platform: Platform,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<HealthReport, CapabilityError> {
        tracing::debug!(%platform, "Simulating disk health analysis");

        let mut percent = 0u8;
        while percent < 100 {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Interrupted);
            }
            tokio::time::sleep(self.tick).await;
            percent = percent.saturating_add(HEALTH_STEP_PERCENT);
            progress.report(percent);
        }

        Ok(self.draw_report())
    }
}

pub struct SimulatedOverwriter {
    rng: Mutex<StdRng>,
    tick: Duration,
}

impl Default for SimulatedOverwriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOverwriter {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            tick: DEFAULT_WIPE_TICK,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new()
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

#[async_trait]
impl Overwriter for SimulatedOverwriter {
    async fn overwrite(
        &self,
        request: &OverwriteRequest,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<OverwriteOutcome, CapabilityError> {
        let passes = u64::from(request.wipe_method.passes().max(1));
        let steps_per_pass = WIPE_TOTAL_STEPS.div_ceil(passes).max(1);
        let total = passes * steps_per_pass;

        for pass in 0..passes {
            tracing::debug!(
                target = %request.target_path,
                pass = pass + 1,
                passes,
                "Simulating overwrite pass"
            );
            for step in 1..=steps_per_pass {
                if cancel.is_cancelled() {
                    return Err(CapabilityError::Interrupted);
                }
                tokio::time::sleep(self.tick).await;
                progress.report_fraction(pass * steps_per_pass + step, total);
            }
        }

        let mut rng = lock_rng(&self.rng);
        Ok(OverwriteOutcome {
            size_gb: rng.gen_range(50..550),
            duration_minutes: rng.gen_range(30..150),
        })
    }
}
