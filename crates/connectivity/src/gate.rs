use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use treesync_protocol::constants::NETWORK_COOLDOWN;

use crate::probe::Probe;

/// Gate tuning.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// How long a failed probe short-circuits further checks.
    pub cooldown: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown: NETWORK_COOLDOWN,
        }
    }
}

/// Result of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The probe succeeded.
    Proceed,
    /// The probe failed just now.
    Down,
    /// A recent failure is still cooling down; no probe was sent.
    CoolingDown { remaining: Duration },
}

impl GateDecision {
    pub fn should_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed)
    }
}

/// Rate-limited reachability check guarding every dispatch cycle.
pub struct ConnectivityGate {
    probe: Arc<dyn Probe>,
    config: GateConfig,
    last_down: Mutex<Option<Instant>>,
}

impl ConnectivityGate {
    pub fn new(probe: Arc<dyn Probe>, config: GateConfig) -> Self {
        Self {
            probe,
            config,
            last_down: Mutex::new(None),
        }
    }

    /// Decides whether network work may proceed.
    ///
    /// A success leaves the cached failure time alone; the cool-down simply
    /// runs out.
    pub async fn check(&self) -> GateDecision {
        if let Some(remaining) = self.cooldown_remaining() {
            debug!(
                remaining_secs = remaining.as_secs(),
                "network recently down, skipping probe"
            );
            return GateDecision::CoolingDown { remaining };
        }

        if self.probe.is_reachable().await {
            return GateDecision::Proceed;
        }

        *self.last_down.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        warn!(
            cooldown_secs = self.config.cooldown.as_secs(),
            "network unreachable, pausing uploads"
        );
        GateDecision::Down
    }

    /// When the probe last failed, if ever.
    pub fn last_down(&self) -> Option<Instant> {
        *self.last_down.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let last = self.last_down()?;
        let elapsed = last.elapsed();
        (elapsed < self.config.cooldown).then(|| self.config.cooldown - elapsed)
    }
}
