use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::timers::TimerId;

/// Per-frame height update tuning. Fixed once a frame is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeightUpdateConfig {
    pub throttle_ms: u64,
    pub min_height_change: u32,
    pub min_height: u32,
    pub transition_duration: u64,
}

impl Default for HeightUpdateConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 100,
            min_height_change: 10,
            min_height: 400,
            transition_duration: 300,
        }
    }
}

impl HeightUpdateConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_duration)
    }
}

/// A deferred trailing update waiting for the throttle boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    pub timer: TimerId,
    pub height: u32,
}

/// Height bookkeeping for one managed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightState {
    /// Last height accepted from the frame, before the `min_height` clamp.
    pub last_height: u32,
    pub last_update: Instant,
    pub pending: Option<PendingUpdate>,
}

impl HeightState {
    /// The throttle window opens when management starts, so a burst of
    /// reports arriving right away is coalesced like any other.
    pub fn new(now: Instant) -> Self {
        Self {
            last_height: 0,
            last_update: now,
            pending: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within `min_height_change` of the last height. Any pending update is
    /// stale and must be dropped too.
    Discard,
    ApplyNow,
    /// Apply at the throttle boundary, `Duration` from now, replacing any
    /// pending update.
    Defer(Duration),
}

pub fn decide(
    state: &HeightState,
    config: &HeightUpdateConfig,
    height: u32,
    now: Instant,
) -> Decision {
    if height.abs_diff(state.last_height) < config.min_height_change {
        return Decision::Discard;
    }

    let elapsed = now.saturating_duration_since(state.last_update);
    if elapsed < config.throttle() {
        Decision::Defer(config.throttle() - elapsed)
    } else {
        Decision::ApplyNow
    }
}
