//! Simulation clock driven by sensor timing requests

use contracts::{FrameSource, FrameTick};
use tracing::trace;

/// Fixed-step clock that honours the delta requested by the registry.
///
/// The first tick is frame 0 at time 0. Later ticks advance by the requested
/// delta, or by `default_delta` when no sensor asks for one.
#[derive(Debug, Clone)]
pub struct SimulationClock {
    default_delta: f64,
    current: Option<FrameTick>,
}

impl SimulationClock {
    pub fn new(default_delta: f64) -> Self {
        Self {
            default_delta,
            current: None,
        }
    }

    pub fn default_delta(&self) -> f64 {
        self.default_delta
    }

    pub fn current(&self) -> Option<FrameTick> {
        self.current
    }
}

impl FrameSource for SimulationClock {
    fn next_tick(&mut self, requested_delta: Option<f64>) -> FrameTick {
        let tick = match self.current {
            None => FrameTick::new(0, 0.0),
            Some(previous) => {
                let delta = requested_delta
                    .filter(|delta| delta.is_finite() && *delta > 0.0)
                    .unwrap_or(self.default_delta);
                FrameTick::new(previous.frame + 1, previous.elapsed + delta)
            }
        };
        trace!(frame = tick.frame, elapsed = tick.elapsed, "clock tick");
        self.current = Some(tick);
        tick
    }
}
