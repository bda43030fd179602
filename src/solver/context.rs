//! Per-run solver state shared with every device call.

use crate::circuit::ElementId;

/// Why a run was halted.
#[derive(Debug, Clone, PartialEq)]
pub struct StopInfo {
    /// Human-readable cause
    pub message: String,
    /// Element the stop is attributed to, if any
    pub element: Option<ElementId>,
}

/// SplitMix64 mixing step.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Convergence flag, counters and time for the step in progress.
///
/// The driver owns one context and hands it to every device call. Devices
/// clear `converged` when their linearization moved too far, read
/// `sub_iterations` for gmin stepping and relaxed tolerances, and call
/// [`stop`](Self::stop) on runaway numeric state.
#[derive(Debug, Clone)]
pub struct SolverContext {
    /// Cleared by any device that has not settled in this sub-iteration
    pub converged: bool,
    /// Index of the sub-iteration in progress
    pub sub_iterations: usize,
    /// Simulation time of the step being solved (seconds)
    pub time: f64,
    /// Timestep (seconds)
    pub timestep: f64,
    stop: Option<StopInfo>,
    current_element: Option<ElementId>,
    seed: u64,
    rng_state: u64,
}

impl SolverContext {
    /// Create a context with the given timestep and dither seed.
    pub fn new(timestep: f64, seed: u64) -> Self {
        Self {
            converged: true,
            sub_iterations: 0,
            time: 0.0,
            timestep,
            stop: None,
            current_element: None,
            seed,
            rng_state: seed,
        }
    }

    /// Signal a fatal condition, attributed to the element being visited.
    ///
    /// Only the first stop of a step is kept.
    pub fn stop(&mut self, message: impl Into<String>) {
        if self.stop.is_none() {
            self.stop = Some(StopInfo {
                message: message.into(),
                element: self.current_element,
            });
        }
    }

    /// The pending stop, if any.
    pub fn stop_info(&self) -> Option<&StopInfo> {
        self.stop.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }

    pub(crate) fn take_stop(&mut self) -> Option<StopInfo> {
        self.stop.take()
    }

    pub(crate) fn set_current_element(&mut self, element: Option<ElementId>) {
        self.current_element = element;
    }

    /// Uniform integer in `0..n` from the dither generator.
    pub fn random(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        self.rng_state = self.rng_state.wrapping_add(1);
        (splitmix64(self.rng_state) % n as u64) as u32
    }

    /// Rewind time, clear any stop and reseed the dither generator.
    pub fn reset(&mut self) {
        self.converged = true;
        self.sub_iterations = 0;
        self.time = 0.0;
        self.stop = None;
        self.current_element = None;
        self.rng_state = self.seed;
    }
}
