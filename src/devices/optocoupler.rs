//! Optocoupler: an LED whose current drives the base of a phototransistor.
//!
//! Internally:
//!   anode --[diode]-- sense --[0 V source]-- cathode
//!   collector --[CCCS f(I_led)]--> base
//!   NPN (base, collector, emitter), beta = 700
//!
//! The 0 V source measures the LED current. The current-controlled source
//! follows an empirical transfer curve and is linearized around the present
//! LED current every sub-iteration.

use crate::circuit::{BranchId, NodeId};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::bjt::{Bjt, BjtType};
use super::diode::Diode;
use super::diode_model::DiodeModel;
use super::Device;

/// Current gain of the output transistor.
pub const OPTOCOUPLER_HFE: f64 = 700.0;

/// Largest base drive the transfer curve produces (amps).
const MAX_BASE_DRIVE: f64 = 1e-4;

/// LED current where the transfer curve changes polynomial (amps).
const CURVE_KNEE: f64 = 0.003;

/// Step used for the numeric derivative of the transfer curve.
const DERIVATIVE_STEP: f64 = 1e-6;

/// Smallest slope stamped for the transfer curve.
const MIN_SLOPE: f64 = 1e-6;

/// Base drive for an LED current.
pub fn transfer_curve(i: f64) -> f64 {
    let drive = if i - CURVE_KNEE > 0.0 {
        (9_000_000.0 * i.powi(5) - 998_113.0 * i.powi(4) + 42_174.0 * i.powi(3)
            - 861.32 * i.powi(2)
            + 9.0836 * i
            - 0.00780)
            * 0.945
            / OPTOCOUPLER_HFE
    } else {
        (-80_000_000_000.0 * i.powi(5) + 800_000_000.0 * i.powi(4) - 3_000_000.0 * i.powi(3)
            + 5177.20 * i.powi(2)
            + 0.2453 * i
            - 0.00005)
            * 1.040
            / OPTOCOUPLER_HFE
    };
    drive.clamp(0.0, MAX_BASE_DRIVE)
}

/// Allowed LED current change per sub-iteration, relaxed as the count grows.
fn convergence_limit(sub_iterations: usize) -> f64 {
    if sub_iterations < 10 {
        1e-4
    } else if sub_iterations < 200 {
        1e-3
    } else {
        1e-2
    }
}

/// Linearized drive `i_out = slope * i_led + offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DriveLinearization {
    slope: f64,
    offset: f64,
}

impl DriveLinearization {
    fn around(i: f64) -> Self {
        let v0 = transfer_curve(i);
        let upper = transfer_curve(i + DERIVATIVE_STEP);
        let lower = transfer_curve(i - DERIVATIVE_STEP);
        let mut slope = (upper - lower) / (2.0 * DERIVATIVE_STEP);
        if slope.abs() < MIN_SLOPE {
            slope = if slope < 0.0 { -MIN_SLOPE } else { MIN_SLOPE };
        }
        Self {
            slope,
            offset: v0 - slope * i,
        }
    }

    fn current(&self, i: f64) -> f64 {
        self.slope * i + self.offset
    }
}

/// An optocoupler component.
#[derive(Debug, Clone)]
pub struct Optocoupler {
    pub name: String,
    pub nodes: [NodeId; 4], // [anode, cathode, collector, emitter]
    diode: Diode,
    transistor: Bjt,
    sense: NodeId,
    base: NodeId,
    branch: BranchId,
    last_led_current: f64,
    applied: DriveLinearization,
    pending: DriveLinearization,
    led_current: f64,
    drive_current: f64,
}

impl Optocoupler {
    pub fn new(name: impl Into<String>, nodes: [NodeId; 4]) -> Self {
        let name = name.into();
        let diode = Diode::new(
            format!("{name}.led"),
            [nodes[0], NodeId::GROUND],
            DiodeModel::default_model(),
        );
        let transistor = Bjt::with_fixed_hfe(
            format!("{name}.q"),
            [NodeId::GROUND, nodes[2], nodes[3]],
            BjtType::Npn,
            OPTOCOUPLER_HFE,
        );
        Self {
            name,
            nodes,
            diode,
            transistor,
            sense: NodeId::GROUND,
            base: NodeId::GROUND,
            branch: BranchId(0),
            last_led_current: 0.0,
            applied: DriveLinearization::default(),
            pending: DriveLinearization::default(),
            led_current: 0.0,
            drive_current: 0.0,
        }
    }

    /// Current through the LED at the last committed step.
    pub fn led_current(&self) -> f64 {
        self.led_current
    }

    /// Base drive produced by the transfer curve at the last committed step.
    pub fn drive_current(&self) -> f64 {
        self.drive_current
    }

    /// The output transistor.
    pub fn transistor(&self) -> &Bjt {
        &self.transistor
    }

    pub fn collector(&self) -> NodeId {
        self.nodes[2]
    }
}

impl Device for Optocoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn internal_node_count(&self) -> usize {
        2
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn bind(&mut self, internal: &[NodeId], branches: &[BranchId]) {
        self.sense = internal[0];
        self.base = internal[1];
        self.branch = branches[0];
        self.diode.nodes = [self.nodes[0], self.sense];
        self.diode.bind(&[], &[]);
        self.transistor.nodes = [self.base, self.nodes[2], self.nodes[3]];
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, ctx: &SolverContext) {
        self.diode.stamp(matrix, ctx);
        matrix.stamp_voltage_source(self.sense, self.nodes[1], self.branch, 0.0);
        matrix.stamp_non_linear(self.collector());
        matrix.stamp_non_linear(self.base);
        self.transistor.stamp(matrix, ctx);
    }

    fn start_iteration(&mut self, solution: &Solution, ctx: &SolverContext) {
        self.diode.start_iteration(solution, ctx);
        self.transistor.start_iteration(solution, ctx);
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        self.diode.do_iteration(matrix, solution, ctx);

        let cur = solution.branch_current(self.branch);
        if (cur - self.last_led_current).abs() > convergence_limit(ctx.sub_iterations) {
            ctx.converged = false;
        }
        let drive = DriveLinearization::around(cur);
        matrix.stamp_cccs(self.collector(), self.base, self.branch, drive.slope);
        matrix.stamp_current_source(self.collector(), self.base, drive.offset);
        self.applied = self.pending;
        self.pending = drive;
        self.last_led_current = cur;

        self.transistor.do_iteration(matrix, solution, ctx);
    }

    fn iteration_finished(&mut self, solution: &Solution, ctx: &mut SolverContext) {
        self.diode.iteration_finished(solution, ctx);
        self.transistor.iteration_finished(solution, ctx);
        self.led_current = solution.branch_current(self.branch);
        self.drive_current = self.applied.current(self.led_current);
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        match terminal {
            0 => self.diode.current_into_node(0),
            1 => self.led_current,
            2 => self.transistor.current_into_node(1) - self.drive_current,
            _ => self.transistor.current_into_node(2),
        }
    }

    /// LED current.
    fn current(&self) -> f64 {
        self.led_current
    }

    fn reset(&mut self) {
        self.diode.reset();
        self.transistor.reset();
        self.last_led_current = 0.0;
        self.applied = DriveLinearization::default();
        self.pending = DriveLinearization::default();
        self.led_current = 0.0;
        self.drive_current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    // Input and output sides are isolated
    fn connects(&self, a: usize, b: usize) -> bool {
        a / 2 == b / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transfer_curve_clamped() {
        assert_eq!(transfer_curve(0.0), 0.0);
        assert_eq!(transfer_curve(-1.0), 0.0);
        assert!(transfer_curve(0.05) <= MAX_BASE_DRIVE);
        for i in [0.001, 0.002, 0.005, 0.01, 0.02] {
            let drive = transfer_curve(i);
            assert!((0.0..=MAX_BASE_DRIVE).contains(&drive), "drive {drive} at {i}");
        }
        assert!(transfer_curve(0.01) > transfer_curve(0.001));
    }

    #[test]
    fn test_drive_linearization_minimum_slope() {
        // The curve is flat (clamped) at zero current
        let lin = DriveLinearization::around(0.0);
        assert_eq!(lin.slope, MIN_SLOPE);
        assert_relative_eq!(lin.current(0.0), 0.0);
    }

    #[test]
    fn test_drive_linearization_matches_curve() {
        let i = 0.002;
        let lin = DriveLinearization::around(i);
        assert_relative_eq!(lin.current(i), transfer_curve(i), epsilon = 1e-15);
    }

    #[test]
    fn test_convergence_limit_relaxes() {
        assert_eq!(convergence_limit(0), 1e-4);
        assert_eq!(convergence_limit(10), 1e-3);
        assert_eq!(convergence_limit(200), 1e-2);
    }

    #[test]
    fn test_isolation() {
        let opto = Optocoupler::new("U1", [NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
        assert!(opto.connects(0, 1));
        assert!(opto.connects(2, 3));
        assert!(!opto.connects(1, 2));
        assert_eq!(opto.transistor().hfe(), OPTOCOUPLER_HFE);
    }
}
