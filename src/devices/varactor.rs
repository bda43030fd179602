//! Varactor: a diode junction in parallel with a voltage-dependent capacitance.
//!
//! The capacitance uses the trapezoidal companion model in its Thevenin form,
//! a voltage source in series with a resistor. Both values are fixed for the
//! duration of a timestep.

use crate::circuit::{BranchId, NodeId};
use crate::error::{require_positive, Result};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::diode::{Junction, DIODE_CONVERGENCE_LIMIT};
use super::diode_model::DiodeModel;
use super::equations::MAX_JUNCTION_CURRENT;
use super::Device;

/// Default zero-bias capacitance (farads).
pub const DEFAULT_BASE_CAPACITANCE: f64 = 4e-12;

/// A varactor diode.
#[derive(Debug, Clone)]
pub struct Varactor {
    pub name: String,
    pub nodes: [NodeId; 2], // [anode, cathode]
    model: DiodeModel,
    junction: Junction,
    base_capacitance: f64,
    /// Node between the companion source and resistor
    internal: NodeId,
    branch: BranchId,
    capacitance: f64,
    comp_resistance: f64,
    source_value: f64,
    /// Voltage across the capacitor at the end of the previous timestep
    cap_voltage: f64,
    cap_current: f64,
    junction_current: f64,
}

impl Varactor {
    /// Create a varactor. The model's series resistance is not used.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], model: DiodeModel) -> Self {
        let junction = Junction::new(&model, DIODE_CONVERGENCE_LIMIT);
        Self {
            name: name.into(),
            nodes,
            model,
            junction,
            base_capacitance: DEFAULT_BASE_CAPACITANCE,
            internal: NodeId::GROUND,
            branch: BranchId(0),
            capacitance: DEFAULT_BASE_CAPACITANCE,
            comp_resistance: 0.0,
            source_value: 0.0,
            cap_voltage: 0.0,
            cap_current: 0.0,
            junction_current: 0.0,
        }
    }

    /// Builder: zero-bias capacitance.
    pub fn with_base_capacitance(mut self, c0: f64) -> Result<Self> {
        self.set_base_capacitance(c0)?;
        Ok(self)
    }

    pub fn set_base_capacitance(&mut self, c0: f64) -> Result<()> {
        self.base_capacitance = require_positive(&self.name, "base_capacitance", c0)?;
        Ok(())
    }

    pub fn set_model(&mut self, model: DiodeModel) {
        self.junction.setup(&model);
        self.model = model;
    }

    pub fn model(&self) -> &DiodeModel {
        &self.model
    }

    /// Capacitance used for the timestep in progress.
    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }

    fn voltage_diff(&self, solution: &Solution) -> f64 {
        solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1])
    }
}

impl Device for Varactor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn internal_node_count(&self) -> usize {
        1
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn bind(&mut self, internal: &[NodeId], branches: &[BranchId]) {
        self.internal = internal[0];
        self.branch = branches[0];
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        self.junction.stamp(matrix, self.nodes[0], self.nodes[1]);
        matrix.stamp_dynamic_voltage_source(self.nodes[0], self.internal, self.branch);
        matrix.stamp_non_linear(self.internal);
    }

    fn start_iteration(&mut self, _solution: &Solution, ctx: &SolverContext) {
        let c0 = self.base_capacitance;
        self.capacitance = if self.cap_voltage > 0.0 {
            c0
        } else {
            c0 / (1.0 - self.cap_voltage / self.model.fwdrop()).sqrt()
        };
        self.comp_resistance = ctx.timestep / (2.0 * self.capacitance);
        self.source_value = -self.cap_voltage - self.cap_current * self.comp_resistance;
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        let v = self.voltage_diff(solution);
        self.junction
            .do_iteration(matrix, self.nodes[0], self.nodes[1], v, ctx);
        matrix.stamp_resistor(self.internal, self.nodes[1], self.comp_resistance);
        matrix.update_voltage_source(self.branch, self.source_value);
    }

    fn iteration_finished(&mut self, solution: &Solution, ctx: &mut SolverContext) {
        self.cap_voltage = self.voltage_diff(solution);
        self.cap_current = solution.branch_current(self.branch);
        self.junction_current = self.junction.current(self.cap_voltage);
        if self.junction_current.abs() > MAX_JUNCTION_CURRENT {
            ctx.stop("max current exceeded");
        }
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        let current = self.junction_current + self.cap_current;
        if terminal == 0 {
            -current
        } else {
            current
        }
    }

    fn reset(&mut self) {
        self.junction.reset();
        self.cap_voltage = 0.0;
        self.cap_current = 0.0;
        self.junction_current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_capacitance_shrinks_in_reverse_bias() {
        let mut v = Varactor::new("V1", [NodeId(1), NodeId(2)], DiodeModel::default_model());
        let ctx = SolverContext::new(1e-6, 0);
        let solution = Solution::default();

        v.cap_voltage = 1.0;
        v.start_iteration(&solution, &ctx);
        assert_relative_eq!(v.capacitance(), DEFAULT_BASE_CAPACITANCE);

        v.cap_voltage = -5.0;
        v.start_iteration(&solution, &ctx);
        let fwdrop = v.model().fwdrop();
        assert_relative_eq!(
            v.capacitance(),
            DEFAULT_BASE_CAPACITANCE / (1.0 + 5.0 / fwdrop).sqrt()
        );
        assert!(v.capacitance() < DEFAULT_BASE_CAPACITANCE);
    }

    #[test]
    fn test_companion_values() {
        let mut v = Varactor::new("V1", [NodeId(1), NodeId(2)], DiodeModel::default_model());
        let ctx = SolverContext::new(2e-6, 0);
        v.cap_voltage = 0.5;
        v.cap_current = 1e-3;
        v.start_iteration(&Solution::default(), &ctx);
        let r = 2e-6 / (2.0 * DEFAULT_BASE_CAPACITANCE);
        assert_relative_eq!(v.comp_resistance, r);
        assert_relative_eq!(v.source_value, -0.5 - 1e-3 * r);
    }

    #[test]
    fn test_rejects_bad_capacitance() {
        let v = Varactor::new("V1", [NodeId(1), NodeId(2)], DiodeModel::default_model());
        assert!(v.with_base_capacitance(0.0).is_err());
    }
}
