//! Operational Amplifier model.
//!
//! The output is driven by a voltage-source row whose equation is rewritten
//! every sub-iteration:
//!   Vout = dx * (V+ - V-) + x
//!
//! In the linear region dx is the open-loop gain and x is zero. Near a rail
//! the row switches to a shallow slope pinned at the rail voltage.

use crate::circuit::{BranchId, NodeId};
use crate::error::{require_positive, Result, SimError};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::Device;

/// Slope of the output row while saturated.
const SATURATED_SLOPE: f64 = 1e-4;

/// Input difference change that keeps the op-amp unconverged (volts).
const INPUT_CONVERGENCE_LIMIT: f64 = 0.1;

/// Rail overshoot that keeps the op-amp unconverged (volts).
const RAIL_MARGIN: f64 = 0.1;

/// Parameters for an op-amp model.
#[derive(Debug, Clone, PartialEq)]
pub struct OpAmpParams {
    /// Positive output rail (volts)
    pub max_out: f64,
    /// Negative output rail (volts)
    pub min_out: f64,
    /// Open-loop DC gain
    pub gain: f64,
}

impl Default for OpAmpParams {
    fn default() -> Self {
        Self {
            max_out: 15.0,
            min_out: -15.0,
            gain: 100_000.0,
        }
    }
}

impl OpAmpParams {
    /// Validate the parameters for an element.
    pub fn validate(&self, element: &str) -> Result<()> {
        require_positive(element, "gain", self.gain)?;
        if !(self.max_out.is_finite() && self.min_out.is_finite()) || self.max_out <= self.min_out {
            return Err(SimError::invalid_parameter(
                element,
                "max_out",
                format!(
                    "rails must be finite with max_out > min_out, got {} and {}",
                    self.max_out, self.min_out
                ),
            ));
        }
        Ok(())
    }
}

/// An op-amp component.
#[derive(Debug, Clone)]
pub struct OpAmp {
    pub name: String,
    pub nodes: [NodeId; 3], // [inverting, non-inverting, output]
    params: OpAmpParams,
    branch: BranchId,
    last_vd: f64,
    current: f64,
}

impl OpAmp {
    /// Create an op-amp with the default rails and gain.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 3]) -> Self {
        Self {
            name: name.into(),
            nodes,
            params: OpAmpParams::default(),
            branch: BranchId(0),
            last_vd: 0.0,
            current: 0.0,
        }
    }

    /// Builder: custom parameters.
    pub fn with_params(mut self, params: OpAmpParams) -> Result<Self> {
        self.set_params(params)?;
        Ok(self)
    }

    pub fn set_params(&mut self, params: OpAmpParams) -> Result<()> {
        params.validate(&self.name)?;
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &OpAmpParams {
        &self.params
    }

    /// Get the inverting input node.
    pub fn inv_input(&self) -> NodeId {
        self.nodes[0]
    }

    /// Get the non-inverting input node.
    pub fn non_inv_input(&self) -> NodeId {
        self.nodes[1]
    }

    /// Get the output node.
    pub fn output(&self) -> NodeId {
        self.nodes[2]
    }

    /// Output row slope and offset for an input difference.
    fn output_row(&self, vd: f64, ctx: &mut SolverContext) -> (f64, f64) {
        let OpAmpParams {
            max_out,
            min_out,
            gain,
        } = self.params;
        // Crossing from the opposite rail is dithered to break oscillation
        if vd >= max_out / gain && (self.last_vd >= 0.0 || ctx.random(4) == 1) {
            let dx = SATURATED_SLOPE;
            (dx, max_out - dx * max_out / gain)
        } else if vd <= min_out / gain && (self.last_vd <= 0.0 || ctx.random(4) == 1) {
            let dx = SATURATED_SLOPE;
            (dx, min_out - dx * min_out / gain)
        } else {
            (gain, 0.0)
        }
    }
}

impl Device for OpAmp {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn bind(&mut self, _internal: &[NodeId], branches: &[BranchId]) {
        self.branch = branches[0];
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_non_linear(self.branch);
        matrix.stamp_matrix(self.output(), self.branch, 1.0);
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        let vd = solution.voltage(self.non_inv_input()) - solution.voltage(self.inv_input());
        let vo = solution.voltage(self.output());
        if (self.last_vd - vd).abs() > INPUT_CONVERGENCE_LIMIT {
            ctx.converged = false;
        } else if vo > self.params.max_out + RAIL_MARGIN || vo < self.params.min_out - RAIL_MARGIN {
            ctx.converged = false;
        }

        let (dx, x) = self.output_row(vd, ctx);
        matrix.stamp_matrix(self.branch, self.inv_input(), dx);
        matrix.stamp_matrix(self.branch, self.non_inv_input(), -dx);
        matrix.stamp_matrix(self.branch, self.output(), 1.0);
        matrix.stamp_right_side(self.branch, x);

        self.last_vd = vd;
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        self.current = solution.branch_current(self.branch);
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 2 {
            -self.current
        } else {
            0.0
        }
    }

    /// Current drawn from the output.
    fn current(&self) -> f64 {
        self.current
    }

    fn reset(&mut self) {
        self.last_vd = 0.0;
        self.current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    // No current path through the inputs
    fn connects(&self, _a: usize, _b: usize) -> bool {
        false
    }

    fn has_ground_connection(&self, terminal: usize) -> bool {
        terminal == 2
    }
}
