//! Linear passive components: Resistor, Capacitor, Inductor.

use crate::circuit::NodeId;
use crate::error::{require_finite, require_positive, Result};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::Device;

/// A resistor component.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub nodes: [NodeId; 2],
    resistance: f64,
    current: f64,
}

impl Resistor {
    /// Create a new resistor. The resistance must be positive and finite.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], resistance: f64) -> Result<Self> {
        let name = name.into();
        let resistance = require_positive(&name, "resistance", resistance)?;
        Ok(Self {
            name,
            nodes,
            resistance,
            current: 0.0,
        })
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }

    /// Takes effect at the next analysis.
    pub fn set_resistance(&mut self, resistance: f64) -> Result<()> {
        self.resistance = require_positive(&self.name, "resistance", resistance)?;
        Ok(())
    }
}

impl Device for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_resistor(self.nodes[0], self.nodes[1], self.resistance);
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        let v = solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1]);
        self.current = v / self.resistance;
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            -self.current
        } else {
            self.current
        }
    }

    fn reset(&mut self) {
        self.current = 0.0;
    }
}

/// A capacitor component.
///
/// In discrete-time simulation, a capacitor is modeled using a companion model.
/// Using the trapezoidal rule the capacitor becomes a resistor
///   R_comp = dt / 2C
/// in parallel with a current source that carries the history:
///   I_src = -v(t-dt) / R_comp - i(t-dt)
///
/// The resistor is stamped once at analysis, the source once per timestep.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub nodes: [NodeId; 2],
    capacitance: f64,
    initial_voltage: f64,
    comp_resistance: f64,
    source_current: f64,
    /// Voltage across the capacitor after the last committed step
    voltage: f64,
    current: f64,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], capacitance: f64) -> Result<Self> {
        let name = name.into();
        let capacitance = require_positive(&name, "capacitance", capacitance)?;
        Ok(Self {
            name,
            nodes,
            capacitance,
            initial_voltage: 0.0,
            comp_resistance: 0.0,
            source_current: 0.0,
            voltage: 0.0,
            current: 0.0,
        })
    }

    /// Builder: voltage the capacitor holds at time zero and after a reset.
    pub fn with_initial_voltage(mut self, voltage: f64) -> Result<Self> {
        self.initial_voltage = require_finite(&self.name, "initial_voltage", voltage)?;
        self.voltage = self.initial_voltage;
        Ok(self)
    }

    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }

    /// Takes effect at the next analysis.
    pub fn set_capacitance(&mut self, capacitance: f64) -> Result<()> {
        self.capacitance = require_positive(&self.name, "capacitance", capacitance)?;
        Ok(())
    }

    /// Voltage across the capacitor at the last committed step.
    pub fn voltage_diff(&self) -> f64 {
        self.voltage
    }
}

impl Device for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, ctx: &SolverContext) {
        self.comp_resistance = ctx.timestep / (2.0 * self.capacitance);
        matrix.stamp_resistor(self.nodes[0], self.nodes[1], self.comp_resistance);
        matrix.mark_right_changes(self.nodes[0]);
        matrix.mark_right_changes(self.nodes[1]);
    }

    fn start_iteration(&mut self, _solution: &Solution, _ctx: &SolverContext) {
        self.source_current = -self.voltage / self.comp_resistance - self.current;
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, _solution: &Solution, _ctx: &mut SolverContext) {
        matrix.stamp_current_source(self.nodes[0], self.nodes[1], self.source_current);
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        self.voltage = solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1]);
        self.current = self.voltage / self.comp_resistance + self.source_current;
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            -self.current
        } else {
            self.current
        }
    }

    fn reset(&mut self) {
        self.voltage = self.initial_voltage;
        self.current = 0.0;
        self.source_current = 0.0;
    }
}

/// An inductor component.
///
/// Trapezoidal companion: a resistor
///   R_comp = 2L / dt
/// in parallel with a current source
///   I_src = v(t-dt) / R_comp + i(t-dt)
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub nodes: [NodeId; 2],
    inductance: f64,
    initial_current: f64,
    comp_resistance: f64,
    source_current: f64,
    voltage: f64,
    current: f64,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], inductance: f64) -> Result<Self> {
        let name = name.into();
        let inductance = require_positive(&name, "inductance", inductance)?;
        Ok(Self {
            name,
            nodes,
            inductance,
            initial_current: 0.0,
            comp_resistance: 0.0,
            source_current: 0.0,
            voltage: 0.0,
            current: 0.0,
        })
    }

    /// Builder: current flowing at time zero and after a reset.
    pub fn with_initial_current(mut self, current: f64) -> Result<Self> {
        self.initial_current = require_finite(&self.name, "initial_current", current)?;
        self.current = self.initial_current;
        Ok(self)
    }

    pub fn inductance(&self) -> f64 {
        self.inductance
    }

    /// Takes effect at the next analysis.
    pub fn set_inductance(&mut self, inductance: f64) -> Result<()> {
        self.inductance = require_positive(&self.name, "inductance", inductance)?;
        Ok(())
    }
}

impl Device for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, ctx: &SolverContext) {
        self.comp_resistance = 2.0 * self.inductance / ctx.timestep;
        matrix.stamp_resistor(self.nodes[0], self.nodes[1], self.comp_resistance);
        matrix.mark_right_changes(self.nodes[0]);
        matrix.mark_right_changes(self.nodes[1]);
    }

    fn start_iteration(&mut self, _solution: &Solution, _ctx: &SolverContext) {
        self.source_current = self.voltage / self.comp_resistance + self.current;
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, _solution: &Solution, _ctx: &mut SolverContext) {
        matrix.stamp_current_source(self.nodes[0], self.nodes[1], self.source_current);
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        self.voltage = solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1]);
        self.current = self.voltage / self.comp_resistance + self.source_current;
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            -self.current
        } else {
            self.current
        }
    }

    fn reset(&mut self) {
        self.voltage = 0.0;
        self.current = self.initial_current;
        self.source_current = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resistor_conductance() {
        let r = Resistor::new("R1", [NodeId(1), NodeId(0)], 1000.0).unwrap();
        assert_relative_eq!(r.conductance(), 0.001);
        assert!(Resistor::new("R2", [NodeId(1), NodeId(0)], 0.0).is_err());
        assert!(Resistor::new("R3", [NodeId(1), NodeId(0)], f64::INFINITY).is_err());
    }

    #[test]
    fn test_capacitor_companion_model() {
        let mut c = Capacitor::new("C1", [NodeId(1), NodeId(0)], 1e-6).unwrap();
        let dt = 1.0 / 48000.0;
        let ctx = SolverContext::new(dt, 0);
        let mut matrix = MnaMatrix::new(2, 0);
        c.stamp(&mut matrix, &ctx);

        // G_eq = 2C/dt = 96 mS
        assert_relative_eq!(matrix.get(0, 0), 0.096, epsilon = 1e-9);
        assert!(matrix.row_info(NodeId(1)).is_some_and(|row| row.right_changes));

        // Initial current source should be 0
        c.start_iteration(&Solution::default(), &ctx);
        assert_eq!(c.source_current, 0.0);
    }

    #[test]
    fn test_capacitor_history() {
        let mut c = Capacitor::new("C1", [NodeId(1), NodeId(0)], 1e-6).unwrap();
        let mut ctx = SolverContext::new(1e-6, 0);
        let mut matrix = MnaMatrix::new(2, 0);
        c.stamp(&mut matrix, &ctx);
        c.start_iteration(&Solution::default(), &ctx);

        let mut solution = Solution::new(2, 0);
        solution.set_voltage(NodeId(1), 1.0);
        c.iteration_finished(&solution, &mut ctx);
        // i = v / R_comp with R_comp = dt/2C = 0.5 ohm
        assert_relative_eq!(c.current(), -2.0);
        assert_relative_eq!(c.current_into_node(1), 2.0);

        c.start_iteration(&solution, &ctx);
        assert_relative_eq!(c.source_current, -1.0 / 0.5 - 2.0);
    }

    #[test]
    fn test_capacitor_initial_voltage_survives_reset() {
        let mut c = Capacitor::new("C1", [NodeId(1), NodeId(0)], 1e-6)
            .unwrap()
            .with_initial_voltage(3.0)
            .unwrap();
        c.voltage = 0.2;
        c.reset();
        assert_eq!(c.voltage_diff(), 3.0);
    }

    #[test]
    fn test_inductor_companion_model() {
        let mut l = Inductor::new("L1", [NodeId(1), NodeId(0)], 1e-3)
            .unwrap()
            .with_initial_current(0.01)
            .unwrap();
        let ctx = SolverContext::new(1e-6, 0);
        let mut matrix = MnaMatrix::new(2, 0);
        l.stamp(&mut matrix, &ctx);
        // R_comp = 2L/dt = 2000 ohm
        assert_relative_eq!(matrix.get(0, 0), 1.0 / 2000.0);

        l.start_iteration(&Solution::default(), &ctx);
        assert_relative_eq!(l.source_current, 0.01);
        assert!(Inductor::new("L2", [NodeId(1), NodeId(0)], -1.0).is_err());
    }
}
