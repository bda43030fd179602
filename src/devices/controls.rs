//! Control components: Potentiometer, Switch and AnalogSwitch.

use crate::circuit::NodeId;
use crate::error::{require_finite, require_positive, Result};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::Device;

/// A potentiometer component.
///
/// Modeled as two resistors in series with a wiper tap:
///   n1 ----[R1]---- wiper ----[R2]---- n2
///
/// where R1 = position * total_resistance
/// and   R2 = (1 - position) * total_resistance
#[derive(Debug, Clone)]
pub struct Potentiometer {
    pub name: String,
    pub nodes: [NodeId; 3], // [n1, wiper, n2]
    total_resistance: f64,
    /// Position from 0.0 to 1.0
    position: f64,
    current1: f64,
    current2: f64,
}

impl Potentiometer {
    /// Create a new potentiometer.
    pub fn new(
        name: impl Into<String>,
        nodes: [NodeId; 3],
        total_resistance: f64,
        position: f64,
    ) -> Result<Self> {
        let name = name.into();
        let total_resistance = require_positive(&name, "total_resistance", total_resistance)?;
        let position = require_finite(&name, "position", position)?;
        Ok(Self {
            name,
            nodes,
            total_resistance,
            position: position.clamp(0.001, 0.999), // Avoid zero resistance
            current1: 0.0,
            current2: 0.0,
        })
    }

    /// Get the resistance from n1 to wiper.
    pub fn r1(&self) -> f64 {
        self.position * self.total_resistance
    }

    /// Get the resistance from wiper to n2.
    pub fn r2(&self) -> f64 {
        (1.0 - self.position) * self.total_resistance
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn total_resistance(&self) -> f64 {
        self.total_resistance
    }

    /// Set the wiper position. Takes effect at the next analysis.
    pub fn set_position(&mut self, position: f64) -> Result<()> {
        let position = require_finite(&self.name, "position", position)?;
        self.position = position.clamp(0.001, 0.999);
        Ok(())
    }

    pub fn set_total_resistance(&mut self, resistance: f64) -> Result<()> {
        self.total_resistance = require_positive(&self.name, "total_resistance", resistance)?;
        Ok(())
    }

    /// Get node n1.
    pub fn n1(&self) -> NodeId {
        self.nodes[0]
    }

    /// Get the wiper node.
    pub fn wiper(&self) -> NodeId {
        self.nodes[1]
    }

    /// Get node n2.
    pub fn n2(&self) -> NodeId {
        self.nodes[2]
    }
}

impl Device for Potentiometer {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_resistor(self.n1(), self.wiper(), self.r1());
        matrix.stamp_resistor(self.wiper(), self.n2(), self.r2());
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        let (v1, vw, v2) = (
            solution.voltage(self.n1()),
            solution.voltage(self.wiper()),
            solution.voltage(self.n2()),
        );
        self.current1 = (v1 - vw) / self.r1();
        self.current2 = (vw - v2) / self.r2();
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        match terminal {
            0 => -self.current1,
            1 => self.current1 - self.current2,
            _ => self.current2,
        }
    }

    /// Current through the n1 leg.
    fn current(&self) -> f64 {
        self.current1
    }

    fn reset(&mut self) {
        self.current1 = 0.0;
        self.current2 = 0.0;
    }
}

/// A switch component.
///
/// Modeled as a resistance:
/// - Closed: very small resistance (0.01 ohms)
/// - Open: very large resistance (1e9 ohms)
#[derive(Debug, Clone)]
pub struct Switch {
    pub name: String,
    pub nodes: [NodeId; 2],
    closed: bool,
    current: f64,
}

impl Switch {
    /// Resistance when closed.
    pub const R_CLOSED: f64 = 0.01;
    /// Resistance when open.
    pub const R_OPEN: f64 = 1e9;

    /// Create a new switch.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], closed: bool) -> Self {
        Self {
            name: name.into(),
            nodes,
            closed,
            current: 0.0,
        }
    }

    /// Get the current resistance.
    pub fn resistance(&self) -> f64 {
        if self.closed {
            Self::R_CLOSED
        } else {
            Self::R_OPEN
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Set the switch state.
    pub fn set_state(&mut self, closed: bool) {
        self.closed = closed;
    }

    /// Toggle the switch state.
    pub fn toggle(&mut self) {
        self.closed = !self.closed;
    }
}

impl Device for Switch {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_resistor(self.nodes[0], self.nodes[1], self.resistance());
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        let v = solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1]);
        self.current = v / self.resistance();
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

/// Control voltage at which an analog switch changes state.
const ANALOG_SWITCH_THRESHOLD: f64 = 2.5;

/// A voltage-controlled switch.
///
/// The a-b path is `r_on` when the control node is at or above 2.5 V and
/// `r_off` below it, swapped when `invert` is set. The control input draws
/// no current.
#[derive(Debug, Clone)]
pub struct AnalogSwitch {
    pub name: String,
    pub nodes: [NodeId; 3], // [a, b, control]
    r_on: f64,
    r_off: f64,
    invert: bool,
    open: bool,
    /// Resistance that produced the latest solution
    applied_resistance: f64,
    pending_resistance: f64,
    current: f64,
}

impl AnalogSwitch {
    pub const DEFAULT_R_ON: f64 = 100.0;
    pub const DEFAULT_R_OFF: f64 = 1e8;

    pub fn new(name: impl Into<String>, nodes: [NodeId; 3]) -> Self {
        Self {
            name: name.into(),
            nodes,
            r_on: Self::DEFAULT_R_ON,
            r_off: Self::DEFAULT_R_OFF,
            invert: false,
            open: true,
            applied_resistance: Self::DEFAULT_R_OFF,
            pending_resistance: Self::DEFAULT_R_OFF,
            current: 0.0,
        }
    }

    /// Builder: on/off resistances.
    pub fn with_resistances(mut self, r_on: f64, r_off: f64) -> Result<Self> {
        self.set_resistances(r_on, r_off)?;
        Ok(self)
    }

    /// Builder: invert the control sense.
    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn set_resistances(&mut self, r_on: f64, r_off: f64) -> Result<()> {
        let r_on = require_positive(&self.name, "r_on", r_on)?;
        let r_off = require_positive(&self.name, "r_off", r_off)?;
        self.r_on = r_on;
        self.r_off = r_off;
        Ok(())
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    pub fn r_on(&self) -> f64 {
        self.r_on
    }

    pub fn r_off(&self) -> f64 {
        self.r_off
    }

    /// State chosen in the latest sub-iteration.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Device for AnalogSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_non_linear(self.nodes[0]);
        matrix.stamp_non_linear(self.nodes[1]);
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, _ctx: &mut SolverContext) {
        self.open = (solution.voltage(self.nodes[2]) < ANALOG_SWITCH_THRESHOLD) != self.invert;
        let resistance = if self.open { self.r_off } else { self.r_on };
        matrix.stamp_resistor(self.nodes[0], self.nodes[1], resistance);
        self.applied_resistance = self.pending_resistance;
        self.pending_resistance = resistance;
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        let v = solution.voltage(self.nodes[0]) - solution.voltage(self.nodes[1]);
        self.current = v / self.applied_resistance;
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        match terminal {
            0 => -self.current,
            1 => self.current,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.open = true;
        self.applied_resistance = self.r_off;
        self.pending_resistance = self.r_off;
        self.current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    // The control pin is isolated from the switched path
    fn connects(&self, a: usize, b: usize) -> bool {
        !(a == 2 || b == 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_potentiometer_resistance() {
        let pot = Potentiometer::new("P1", [NodeId(1), NodeId(2), NodeId(3)], 10_000.0, 0.5).unwrap();
        assert_relative_eq!(pot.r1(), 5000.0);
        assert_relative_eq!(pot.r2(), 5000.0);
    }

    #[test]
    fn test_potentiometer_clamping() {
        let mut pot = Potentiometer::new("P1", [NodeId(1), NodeId(2), NodeId(3)], 10_000.0, 0.0).unwrap();
        assert!(pot.r1() > 0.0);

        pot.set_position(2.0).unwrap();
        assert!(pot.r2() > 0.0);
        assert!(pot.set_position(f64::NAN).is_err());
        assert!(pot.set_total_resistance(-5.0).is_err());
    }

    #[test]
    fn test_potentiometer_currents_balance() {
        let mut pot = Potentiometer::new("P1", [NodeId(1), NodeId(2), NodeId(0)], 1000.0, 0.25).unwrap();
        let mut solution = Solution::new(3, 0);
        solution.set_voltage(NodeId(1), 10.0);
        solution.set_voltage(NodeId(2), 7.5);
        let mut ctx = SolverContext::new(1e-6, 0);
        pot.iteration_finished(&solution, &mut ctx);

        assert_relative_eq!(pot.current(), 0.01);
        let sum: f64 = (0..3).map(|t| pot.current_into_node(t)).sum();
        assert_relative_eq!(sum, 0.0, epsilon = 1e-15);
        assert_relative_eq!(pot.current_into_node(1), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_switch_resistance() {
        let mut sw = Switch::new("S1", [NodeId(1), NodeId(2)], true);
        assert_eq!(sw.resistance(), Switch::R_CLOSED);

        sw.toggle();
        assert_eq!(sw.resistance(), Switch::R_OPEN);
        assert!(!sw.is_closed());
    }

    #[test]
    fn test_analog_switch_control() {
        let mut sw = AnalogSwitch::new("S1", [NodeId(1), NodeId(2), NodeId(3)]);
        let mut ctx = SolverContext::new(1e-6, 0);
        let mut matrix = MnaMatrix::new(4, 0);
        let mut solution = Solution::new(4, 0);

        solution.set_voltage(NodeId(3), 5.0);
        sw.do_iteration(&mut matrix, &solution, &mut ctx);
        assert!(!sw.is_open());
        assert_relative_eq!(matrix.get(0, 0), 1.0 / AnalogSwitch::DEFAULT_R_ON);

        let mut inverted = sw.clone().inverted(true);
        inverted.do_iteration(&mut matrix, &solution, &mut ctx);
        assert!(inverted.is_open());
    }

    #[test]
    fn test_analog_switch_reports_applied_resistance() {
        let mut sw = AnalogSwitch::new("S1", [NodeId(1), NodeId(0), NodeId(2)]);
        let mut ctx = SolverContext::new(1e-6, 0);
        let mut matrix = MnaMatrix::new(3, 0);
        let mut solution = Solution::new(3, 0);
        solution.set_voltage(NodeId(1), 1.0);
        solution.set_voltage(NodeId(2), 5.0);

        // Second stamp moves the closed resistance into the applied slot
        sw.do_iteration(&mut matrix, &solution, &mut ctx);
        sw.do_iteration(&mut matrix, &solution, &mut ctx);
        sw.iteration_finished(&solution, &mut ctx);
        assert_relative_eq!(sw.current(), -sw.current_into_node(0));
        assert_relative_eq!(sw.current_into_node(1), 1.0 / AnalogSwitch::DEFAULT_R_ON);
        assert_eq!(sw.current_into_node(2), 0.0);
    }

    #[test]
    fn test_analog_switch_rejects_bad_resistance() {
        let sw = AnalogSwitch::new("S1", [NodeId(1), NodeId(2), NodeId(3)]);
        assert!(sw.clone().with_resistances(0.0, 1e8).is_err());
        assert!(sw.with_resistances(100.0, -1.0).is_err());
        let sw = AnalogSwitch::new("S1", [NodeId(1), NodeId(2), NodeId(3)]);
        assert!(!sw.connects(0, 2));
        assert!(sw.connects(0, 1));
    }
}
