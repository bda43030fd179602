//! Diode and Zener models.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! Reverse-biased Zeners add a flipped, translated exponential with the
//! steeper thermal-voltage slope:
//!   I = Is * (exp(V / (n * Vt)) - exp((-V - Vzoff) / Vt) - 1)
//!
//! For Newton-Raphson iteration, we linearize around the limited operating point:
//!   I ≈ geq * V + nc
//!
//! where geq = dI/dV + gmin and nc = I(V0) - geq * V0.

use crate::circuit::{BranchId, NodeId};
use crate::error::Result;
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::diode_model::{DiodeModel, ModelLibrary};
use super::equations::{
    check_step, critical_voltage, gmin, limit_junction_step, MAX_JUNCTION_CURRENT,
    THERMAL_VOLTAGE, VZ_COEF,
};
use super::Device;

/// Voltage change between sub-iterations that keeps a diode unconverged.
pub const DIODE_CONVERGENCE_LIMIT: f64 = 0.001;

/// Looser limit used by junctions embedded in other devices.
pub const EMBEDDED_CONVERGENCE_LIMIT: f64 = 0.01;

/// Current the Zener curve reaches at the breakdown voltage (amperes).
const ZENER_REFERENCE_CURRENT: f64 = -0.005;

/// gmin ramp length for diode junctions (sub-iterations to reach 1 S).
const DIODE_GMIN_RAMP: f64 = 3000.0;

/// Affine current model I(v) = geq * v + nc, flowing anode to cathode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct JunctionLinearization {
    pub geq: f64,
    pub nc: f64,
}

impl JunctionLinearization {
    pub fn current(&self, v: f64) -> f64 {
        self.geq * v + self.nc
    }
}

/// A P-N junction with step limiting and gmin stepping.
///
/// Shared by diodes, varactors, MOSFET body diodes, JFET gates and the
/// optocoupler LED.
#[derive(Debug, Clone)]
pub struct Junction {
    saturation_current: f64,
    breakdown_voltage: f64,
    vscale: f64,
    vdcoef: f64,
    zoffset: f64,
    vcrit: f64,
    vzcrit: f64,
    convergence_limit: f64,
    last_voltage: f64,
    /// Linearization that produced the last solve
    applied: JunctionLinearization,
    /// Linearization stamped in the sub-iteration in progress
    pending: JunctionLinearization,
}

impl Junction {
    /// Create a junction from a model.
    pub fn new(model: &DiodeModel, convergence_limit: f64) -> Self {
        let mut junction = Self {
            saturation_current: 0.0,
            breakdown_voltage: 0.0,
            vscale: 0.0,
            vdcoef: 0.0,
            zoffset: 0.0,
            vcrit: 0.0,
            vzcrit: 0.0,
            convergence_limit,
            last_voltage: 0.0,
            applied: JunctionLinearization::default(),
            pending: JunctionLinearization::default(),
        };
        junction.setup(model);
        junction
    }

    /// Recompute the derived constants without touching iteration history.
    pub fn setup(&mut self, model: &DiodeModel) {
        let is = model.saturation_current;
        self.saturation_current = is;
        self.breakdown_voltage = model.breakdown_voltage;
        self.vscale = model.vscale();
        self.vdcoef = model.vdcoef();
        self.vcrit = critical_voltage(self.vscale, is);
        self.vzcrit = critical_voltage(THERMAL_VOLTAGE, is);
        self.zoffset = if self.breakdown_voltage == 0.0 {
            0.0
        } else {
            // Offset that gives the reference current at the breakdown voltage
            self.breakdown_voltage - (-(1.0 + ZENER_REFERENCE_CURRENT / is)).ln() / VZ_COEF
        };
    }

    pub fn reset(&mut self) {
        self.last_voltage = 0.0;
        self.applied = JunctionLinearization::default();
        self.pending = JunctionLinearization::default();
    }

    pub fn vcrit(&self) -> f64 {
        self.vcrit
    }

    pub fn zoffset(&self) -> f64 {
        self.zoffset
    }

    /// Limit a proposed junction voltage against the previous one.
    pub fn limit_step(&self, vnew: f64, vold: f64) -> (f64, bool) {
        if vnew > self.vcrit {
            return limit_junction_step(vnew, vold, self.vscale, self.vcrit);
        }
        if vnew < 0.0 && self.zoffset != 0.0 {
            // Same rule on the translated Zener curve
            let vnew_t = -vnew - self.zoffset;
            let vold_t = -vold - self.zoffset;
            let (v, limited) = limit_junction_step(vnew_t, vold_t, THERMAL_VOLTAGE, self.vzcrit);
            return (-(v + self.zoffset), limited);
        }
        (vnew, false)
    }

    /// Current of the ideal curve, without gmin.
    pub fn static_current(&self, v: f64) -> f64 {
        let is = self.saturation_current;
        if v >= 0.0 || self.breakdown_voltage == 0.0 {
            is * ((v * self.vdcoef).exp() - 1.0)
        } else {
            is * ((v * self.vdcoef).exp() - ((-v - self.zoffset) * VZ_COEF).exp() - 1.0)
        }
    }

    /// Linearize at a voltage that has already been limited.
    pub(crate) fn linearize(&self, v: f64, gmin: f64) -> JunctionLinearization {
        let is = self.saturation_current;
        let geq = if v >= 0.0 || self.breakdown_voltage == 0.0 {
            self.vdcoef * is * (v * self.vdcoef).exp() + gmin
        } else {
            is * (self.vdcoef * (v * self.vdcoef).exp()
                + VZ_COEF * ((-v - self.zoffset) * VZ_COEF).exp())
                + gmin
        };
        JunctionLinearization {
            geq,
            nc: self.static_current(v) - geq * v,
        }
    }

    /// Mark both junction rows as changing every sub-iteration.
    pub fn stamp(&self, matrix: &mut MnaMatrix, n0: NodeId, n1: NodeId) {
        matrix.stamp_non_linear(n0);
        matrix.stamp_non_linear(n1);
    }

    /// Limit, linearize and stamp the junction for one sub-iteration.
    pub fn do_iteration(
        &mut self,
        matrix: &mut MnaMatrix,
        n0: NodeId,
        n1: NodeId,
        voltage: f64,
        ctx: &mut SolverContext,
    ) {
        check_step(ctx, voltage, self.last_voltage, self.convergence_limit);
        let (voltage, limited) = self.limit_step(voltage, self.last_voltage);
        if limited {
            ctx.converged = false;
        }
        self.last_voltage = voltage;

        let g = gmin(self.saturation_current * 0.01, ctx.sub_iterations, DIODE_GMIN_RAMP);
        let lin = self.linearize(voltage, g);

        matrix.stamp_conductance(n0, n1, lin.geq);
        matrix.stamp_current_source(n0, n1, lin.nc);

        self.applied = self.pending;
        self.pending = lin;
    }

    /// Current anode to cathode of the linearization behind the last solve.
    pub fn current(&self, voltage: f64) -> f64 {
        self.applied.current(voltage)
    }
}

/// A diode component.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pub nodes: [NodeId; 2], // [anode, cathode]
    model: DiodeModel,
    junction: Junction,
    /// Node between the junction and the series resistance
    internal: Option<NodeId>,
    current: f64,
}

impl Diode {
    /// Create a new diode.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], model: DiodeModel) -> Self {
        let junction = Junction::new(&model, DIODE_CONVERGENCE_LIMIT);
        Self {
            name: name.into(),
            nodes,
            model,
            junction,
            internal: None,
            current: 0.0,
        }
    }

    /// Create a diode from a named library model.
    pub fn with_model_name(
        name: impl Into<String>,
        nodes: [NodeId; 2],
        library: &ModelLibrary,
        model: &str,
    ) -> Result<Self> {
        Ok(Self::new(name, nodes, library.get(model)?.clone()))
    }

    pub fn model(&self) -> &DiodeModel {
        &self.model
    }

    /// Replace the model; history is kept.
    pub fn set_model(&mut self, model: DiodeModel) {
        self.junction.setup(&model);
        self.model = model;
    }

    /// Re-resolve the model through a library.
    pub fn set_model_name(&mut self, library: &ModelLibrary, name: &str) -> Result<()> {
        self.set_model(library.get(name)?.clone());
        Ok(())
    }

    /// Node at the cathode end of the junction.
    fn junction_end(&self) -> NodeId {
        self.internal.unwrap_or(self.nodes[1])
    }

    /// Voltage across the junction.
    pub fn junction_voltage(&self, solution: &Solution) -> f64 {
        solution.voltage(self.nodes[0]) - solution.voltage(self.junction_end())
    }
}

impl Device for Diode {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn internal_node_count(&self) -> usize {
        usize::from(self.model.has_series_resistance())
    }

    fn bind(&mut self, internal: &[NodeId], _branches: &[BranchId]) {
        self.internal = internal.first().copied();
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        let end = self.junction_end();
        self.junction.stamp(matrix, self.nodes[0], end);
        if self.internal.is_some() {
            matrix.stamp_resistor(end, self.nodes[1], self.model.series_resistance);
        }
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        let v = self.junction_voltage(solution);
        let end = self.junction_end();
        self.junction.do_iteration(matrix, self.nodes[0], end, v, ctx);
    }

    fn iteration_finished(&mut self, solution: &Solution, ctx: &mut SolverContext) {
        self.current = self.junction.current(self.junction_voltage(solution));
        if self.current.abs() > MAX_JUNCTION_CURRENT {
            ctx.stop("max current exceeded");
        }
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            -self.current
        } else {
            self.current
        }
    }

    fn reset(&mut self) {
        self.junction.reset();
        self.current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spice_default() -> DiodeModel {
        DiodeModel::new("spice-default", 1e-14, 0.0, 1.0, 0.0).unwrap()
    }

    #[test]
    fn test_diode_current() {
        let j = Junction::new(&spice_default(), DIODE_CONVERGENCE_LIMIT);
        // At zero voltage, current should be zero
        assert_relative_eq!(j.static_current(0.0), 0.0);
        // Forward bias should give positive current
        assert!(j.static_current(0.6) > 0.0);
        // Reverse bias should saturate at -Is
        assert_relative_eq!(j.static_current(-1.0), -1e-14, max_relative = 1e-6);
    }

    #[test]
    fn test_static_current_monotonic() {
        let j = Junction::new(&spice_default(), DIODE_CONVERGENCE_LIMIT);
        let mut last = f64::NEG_INFINITY;
        for k in 0..=300 {
            let v = -2.0 + k as f64 * 0.01;
            let i = j.static_current(v);
            assert!(i >= last, "current decreased at {v} V");
            last = i;
        }
    }

    #[test]
    fn test_zener_reference_current() {
        let model = DiodeModel::zener(5.6).unwrap();
        let j = Junction::new(&model, DIODE_CONVERGENCE_LIMIT);
        // The offset puts 5 mA of reverse current at the breakdown voltage
        assert_relative_eq!(j.static_current(-5.6), -0.005, max_relative = 1e-6);
        assert!(j.static_current(-5.5).abs() < 0.005);
        assert!(j.static_current(-5.7).abs() > 0.005);
    }

    #[test]
    fn test_linearization_tangent() {
        let j = Junction::new(&spice_default(), DIODE_CONVERGENCE_LIMIT);
        let v0 = 0.65;
        let lin = j.linearize(v0, 0.0);
        assert_relative_eq!(lin.current(v0), j.static_current(v0), max_relative = 1e-12);
        let h = 1e-7;
        let slope = (j.static_current(v0 + h) - j.static_current(v0 - h)) / (2.0 * h);
        assert_relative_eq!(lin.geq, slope, max_relative = 1e-5);
    }

    #[test]
    fn test_limit_step_clears_convergence() {
        let j = Junction::new(&spice_default(), DIODE_CONVERGENCE_LIMIT);
        let (v, limited) = j.limit_step(5.0, 0.0);
        assert!(limited);
        assert!(v < 1.0);
        let (v, limited) = j.limit_step(0.3, 0.29);
        assert!(!limited);
        assert_eq!(v, 0.3);
    }

    #[test]
    fn test_zener_limit_step_translated() {
        let j = Junction::new(&DiodeModel::zener(5.6).unwrap(), DIODE_CONVERGENCE_LIMIT);
        // A jump deep into breakdown is pulled back toward the knee
        let (v, limited) = j.limit_step(-20.0, 0.0);
        assert!(limited);
        assert!(v > -20.0 && v < -5.0);
    }

    #[test]
    fn test_series_resistance_adds_internal_node() {
        let lib = ModelLibrary::new();
        let d = Diode::with_model_name("D1", [NodeId(1), NodeId(2)], &lib, "1N4148").unwrap();
        assert_eq!(d.internal_node_count(), 1);
        let d = Diode::with_model_name("D2", [NodeId(1), NodeId(2)], &lib, "default").unwrap();
        assert_eq!(d.internal_node_count(), 0);
    }
}
