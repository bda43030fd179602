//! BJT (Bipolar Junction Transistor) model.
//!
//! Uses the transport form of the Ebers-Moll model with a fixed leakage
//! current. The forward gain comes from hfe and the reverse gain is fixed:
//!   Ie = p * Is * (-(1/αF) * (exp(Vbe/Vt) - 1) + (exp(Vbc/Vt) - 1))
//!   Ic = p * Is * ((exp(Vbe/Vt) - 1) - (1/αR) * (exp(Vbc/Vt) - 1))
//!   Ib = -(Ie + Ic)
//!
//! The Newton step stamps the 3x3 Jacobian and solves for the next node
//! voltages directly rather than for a correction.

use crate::circuit::NodeId;
use crate::error::{require_positive, Result};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::equations::{
    check_step, critical_voltage, gmin, limit_junction_step, MAX_JUNCTION_CURRENT,
    THERMAL_VOLTAGE,
};
use super::Device;

/// Junction saturation current (amperes).
pub const LEAKAGE: f64 = 1e-13;

/// Reverse common-base gain αR.
const R_GAIN: f64 = 0.5;
const INV_R_GAIN: f64 = 1.0 / R_GAIN;

/// Junction voltage change that keeps a transistor unconverged.
const BJT_CONVERGENCE_LIMIT: f64 = 0.01;

/// gmin ramp length for transistors (sub-iterations to reach 1 S).
const BJT_GMIN_RAMP: f64 = 300.0;

/// Default forward current gain.
pub const DEFAULT_HFE: f64 = 100.0;

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtType {
    Npn,
    Pnp,
}

impl BjtType {
    /// Polarity factor: +1 for NPN, -1 for PNP.
    pub fn polarity(self) -> f64 {
        match self {
            BjtType::Npn => 1.0,
            BjtType::Pnp => -1.0,
        }
    }
}

/// Terminal currents as affine functions of the junction voltages.
///
/// Each current is the current entering the device at that terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BjtLinearization {
    vbe: f64,
    vbc: f64,
    ie: f64,
    ic: f64,
    gee: f64,
    gec: f64,
    gce: f64,
    gcc: f64,
}

impl BjtLinearization {
    /// (Ib, Ic, Ie) at the given junction voltages.
    fn currents(&self, vbe: f64, vbc: f64) -> (f64, f64, f64) {
        let dbe = vbe - self.vbe;
        let dbc = vbc - self.vbc;
        let ie = self.ie + self.gee * dbe + self.gec * dbc;
        let ic = self.ic + self.gce * dbe + self.gcc * dbc;
        (-(ie + ic), ic, ie)
    }
}

/// A bipolar junction transistor.
#[derive(Debug, Clone)]
pub struct Bjt {
    pub name: String,
    pub nodes: [NodeId; 3], // [base, collector, emitter]
    pub bjt_type: BjtType,
    hfe: f64,
    fgain: f64,
    inv_fgain: f64,
    vcrit: f64,
    last_vbe: f64,
    last_vbc: f64,
    applied: BjtLinearization,
    pending: BjtLinearization,
    ib: f64,
    ic: f64,
    ie: f64,
}

impl Bjt {
    /// Create a transistor with the default gain.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 3], bjt_type: BjtType) -> Self {
        Self::with_fixed_hfe(name, nodes, bjt_type, DEFAULT_HFE)
    }

    /// Create a transistor with a gain known to be positive.
    pub(crate) fn with_fixed_hfe(
        name: impl Into<String>,
        nodes: [NodeId; 3],
        bjt_type: BjtType,
        hfe: f64,
    ) -> Self {
        let mut bjt = Self {
            name: name.into(),
            nodes,
            bjt_type,
            hfe,
            fgain: 0.0,
            inv_fgain: 0.0,
            vcrit: 0.0,
            last_vbe: 0.0,
            last_vbc: 0.0,
            applied: BjtLinearization::default(),
            pending: BjtLinearization::default(),
            ib: 0.0,
            ic: 0.0,
            ie: 0.0,
        };
        bjt.setup();
        bjt
    }

    /// Builder: forward current gain.
    pub fn with_hfe(mut self, hfe: f64) -> Result<Self> {
        self.set_hfe(hfe)?;
        Ok(self)
    }

    /// Change the forward current gain, keeping junction history.
    pub fn set_hfe(&mut self, hfe: f64) -> Result<()> {
        self.hfe = require_positive(&self.name, "hfe", hfe)?;
        self.setup();
        Ok(())
    }

    pub fn hfe(&self) -> f64 {
        self.hfe
    }

    fn setup(&mut self) {
        self.vcrit = critical_voltage(THERMAL_VOLTAGE, LEAKAGE);
        self.fgain = self.hfe / (self.hfe + 1.0);
        self.inv_fgain = 1.0 / self.fgain;
    }

    pub fn base(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn collector(&self) -> NodeId {
        self.nodes[1]
    }

    pub fn emitter(&self) -> NodeId {
        self.nodes[2]
    }

    /// Base current entering the device.
    pub fn ib(&self) -> f64 {
        self.ib
    }

    /// Collector current entering the device.
    pub fn ic(&self) -> f64 {
        self.ic
    }

    /// Emitter current entering the device.
    pub fn ie(&self) -> f64 {
        self.ie
    }

    fn junction_voltages(&self, solution: &Solution) -> (f64, f64) {
        let vb = solution.voltage(self.base());
        let vbe = vb - solution.voltage(self.emitter());
        let vbc = vb - solution.voltage(self.collector());
        (vbe, vbc)
    }

    fn limit_step(&self, vnew: f64, vold: f64) -> (f64, bool) {
        limit_junction_step(vnew, vold, THERMAL_VOLTAGE, self.vcrit)
    }

    /// Linearize at limited junction voltages.
    fn linearize(&self, vbe: f64, vbc: f64, gmin: f64) -> BjtLinearization {
        let p = self.bjt_type.polarity();
        let pcoef = p / THERMAL_VOLTAGE;
        let expbc = (vbc * pcoef).exp();
        let expbe = (vbe * pcoef).exp();

        let ie = p * LEAKAGE * (-self.inv_fgain * (expbe - 1.0) + (expbc - 1.0));
        let ic = p * LEAKAGE * ((expbe - 1.0) - INV_R_GAIN * (expbc - 1.0));

        let gee = -LEAKAGE / THERMAL_VOLTAGE * expbe * self.inv_fgain;
        let gec = LEAKAGE / THERMAL_VOLTAGE * expbc;
        let gce = -gee * self.fgain;
        let gcc = -gec * INV_R_GAIN;

        // Minimum conductance between b,e and b,c
        BjtLinearization {
            vbe,
            vbc,
            ie,
            ic,
            gee: gee - gmin,
            gec,
            gce,
            gcc: gcc - gmin,
        }
    }
}

impl Device for Bjt {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        for node in self.nodes {
            matrix.stamp_non_linear(node);
        }
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        let (vbe, vbc) = self.junction_voltages(solution);
        check_step(ctx, vbc, self.last_vbc, BJT_CONVERGENCE_LIMIT);
        check_step(ctx, vbe, self.last_vbe, BJT_CONVERGENCE_LIMIT);

        let g = gmin(LEAKAGE * 0.01, ctx.sub_iterations, BJT_GMIN_RAMP);

        let p = self.bjt_type.polarity();
        let (vbc_l, limited_bc) = self.limit_step(p * vbc, p * self.last_vbc);
        let (vbe_l, limited_be) = self.limit_step(p * vbe, p * self.last_vbe);
        if limited_bc || limited_be {
            ctx.converged = false;
        }
        let vbc = p * vbc_l;
        let vbe = p * vbe_l;
        self.last_vbc = vbc;
        self.last_vbe = vbe;

        let lin = self.linearize(vbe, vbc, g);
        let BjtLinearization {
            ie,
            ic,
            gee,
            gec,
            gce,
            gcc,
            ..
        } = lin;
        let ib = -(ie + ic);
        let [b, c, e] = self.nodes;

        matrix.stamp_matrix(b, b, -(gee + gec + gce + gcc));
        matrix.stamp_matrix(c, b, gce + gcc);
        matrix.stamp_matrix(e, b, gee + gec);

        matrix.stamp_matrix(b, c, gec + gcc);
        matrix.stamp_matrix(c, c, -gcc);
        matrix.stamp_matrix(e, c, -gec);

        matrix.stamp_matrix(b, e, gee + gce);
        matrix.stamp_matrix(c, e, -gce);
        matrix.stamp_matrix(e, e, -gee);

        // Solving for v(k+1), so the right side carries J * v(k)
        matrix.stamp_right_side(b, -ib - (gec + gcc) * vbc - (gee + gce) * vbe);
        matrix.stamp_right_side(c, -ic + gce * vbe + gcc * vbc);
        matrix.stamp_right_side(e, -ie + gee * vbe + gec * vbc);

        self.applied = self.pending;
        self.pending = lin;
    }

    fn iteration_finished(&mut self, solution: &Solution, ctx: &mut SolverContext) {
        let (vbe, vbc) = self.junction_voltages(solution);
        let (ib, ic, ie) = self.applied.currents(vbe, vbc);
        self.ib = ib;
        self.ic = ic;
        self.ie = ie;
        if ic.abs() > MAX_JUNCTION_CURRENT {
            ctx.stop("Ic exceeded max current");
        }
        if ib.abs() > MAX_JUNCTION_CURRENT {
            ctx.stop("Ib exceeded max current");
        }
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        match terminal {
            0 => -self.ib,
            1 => -self.ic,
            _ => -self.ie,
        }
    }

    /// Collector current.
    fn current(&self) -> f64 {
        self.ic
    }

    fn reset(&mut self) {
        self.last_vbe = 0.0;
        self.last_vbc = 0.0;
        self.applied = BjtLinearization::default();
        self.pending = BjtLinearization::default();
        self.ib = 0.0;
        self.ic = 0.0;
        self.ie = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn npn() -> Bjt {
        Bjt::new("Q1", [NodeId(1), NodeId(2), NodeId(3)], BjtType::Npn)
    }

    #[test]
    fn test_forward_active_gain() {
        let q = npn();
        let lin = q.linearize(0.65, -5.0, 0.0);
        let ib = -(lin.ie + lin.ic);
        assert!(lin.ic > 0.0);
        assert_relative_eq!(lin.ic / ib, q.hfe(), max_relative = 1e-6);
    }

    #[test]
    fn test_pnp_mirrors_npn() {
        let n = npn();
        let p = Bjt::new("Q2", [NodeId(1), NodeId(2), NodeId(3)], BjtType::Pnp);
        let ln = n.linearize(0.6, -3.0, 0.0);
        let lp = p.linearize(-0.6, 3.0, 0.0);
        assert_relative_eq!(lp.ic, -ln.ic, max_relative = 1e-12);
        assert_relative_eq!(lp.ie, -ln.ie, max_relative = 1e-12);
        assert_relative_eq!(lp.gee, ln.gee, max_relative = 1e-12);
    }

    #[test]
    fn test_conductances_are_derivatives() {
        let q = npn();
        let (vbe, vbc) = (0.6, -2.0);
        let lin = q.linearize(vbe, vbc, 0.0);
        let h = 1e-7;
        let up = q.linearize(vbe + h, vbc, 0.0);
        let down = q.linearize(vbe - h, vbc, 0.0);
        assert_relative_eq!(lin.gee, (up.ie - down.ie) / (2.0 * h), max_relative = 1e-5);
        assert_relative_eq!(lin.gce, (up.ic - down.ic) / (2.0 * h), max_relative = 1e-5);
    }

    #[test]
    fn test_linearized_currents_at_operating_point() {
        let q = npn();
        let lin = q.linearize(0.6, -1.0, 0.0);
        let (ib, ic, ie) = lin.currents(0.6, -1.0);
        assert_relative_eq!(ic, lin.ic);
        assert_relative_eq!(ie, lin.ie);
        assert_relative_eq!(ib + ic + ie, 0.0, epsilon = 1e-18);
    }

    #[test]
    fn test_set_hfe_validates() {
        let mut q = npn();
        assert!(q.set_hfe(-1.0).is_err());
        q.set_hfe(250.0).unwrap();
        assert_relative_eq!(q.fgain, 250.0 / 251.0);
    }
}
