//! MOSFET and JFET square-law model.
//!
//! Regions (voltages normalized by channel polarity):
//!   Off         Vgs < Vt:          Ids = Vds * 1e-8
//!   Linear      Vds < Vgs - Vt:    Ids = β((Vgs - Vt)Vds - Vds²/2)
//!   Saturation  otherwise:         Ids = β/2 (Vgs - Vt)² + (Vds - (Vgs - Vt)) * 1e-8
//!
//! Source and drain swap roles whenever the drain sits below the source, so
//! the equations only ever see Vds >= 0. MOSFETs carry optional body diodes
//! from the body to source and drain; JFETs carry a gate junction instead.

use crate::circuit::NodeId;
use crate::error::{require_finite, require_positive, Result};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::diode::{Junction, EMBEDDED_CONVERGENCE_LIMIT};
use super::diode_model::DiodeModel;
use super::Device;

/// Largest terminal move accepted in one sub-iteration (volts).
pub const STEP_CLAMP: f64 = 0.5;

/// Voltage change below which a terminal counts as converged.
pub const CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Drain-source conductance used where the ideal model has none (siemens).
const MIN_GDS: f64 = 1e-8;

/// |Vds| above which the run is stopped (volts).
const MAX_VDS: f64 = 1e4;

/// |Ids| above which the run is stopped (amperes).
const MAX_IDS: f64 = 1e3;

const GATE: usize = 0;
const SOURCE: usize = 1;
const DRAIN: usize = 2;

/// Field-effect transistor construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetKind {
    Mosfet,
    Jfet,
}

/// Channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    N,
    P,
}

impl Channel {
    /// Polarity factor: +1 for N-channel, -1 for P-channel.
    pub fn polarity(self) -> f64 {
        match self {
            Channel::N => 1.0,
            Channel::P => -1.0,
        }
    }
}

/// Operating region of the last evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetMode {
    #[default]
    Off,
    Linear,
    Saturation,
}

/// Threshold and gain used for newly created transistors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetDefaults {
    /// Threshold voltage Vt (volts, N-channel sense)
    pub threshold: f64,
    /// Transconductance parameter β (A/V²)
    pub beta: f64,
}

impl FetDefaults {
    /// Enhancement MOSFET: Vt = 1.5 V, β = 0.02.
    pub fn mosfet() -> Self {
        Self {
            threshold: 1.5,
            beta: 0.02,
        }
    }

    /// Depletion JFET: Vt = -4 V, β = 0.00125.
    pub fn jfet() -> Self {
        Self {
            threshold: -4.0,
            beta: 0.00125,
        }
    }

    /// Defaults for a construction kind.
    pub fn for_kind(kind: FetKind) -> Self {
        match kind {
            FetKind::Mosfet => Self::mosfet(),
            FetKind::Jfet => Self::jfet(),
        }
    }
}

/// Channel current at a polarity-normalized operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelPoint {
    pub ids: f64,
    pub gm: f64,
    pub gds: f64,
    pub mode: FetMode,
}

/// Evaluate the square-law equations.
pub fn square_law(vgs: f64, vds: f64, threshold: f64, beta: f64) -> ChannelPoint {
    if vgs < threshold {
        // Zero current would leave a singular matrix, so the channel is 100 MΩ
        ChannelPoint {
            ids: vds * MIN_GDS,
            gm: 0.0,
            gds: MIN_GDS,
            mode: FetMode::Off,
        }
    } else if vds < vgs - threshold {
        ChannelPoint {
            ids: beta * ((vgs - threshold) * vds - vds * vds * 0.5),
            gm: beta * vds,
            gds: beta * (vgs - vds - threshold),
            mode: FetMode::Linear,
        }
    } else {
        let vov = vgs - threshold;
        ChannelPoint {
            ids: 0.5 * beta * vov * vov + (vds - vov) * MIN_GDS,
            gm: beta * vov,
            gds: MIN_GDS,
            mode: FetMode::Saturation,
        }
    }
}

/// Channel current leaving the swapped drain, affine in the real voltages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FetLinearization {
    swapped: bool,
    current: f64,
    vgs: f64,
    vds: f64,
    gm: f64,
    gds: f64,
}

/// A MOSFET or JFET.
#[derive(Debug, Clone)]
pub struct Fet {
    pub name: String,
    pub nodes: [NodeId; 3], // [gate, source, drain]
    pub kind: FetKind,
    pub channel: Channel,
    threshold: f64,
    beta: f64,
    body_diodes: bool,
    /// Body to source junction
    diode_b1: Junction,
    /// Body to drain junction
    diode_b2: Junction,
    /// Gate to channel junction (JFET only)
    gate_diode: Junction,
    last_v: [f64; 3],
    applied: FetLinearization,
    pending: FetLinearization,
    ids: f64,
    gm: f64,
    mode: FetMode,
    diode_current1: f64,
    diode_current2: f64,
    gate_current: f64,
}

impl Fet {
    /// Create a transistor using the given defaults.
    pub fn new(
        name: impl Into<String>,
        nodes: [NodeId; 3],
        kind: FetKind,
        channel: Channel,
        defaults: &FetDefaults,
    ) -> Self {
        let model = DiodeModel::default_model();
        let junction = Junction::new(&model, EMBEDDED_CONVERGENCE_LIMIT);
        Self {
            name: name.into(),
            nodes,
            kind,
            channel,
            threshold: defaults.threshold,
            beta: defaults.beta,
            body_diodes: kind == FetKind::Mosfet,
            diode_b1: junction.clone(),
            diode_b2: junction.clone(),
            gate_diode: junction,
            last_v: [0.0; 3],
            applied: FetLinearization::default(),
            pending: FetLinearization::default(),
            ids: 0.0,
            gm: 0.0,
            mode: FetMode::Off,
            diode_current1: 0.0,
            diode_current2: 0.0,
            gate_current: 0.0,
        }
    }

    /// Create a MOSFET with the standard defaults.
    pub fn mosfet(name: impl Into<String>, nodes: [NodeId; 3], channel: Channel) -> Self {
        Self::new(name, nodes, FetKind::Mosfet, channel, &FetDefaults::mosfet())
    }

    /// Create a JFET with the standard defaults.
    pub fn jfet(name: impl Into<String>, nodes: [NodeId; 3], channel: Channel) -> Self {
        Self::new(name, nodes, FetKind::Jfet, channel, &FetDefaults::jfet())
    }

    /// Builder: enable or disable MOSFET body diodes. JFETs never have them.
    pub fn with_body_diodes(mut self, enabled: bool) -> Self {
        self.body_diodes = enabled && self.kind == FetKind::Mosfet;
        self
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<()> {
        self.threshold = require_finite(&self.name, "threshold", threshold)?;
        Ok(())
    }

    pub fn set_beta(&mut self, beta: f64) -> Result<()> {
        self.beta = require_positive(&self.name, "beta", beta)?;
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn has_body_diodes(&self) -> bool {
        self.body_diodes
    }

    /// Channel current drain to source in the N-channel sense.
    pub fn ids(&self) -> f64 {
        self.ids
    }

    pub fn gm(&self) -> f64 {
        self.gm
    }

    pub fn mode(&self) -> FetMode {
        self.mode
    }

    /// Current into the device through the body, zero without body diodes.
    pub fn body_current(&self) -> f64 {
        match self.body_terminal() {
            SOURCE => -self.diode_current1,
            _ => self.diode_current2,
        }
    }

    /// Terminal the body is tied to: source for N-channel, drain for P-channel.
    fn body_terminal(&self) -> usize {
        match self.channel {
            Channel::N => SOURCE,
            Channel::P => DRAIN,
        }
    }

    fn terminal_voltages(&self, solution: &Solution) -> [f64; 3] {
        self.nodes.map(|n| solution.voltage(n))
    }

    /// Terminals the body junctions run between, as (anode, cathode).
    fn body_diode_nodes(&self) -> [(NodeId, NodeId); 2] {
        let body = self.nodes[self.body_terminal()];
        let (s, d) = (self.nodes[SOURCE], self.nodes[DRAIN]);
        match self.channel {
            // Conducts when the body is above source or drain
            Channel::N => [(body, s), (body, d)],
            // Conducts when source or drain is above the body
            Channel::P => [(s, body), (d, body)],
        }
    }

    fn gate_diode_nodes(&self) -> (NodeId, NodeId) {
        let (g, s) = (self.nodes[GATE], self.nodes[SOURCE]);
        match self.channel {
            Channel::N => (g, s),
            Channel::P => (s, g),
        }
    }

    fn non_convergence(&self, last: f64, now: f64, sub_iterations: usize) -> bool {
        let mut diff = (last - now).abs();
        // High-beta parts are sensitive to small differences
        if self.beta > 1.0 {
            diff *= 100.0;
        }
        if diff < CONVERGENCE_THRESHOLD {
            return false;
        }
        if sub_iterations > 10 && diff < now.abs() * 0.001 {
            return false;
        }
        if sub_iterations > 100 && diff < 0.01 + (sub_iterations - 100) as f64 * 0.0001 {
            return false;
        }
        true
    }

    /// Channel current leaving the physical drain under the applied linearization.
    fn linear_drain_current(&self, v: &[f64; 3]) -> f64 {
        let lin = &self.applied;
        let (src, drn) = if lin.swapped { (DRAIN, SOURCE) } else { (SOURCE, DRAIN) };
        let vgs = v[GATE] - v[src];
        let vds = v[drn] - v[src];
        let current = lin.current + lin.gds * (vds - lin.vds) + lin.gm * (vgs - lin.vgs);
        if lin.swapped {
            -current
        } else {
            current
        }
    }
}

impl Device for Fet {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_non_linear(self.nodes[SOURCE]);
        matrix.stamp_non_linear(self.nodes[DRAIN]);
        if self.body_diodes {
            let [(a1, c1), (a2, c2)] = self.body_diode_nodes();
            self.diode_b1.stamp(matrix, a1, c1);
            self.diode_b2.stamp(matrix, a2, c2);
        }
        if self.kind == FetKind::Jfet {
            let (a, c) = self.gate_diode_nodes();
            self.gate_diode.stamp(matrix, a, c);
        }
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, solution: &Solution, ctx: &mut SolverContext) {
        let p = self.channel.polarity();
        let raw = self.terminal_voltages(solution);

        let mut vs = raw;
        for t in [GATE, SOURCE, DRAIN] {
            vs[t] = vs[t].clamp(self.last_v[t] - STEP_CLAMP, self.last_v[t] + STEP_CLAMP);
        }

        let (src, drn) = if p * vs[SOURCE] > p * vs[DRAIN] {
            (DRAIN, SOURCE)
        } else {
            (SOURCE, DRAIN)
        };

        let sub = ctx.sub_iterations;
        if self.non_convergence(self.last_v[SOURCE], vs[SOURCE], sub)
            || self.non_convergence(self.last_v[DRAIN], vs[DRAIN], sub)
            || self.non_convergence(self.last_v[GATE], vs[GATE], sub)
        {
            ctx.converged = false;
        }
        self.last_v = vs;

        let real_vgs = vs[GATE] - vs[src];
        let real_vds = vs[drn] - vs[src];
        let point = square_law(p * real_vgs, p * real_vds, self.threshold, self.beta);
        let ChannelPoint { ids, gm, gds, .. } = point;

        let rs = -p * ids + gds * real_vds + gm * real_vgs;
        let (g, s, d) = (self.nodes[GATE], self.nodes[src], self.nodes[drn]);
        matrix.stamp_matrix(d, d, gds);
        matrix.stamp_matrix(d, s, -gds - gm);
        matrix.stamp_matrix(d, g, gm);
        matrix.stamp_matrix(s, d, -gds);
        matrix.stamp_matrix(s, s, gds + gm);
        matrix.stamp_matrix(s, g, -gm);
        matrix.stamp_right_side(d, rs);
        matrix.stamp_right_side(s, -rs);

        if self.body_diodes {
            let body = raw[self.body_terminal()];
            let [(a1, c1), (a2, c2)] = self.body_diode_nodes();
            self.diode_b1
                .do_iteration(matrix, a1, c1, p * (body - raw[SOURCE]), ctx);
            self.diode_b2
                .do_iteration(matrix, a2, c2, p * (body - raw[DRAIN]), ctx);
        }
        if self.kind == FetKind::Jfet {
            let (a, c) = self.gate_diode_nodes();
            self.gate_diode
                .do_iteration(matrix, a, c, p * (raw[GATE] - raw[SOURCE]), ctx);
        }

        self.applied = self.pending;
        self.pending = FetLinearization {
            swapped: src == DRAIN,
            current: p * ids,
            vgs: real_vgs,
            vds: real_vds,
            gm,
            gds,
        };
    }

    fn iteration_finished(&mut self, solution: &Solution, ctx: &mut SolverContext) {
        let p = self.channel.polarity();
        let raw = self.terminal_voltages(solution);

        self.ids = self.linear_drain_current(&raw);

        let (src, drn) = if p * raw[SOURCE] > p * raw[DRAIN] {
            (DRAIN, SOURCE)
        } else {
            (SOURCE, DRAIN)
        };
        let point = square_law(
            p * (raw[GATE] - raw[src]),
            p * (raw[drn] - raw[src]),
            self.threshold,
            self.beta,
        );
        self.gm = point.gm;
        self.mode = point.mode;

        if self.body_diodes {
            let body = raw[self.body_terminal()];
            self.diode_current1 = p * self.diode_b1.current(p * (body - raw[SOURCE]));
            self.diode_current2 = p * self.diode_b2.current(p * (body - raw[DRAIN]));
            // One junction is shorted by the body tie
            if self.body_terminal() == SOURCE {
                self.diode_current1 = -self.diode_current2;
            } else {
                self.diode_current2 = -self.diode_current1;
            }
        } else {
            self.diode_current1 = 0.0;
            self.diode_current2 = 0.0;
        }

        if self.kind == FetKind::Jfet {
            self.gate_current = self.gate_diode.current(p * (raw[GATE] - raw[SOURCE]));
        }

        self.last_v = raw;

        if (raw[DRAIN] - raw[SOURCE]).abs() > MAX_VDS {
            ctx.stop("Vds exceeded max voltage");
        }
        if self.ids.abs() > MAX_IDS {
            ctx.stop("Ids exceeded max current");
        }
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        let p = self.channel.polarity();
        match terminal {
            GATE => -p * self.gate_current,
            SOURCE => self.ids + self.diode_current1 + p * self.gate_current,
            _ => -self.ids + self.diode_current2,
        }
    }

    fn current(&self) -> f64 {
        self.ids
    }

    fn reset(&mut self) {
        self.last_v = [0.0; 3];
        self.diode_b1.reset();
        self.diode_b2.reset();
        self.gate_diode.reset();
        self.applied = FetLinearization::default();
        self.pending = FetLinearization::default();
        self.ids = 0.0;
        self.gm = 0.0;
        self.mode = FetMode::Off;
        self.diode_current1 = 0.0;
        self.diode_current2 = 0.0;
        self.gate_current = 0.0;
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    fn connects(&self, a: usize, b: usize) -> bool {
        a != GATE && b != GATE
    }
}
