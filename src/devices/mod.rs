//! Device models for circuit simulation.
//!
//! This module provides models for all supported devices:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source (DC, sine, square), Current Source
//! - Nonlinear: Diode/Zener, Varactor, BJT, MOSFET/JFET, Op-Amp, Optocoupler
//! - Controls: Potentiometer, Switch, Analog Switch
//!
//! Each device implements [`Device`]: it declares its topology, stamps its
//! linear part once per analysis and its linearization every sub-iteration.

mod bjt;
mod controls;
mod diode;
mod diode_model;
pub mod equations;
mod fet;
mod linear;
mod opamp;
mod optocoupler;
mod sources;
mod varactor;

pub use bjt::{Bjt, BjtType};
pub use controls::{AnalogSwitch, Potentiometer, Switch};
pub use diode::{Diode, Junction, DIODE_CONVERGENCE_LIMIT, EMBEDDED_CONVERGENCE_LIMIT};
pub use diode_model::{DiodeModel, ModelLibrary, DEFAULT_MODEL};
pub use fet::{square_law, Channel, ChannelPoint, Fet, FetDefaults, FetKind, FetMode};
pub use linear::{Capacitor, Inductor, Resistor};
pub use opamp::{OpAmp, OpAmpParams};
pub use optocoupler::{transfer_curve, Optocoupler, OPTOCOUPLER_HFE};
pub use sources::{CurrentSource, VoltageSource, Waveform};
pub use varactor::{Varactor, DEFAULT_BASE_CAPACITANCE};

use crate::circuit::{BranchId, NodeId};
use crate::solver::{MnaMatrix, Solution, SolverContext};

/// Behavior shared by every circuit element.
///
/// Call order for one timestep:
/// 1. [`start_iteration`](Self::start_iteration) once.
/// 2. [`do_iteration`](Self::do_iteration) once per sub-iteration, on top of
///    the restored linear system.
/// 3. [`iteration_finished`](Self::iteration_finished) once with the
///    committed solution.
///
/// [`stamp`](Self::stamp) runs once per analysis, before simplification.
/// Rows a device writes during sub-iterations must be marked there with
/// `stamp_non_linear` or `mark_right_changes`.
pub trait Device {
    fn name(&self) -> &str;

    /// Terminal nodes, in the device's pin order.
    fn terminals(&self) -> &[NodeId];

    fn terminal_count(&self) -> usize {
        self.terminals().len()
    }

    /// Nodes the device needs beyond its terminals.
    fn internal_node_count(&self) -> usize {
        0
    }

    /// Branch-current unknowns the device needs.
    fn voltage_source_count(&self) -> usize {
        0
    }

    /// Receive the internal nodes and branches allocated at analysis.
    fn bind(&mut self, _internal: &[NodeId], _branches: &[BranchId]) {}

    /// Stamp the linear part and mark the rows that change per sub-iteration.
    fn stamp(&mut self, matrix: &mut MnaMatrix, ctx: &SolverContext);

    /// Prepare per-timestep state from the previous committed step.
    fn start_iteration(&mut self, _solution: &Solution, _ctx: &SolverContext) {}

    /// Stamp the linearization around the latest solution.
    fn do_iteration(&mut self, _matrix: &mut MnaMatrix, _solution: &Solution, _ctx: &mut SolverContext) {}

    /// Commit state from the converged solution.
    fn iteration_finished(&mut self, _solution: &Solution, _ctx: &mut SolverContext) {}

    /// Current flowing out of the device into the node at `terminal`.
    fn current_into_node(&self, terminal: usize) -> f64;

    /// Current through the device, from terminal 0 towards terminal 1.
    fn current(&self) -> f64 {
        -self.current_into_node(0)
    }

    /// Voltage at a terminal in a solution.
    fn voltage(&self, solution: &Solution, terminal: usize) -> f64 {
        self.terminals()
            .get(terminal)
            .map_or(0.0, |&node| solution.voltage(node))
    }

    /// Zero transient state. Parameters are kept.
    fn reset(&mut self) {}

    fn is_nonlinear(&self) -> bool {
        false
    }

    /// True for an ideal voltage source between its two terminals.
    fn is_voltage_source(&self) -> bool {
        false
    }

    /// Whether current can flow between two terminals.
    fn connects(&self, _a: usize, _b: usize) -> bool {
        true
    }

    /// Whether a terminal is driven against ground internally.
    fn has_ground_connection(&self, _terminal: usize) -> bool {
        false
    }
}

/// A circuit element.
#[derive(Debug, Clone)]
pub enum Element {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    Diode(Diode),
    Varactor(Varactor),
    Bjt(Bjt),
    Fet(Fet),
    OpAmp(OpAmp),
    Potentiometer(Potentiometer),
    Switch(Switch),
    AnalogSwitch(AnalogSwitch),
    Optocoupler(Optocoupler),
}

impl Element {
    pub fn as_device(&self) -> &dyn Device {
        match self {
            Element::Resistor(r) => r,
            Element::Capacitor(c) => c,
            Element::Inductor(l) => l,
            Element::VoltageSource(v) => v,
            Element::CurrentSource(i) => i,
            Element::Diode(d) => d,
            Element::Varactor(d) => d,
            Element::Bjt(q) => q,
            Element::Fet(m) => m,
            Element::OpAmp(o) => o,
            Element::Potentiometer(p) => p,
            Element::Switch(s) => s,
            Element::AnalogSwitch(s) => s,
            Element::Optocoupler(u) => u,
        }
    }

    pub fn as_device_mut(&mut self) -> &mut dyn Device {
        match self {
            Element::Resistor(r) => r,
            Element::Capacitor(c) => c,
            Element::Inductor(l) => l,
            Element::VoltageSource(v) => v,
            Element::CurrentSource(i) => i,
            Element::Diode(d) => d,
            Element::Varactor(d) => d,
            Element::Bjt(q) => q,
            Element::Fet(m) => m,
            Element::OpAmp(o) => o,
            Element::Potentiometer(p) => p,
            Element::Switch(s) => s,
            Element::AnalogSwitch(s) => s,
            Element::Optocoupler(u) => u,
        }
    }

    pub fn name(&self) -> &str {
        self.as_device().name()
    }

    pub fn current_into_node(&self, terminal: usize) -> f64 {
        self.as_device().current_into_node(terminal)
    }

    pub fn current(&self) -> f64 {
        self.as_device().current()
    }

    pub fn voltage(&self, solution: &Solution, terminal: usize) -> f64 {
        self.as_device().voltage(solution, terminal)
    }

    pub fn is_nonlinear(&self) -> bool {
        self.as_device().is_nonlinear()
    }
}

macro_rules! element_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Element {
                fn from(device: $variant) -> Self {
                    Element::$variant(device)
                }
            }
        )*
    };
}

element_from!(
    Resistor,
    Capacitor,
    Inductor,
    VoltageSource,
    CurrentSource,
    Diode,
    Varactor,
    Bjt,
    Fet,
    OpAmp,
    Potentiometer,
    Switch,
    AnalogSwitch,
    Optocoupler,
);
