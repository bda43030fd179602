//! Voltage and current sources.

use std::f64::consts::TAU;

use crate::circuit::{BranchId, NodeId};
use crate::error::{require_finite, require_positive, Result, SimError};
use crate::solver::{MnaMatrix, Solution, SolverContext};

use super::Device;

/// Time dependence of a voltage source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Constant value, stamped once at analysis
    Dc,
    /// `bias + amplitude * sin(2*pi*f*t + phase)`
    Sine { frequency: f64, phase: f64 },
    /// `bias +/- amplitude`, high for the first `duty_cycle` of each period
    Square { frequency: f64, duty_cycle: f64 },
}

impl Waveform {
    fn validate(&self, element: &str) -> Result<()> {
        match *self {
            Waveform::Dc => Ok(()),
            Waveform::Sine { frequency, phase } => {
                require_positive(element, "frequency", frequency)?;
                require_finite(element, "phase", phase)?;
                Ok(())
            }
            Waveform::Square {
                frequency,
                duty_cycle,
            } => {
                require_positive(element, "frequency", frequency)?;
                if !(0.0..=1.0).contains(&duty_cycle) {
                    return Err(SimError::invalid_parameter(
                        element,
                        "duty_cycle",
                        format!("must be within 0..=1, got {duty_cycle}"),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A voltage source component.
///
/// Voltage sources require an extra row/column in the MNA matrix for the
/// branch current. The source enforces: V+ - V- = V_source
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    waveform: Waveform,
    amplitude: f64,
    bias: f64,
    branch: BranchId,
    current: f64,
}

impl VoltageSource {
    /// Create a DC source.
    pub fn dc(name: impl Into<String>, nodes: [NodeId; 2], voltage: f64) -> Result<Self> {
        Self::new(name, nodes, Waveform::Dc, voltage)
    }

    /// Create a sine source with zero bias and phase.
    pub fn sine(
        name: impl Into<String>,
        nodes: [NodeId; 2],
        amplitude: f64,
        frequency: f64,
    ) -> Result<Self> {
        Self::new(
            name,
            nodes,
            Waveform::Sine {
                frequency,
                phase: 0.0,
            },
            amplitude,
        )
    }

    /// Create a 50% duty square source swinging between +/- amplitude.
    pub fn square(
        name: impl Into<String>,
        nodes: [NodeId; 2],
        amplitude: f64,
        frequency: f64,
    ) -> Result<Self> {
        Self::new(
            name,
            nodes,
            Waveform::Square {
                frequency,
                duty_cycle: 0.5,
            },
            amplitude,
        )
    }

    /// Create a source with an arbitrary waveform.
    pub fn new(
        name: impl Into<String>,
        nodes: [NodeId; 2],
        waveform: Waveform,
        amplitude: f64,
    ) -> Result<Self> {
        let name = name.into();
        waveform.validate(&name)?;
        let amplitude = require_finite(&name, "amplitude", amplitude)?;
        Ok(Self {
            name,
            nodes,
            waveform,
            amplitude,
            bias: 0.0,
            branch: BranchId(0),
            current: 0.0,
        })
    }

    /// Builder: DC offset added to the waveform.
    pub fn with_bias(mut self, bias: f64) -> Result<Self> {
        self.bias = require_finite(&self.name, "bias", bias)?;
        Ok(self)
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Set the amplitude (the value of a DC source).
    pub fn set_amplitude(&mut self, amplitude: f64) -> Result<()> {
        self.amplitude = require_finite(&self.name, "amplitude", amplitude)?;
        Ok(())
    }

    pub fn set_waveform(&mut self, waveform: Waveform) -> Result<()> {
        waveform.validate(&self.name)?;
        self.waveform = waveform;
        Ok(())
    }

    /// Get the source voltage at time `t`.
    pub fn voltage_at(&self, t: f64) -> f64 {
        match self.waveform {
            Waveform::Dc => self.amplitude + self.bias,
            Waveform::Sine { frequency, phase } => {
                self.bias + self.amplitude * (TAU * frequency * t + phase).sin()
            }
            Waveform::Square {
                frequency,
                duty_cycle,
            } => {
                let cycle = (TAU * frequency * t).rem_euclid(TAU);
                if cycle > TAU * duty_cycle {
                    self.bias - self.amplitude
                } else {
                    self.bias + self.amplitude
                }
            }
        }
    }

    /// Get the positive node.
    pub fn positive(&self) -> NodeId {
        self.nodes[0]
    }

    /// Get the negative node.
    pub fn negative(&self) -> NodeId {
        self.nodes[1]
    }
}

impl Device for VoltageSource {
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
        match self.waveform {
            Waveform::Dc => matrix.stamp_voltage_source(
                self.negative(),
                self.positive(),
                self.branch,
                self.voltage_at(0.0),
            ),
            _ => matrix.stamp_dynamic_voltage_source(self.negative(), self.positive(), self.branch),
        }
    }

    fn do_iteration(&mut self, matrix: &mut MnaMatrix, _solution: &Solution, ctx: &mut SolverContext) {
        if self.waveform != Waveform::Dc {
            matrix.update_voltage_source(self.branch, self.voltage_at(ctx.time));
        }
    }

    fn iteration_finished(&mut self, solution: &Solution, _ctx: &mut SolverContext) {
        self.current = solution.branch_current(self.branch);
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            self.current
        } else {
            -self.current
        }
    }

    /// Current delivered from the positive terminal.
    fn current(&self) -> f64 {
        self.current
    }

    fn reset(&mut self) {
        self.current = 0.0;
    }

    fn is_voltage_source(&self) -> bool {
        true
    }
}

/// A current source component.
///
/// Current sources add directly to the RHS vector of the MNA equations.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub nodes: [NodeId; 2], // current flows from nodes[0] through the source into nodes[1]
    current: f64,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(name: impl Into<String>, nodes: [NodeId; 2], current: f64) -> Result<Self> {
        let name = name.into();
        let current = require_finite(&name, "current", current)?;
        Ok(Self {
            name,
            nodes,
            current,
        })
    }

    /// Set the source value. Takes effect at the next analysis.
    pub fn set_current(&mut self, current: f64) -> Result<()> {
        self.current = require_finite(&self.name, "current", current)?;
        Ok(())
    }
}

impl Device for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[NodeId] {
        &self.nodes
    }

    fn stamp(&mut self, matrix: &mut MnaMatrix, _ctx: &SolverContext) {
        matrix.stamp_current_source(self.nodes[0], self.nodes[1], self.current);
    }

    fn current_into_node(&self, terminal: usize) -> f64 {
        if terminal == 0 {
            -self.current
        } else {
            self.current
        }
    }

    // An ideal current source does not conduct
    fn connects(&self, _a: usize, _b: usize) -> bool {
        false
    }
}
