//! # MNA Core
//!
//! The numerical core of a transient circuit simulator.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) matrix stamping with constant-row elimination
//! - Newton-Raphson iteration for nonlinear devices, with step limiting and gmin stepping
//! - Device models: diode/Zener, varactor, BJT, MOSFET/JFET, op-amp, analog switch,
//!   optocoupler, and the linear parts (R, C, L, sources, switches, potentiometer)
//! - A timestep driver that commits one solved step at a time
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`circuit`] - Element list, node allocation and topology checks
//! - [`devices`] - Device models and the [`devices::Device`] trait
//! - [`solver`] - MNA matrix assembly, Newton-Raphson and the timestep driver
//! - [`error`] - The [`SimError`] type
//!
//! ## Usage
//!
//! ```no_run
//! use mna_core::circuit::NodeId;
//! use mna_core::devices::{Diode, DiodeModel, Resistor, VoltageSource};
//! use mna_core::{Circuit, Simulator};
//!
//! let mut circuit = Circuit::new();
//! let a = circuit.add_node("a");
//! let k = circuit.add_node("k");
//! circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0)?);
//! circuit.add(Resistor::new("R1", [a, k], 1e3)?);
//! circuit.add(Diode::new("D1", [k, NodeId::GROUND], DiodeModel::default_model()));
//!
//! let mut sim = Simulator::new(circuit)?;
//! sim.step()?;
//! println!("V(k) = {}", sim.node_voltage(k));
//! # Ok::<(), mna_core::SimError>(())
//! ```
//!
//! ## Circuit Simulation Method
//!
//! For each timestep:
//!
//! 1. Every element prepares its companion values from the previous step
//! 2. The linear system saved at analysis is restored
//! 3. Nonlinear elements stamp their linearization and the system is solved
//! 4. Steps 2-3 repeat until no element reports non-convergence
//! 5. Elements commit state from the converged solution and time advances
//!
//! Reactive elements (C, L) are discretized using the trapezoidal rule.

pub mod circuit;
pub mod devices;
pub mod error;
pub mod solver;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{Result, SimError};
pub use solver::{Simulator, SolverConfig};
