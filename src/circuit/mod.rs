//! Circuit topology and validation.
//!
//! The [`Circuit`] struct holds all elements and the nodes connecting them.
//! [`Circuit::analyze`] allocates internal nodes and branch currents and
//! checks the topology before the solver builds its matrix.

mod graph;
mod types;
mod validate;

pub use graph::{Circuit, Layout, GROUND_TIE_RESISTANCE};
pub use types::*;
pub use validate::{check_voltage_source_loops, find_floating_nodes};
