//! Matrix assembly and the timestep driver.
//!
//! The unknown vector holds every non-ground node voltage followed by one
//! current per voltage-source branch:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   0 ] [ j ] = [ e ]
//! ```
//!
//! `G` collects conductances between nodes, `B`/`C` tie each branch current
//! to its two nodes and `e` holds the source voltages.
//!
//! [`MnaMatrix`] records a [`RowInfo`] per unknown. After the linear stamps
//! are in, rows that pin an unknown to a constant are folded into the right
//! side and dropped, and the reduced system is saved. [`NewtonRaphson`]
//! restores that snapshot every sub-iteration before nonlinear devices stamp
//! their linearization on top. [`Simulator`] owns the loop over timesteps.

mod context;
mod matrix;
mod newton;
mod row_info;
mod simulator;
mod solution;

pub use context::{SolverContext, StopInfo};
pub use matrix::MnaMatrix;
pub use newton::{NewtonRaphson, DEFAULT_MAX_SUB_ITERATIONS};
pub use row_info::RowInfo;
pub use simulator::{Simulator, SolverConfig, StepReport, DEFAULT_TIMESTEP};
pub use solution::Solution;
