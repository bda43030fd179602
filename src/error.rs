//! Error types for the MNA core.
//!
//! This module provides a unified error type [`SimError`] that covers
//! circuit construction, analysis, parameter mutation and the per-step
//! failures reported by the timestep driver.

use thiserror::Error;

use crate::circuit::ElementId;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Parameter Errors ============
    /// Invalid parameter value, rejected at the mutation boundary
    #[error("Invalid parameter '{param}' for element '{element}': {message}")]
    InvalidParameter {
        element: String,
        param: String,
        message: String,
    },

    /// Diode model name not present in the model library
    #[error("Unknown diode model '{name}'")]
    UnknownModel { name: String },

    // ============ Topology Errors ============
    /// Element index out of range
    #[error("Element {element} not found in circuit")]
    UnknownElement { element: ElementId },

    /// Loop made only of voltage-source branches
    #[error("Voltage source loop with no resistance closed by '{name}' ({element})")]
    VoltageSourceLoop { element: ElementId, name: String },

    /// Circuit has no elements
    #[error("Circuit has no elements")]
    EmptyCircuit,

    /// A step was requested before the circuit was analyzed
    #[error("Circuit has not been analyzed")]
    NotAnalyzed,

    /// The simulation was halted by an earlier fatal stop and must be reset
    #[error("Simulation is stopped; reset before stepping again")]
    Halted,

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix - circuit may have a floating node or a source loop")]
    SingularMatrix,

    /// A stamped matrix entry is NaN or infinite
    #[error("Matrix entry ({row}, {col}) is not finite")]
    MatrixNotFinite { row: usize, col: usize },

    /// A solved unknown is NaN or infinite
    #[error("Solution entry {index} is not finite")]
    SolutionNotFinite { index: usize },

    /// Newton-Raphson sub-iterations exhausted without convergence
    #[error("Newton-Raphson did not converge after {sub_iterations} sub-iterations")]
    IterationLimit { sub_iterations: usize },

    /// A device detected a runaway numeric state
    #[error("Simulation stopped by '{name}': {message}")]
    Stopped {
        element: Option<ElementId>,
        name: String,
        message: String,
    },
}

impl SimError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        element: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            element: element.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an unknown model error
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// True for errors raised by a failing timestep, which halt the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix
                | Self::MatrixNotFinite { .. }
                | Self::SolutionNotFinite { .. }
                | Self::IterationLimit { .. }
                | Self::Stopped { .. }
        )
    }
}

/// Reject a value that is not strictly positive and finite.
pub(crate) fn require_positive(element: &str, param: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimError::invalid_parameter(
            element,
            param,
            format!("must be positive and finite, got {value}"),
        ))
    }
}

/// Reject a value that is not finite.
pub(crate) fn require_finite(element: &str, param: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SimError::invalid_parameter(
            element,
            param,
            format!("must be finite, got {value}"),
        ))
    }
}
