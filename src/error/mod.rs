use thiserror::Error;

/// Errors produced by the score-based modelling core.
///
/// Everything here is raised while building schedules, SDEs, solvers or while
/// reading configuration. Evaluating a validly constructed SDE never fails.
#[derive(Error, Debug)]
pub enum SgmError {
    /// Inconsistent or out-of-range construction parameters
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// The requested SDE family does not exist
    #[error("SDE '{0}' is not implemented")]
    UnknownSde(String),

    /// The requested solver does not exist
    #[error("Solver '{0}' is not implemented")]
    UnknownSolver(String),

    /// The schedule reaches a region where the marginal collapses or the coefficients diverge
    #[error("Numerical instability: {reason}")]
    NumericalInstability { reason: String },

    /// A state or score vector does not have the expected length
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Error in the shape of a sample array: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SgmError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        SgmError::Configuration {
            reason: reason.into(),
        }
    }
}
