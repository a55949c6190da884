//! Error types shared by every stage of the solver.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type SolverResult<T> = Result<T, SolverError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    /// Two operands had incompatible shapes.
    #[error("dimension mismatch in {op}: {left:?} vs {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// No time sample lies past the steady-state threshold.
    #[error(
        "empty steady-state window: no samples with t * gamma > {threshold} \
        (last sample at t * gamma = {last:.3})"
    )]
    EmptySteadyStateWindow { threshold: f64, last: f64 },

    /// A field array was neither 1D nor 2D with three columns.
    #[error("invalid field array shape {0:?}: expected 1D or 2D with 3 columns")]
    InvalidFieldArrayShape(Vec<usize>),

    /// A sweep was requested without anything to sweep over.
    #[error("misconfigured sweep: {0}")]
    MisconfiguredSweep(String),

    /// The master equation integration diverged or lost its normalization.
    #[error("integration failure at t = {time:e}: {reason}")]
    IntegrationFailure { time: f64, reason: String },

    /// An averaged population retained a non-negligible imaginary part.
    #[error("population rho[{index},{index}] has imaginary part {imag:e}")]
    NonRealPopulation { index: usize, imag: f64 },

    #[error("solve cancelled")]
    Cancelled,

    #[error("solve timed out")]
    TimedOut,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("error parsing configuration: {0}")]
    ConfigParse(String),

    #[error("could not start worker pool: {0}")]
    WorkerPool(String),
}

impl From<toml::de::Error> for SolverError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
