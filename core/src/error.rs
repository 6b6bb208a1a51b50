//! Error type shared by the library.
//!
//! Phase values outside `[0, 1]` are not errors: they are clamped where they are used and logged.
//! Malformed fields inside a trace are read as zero and logged; only a trace without a single
//! data record is reported as [BipError::MalformedLog].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BipError {
    /// Fewer demonstrations than ensemble members. Fatal to initialization.
    #[error("insufficient demonstrations: {required} required, {available} available")]
    InsufficientDemonstrations { required: usize, available: usize },
    /// A trace could not be used at all (for example it holds no data records).
    #[error("malformed trace log: {0}")]
    MalformedLog(String),
    /// The innovation covariance could not be inverted. The correction for the tick is skipped.
    #[error("innovation covariance is singular")]
    SingularCovariance,
    /// No demonstration yielded a usable (non-zero ball) sample at the queried phase.
    #[error("no demonstration produced a valid sample at phase {phase}")]
    NoValidSamples { phase: f64 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
