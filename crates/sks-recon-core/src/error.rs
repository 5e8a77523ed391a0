//! Error types for the core algebra.

use thiserror::Error;

/// Errors from field, polynomial and interpolation operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Degree difference exceeds the number of available samples.
    #[error("interpolation failed: degree difference exceeds sample count")]
    Interpolate,

    /// The sets differ by more than the samples can resolve.
    #[error("low MBar: sample count too small to reconcile these sets")]
    LowMBar,

    /// Polynomial exponentiation with an exponent shorter than 3 bits.
    #[error("exponent too small for polynomial powmod")]
    PowModSmallN,

    /// Gaussian reduction on a matrix with fewer columns than rows.
    #[error("matrix is too narrow to reduce")]
    MatrixTooNarrow,

    /// Divisor degree exceeds a nonzero dividend's degree.
    #[error("divisor degree {divisor} exceeds dividend degree {dividend}")]
    DivisionDegree { dividend: usize, divisor: usize },

    /// Division by a zero field element or the zero polynomial.
    #[error("division by zero")]
    ZeroDivisor,

    /// Factorization produced a non-linear factor.
    #[error("invalid factor: {0}")]
    InvalidFactor(String),

    /// Digest could not be converted to a field element.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

impl From<hex::FromHexError> for CoreError {
    fn from(e: hex::FromHexError) -> Self {
        CoreError::InvalidDigest(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
