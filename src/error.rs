//! Error types for Random Walker segmentation.

use thiserror::Error;

/// Result type alias for segmentation operations.
pub type RwResult<T> = Result<T, RandomWalkerError>;

/// Errors that can occur while setting up, solving or extracting a Random Walker solution.
///
/// Setup errors (`NoSeeds`, `Allocation`, `InvalidVolume`, `DimensionMismatch`,
/// `InvalidParams`) are recoverable by the caller. `InvalidState`, `RowCapacityExceeded`
/// and `SingularDiagonal` indicate a broken calling contract or a malformed system
/// and should be treated as bugs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RandomWalkerError {
    /// Neither foreground nor background seeds are present.
    #[error("no seed points")]
    NoSeeds,

    /// A buffer could not be allocated.
    #[error("failed to allocate {what} ({len} elements): bad allocation")]
    Allocation { what: &'static str, len: usize },

    /// The volume is missing, empty or otherwise unusable.
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// Two volumes that must agree in size do not.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// An operation was invoked in the wrong solver state.
    #[error("{operation} requires solver state {expected}, but state is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// Seed value range collapsed to a single value, probabilities cannot be normalized.
    #[error("degenerate seed range [{min}, {max}]")]
    DegenerateSeedRange { min: f32, max: f32 },

    /// A sparse matrix row ran out of slots.
    #[error("row {row} exceeds its capacity of {capacity} non-zero entries")]
    RowCapacityExceeded { row: usize, capacity: usize },

    /// A zero or negative diagonal entry was found while building the Jacobi preconditioner.
    #[error("malformed system: diagonal entry {value} at row {row}")]
    SingularDiagonal { row: usize, value: f32 },

    /// Parameters failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl RandomWalkerError {
    /// Create an allocation error.
    #[must_use]
    pub const fn allocation(what: &'static str, len: usize) -> Self {
        Self::Allocation { what, len }
    }

    /// Create an invalid volume error.
    #[must_use]
    pub fn invalid_volume(details: impl Into<String>) -> Self {
        Self::InvalidVolume(details.into())
    }

    /// Create an invalid params error.
    #[must_use]
    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::InvalidParams(details.into())
    }

    /// True for errors the caller can recover from by changing its input.
    #[must_use]
    pub const fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::NoSeeds
                | Self::Allocation { .. }
                | Self::InvalidVolume(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidParams(_)
        )
    }
}

/// Allocate a vector of `len` copies of `value`, reporting failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(what: &'static str, len: usize, value: T) -> RwResult<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| RandomWalkerError::allocation(what, len))?;
    buf.resize(len, value);
    Ok(buf)
}

/// Copy `src` into a new vector, reporting failure instead of aborting.
pub(crate) fn try_copied<T: Clone>(what: &'static str, src: &[T]) -> RwResult<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(src.len())
        .map_err(|_| RandomWalkerError::allocation(what, src.len()))?;
    buf.extend_from_slice(src);
    Ok(buf)
}
