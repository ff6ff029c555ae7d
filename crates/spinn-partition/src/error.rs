//! Error types for partitioning operations

use thiserror::Error;

/// Result type alias for partitioning operations
pub type Result<T> = std::result::Result<T, PartitionError>;

/// Errors that can occur while costing and splitting a population
#[derive(Debug, Error)]
pub enum PartitionError {
    /// A constraint this splitter cannot honour is attached to a vertex
    #[error("Vertex {vertex} carries unsupported constraint {constraint}; only max-atoms-per-core and fixed-atoms-per-core are supported")]
    UnsupportedConstraint {
        /// Label of the offending vertex
        vertex: String,
        /// Description of the constraint
        constraint: String,
    },

    /// Supported constraints that contradict each other
    #[error("Vertex {vertex} has conflicting constraints: {reason}")]
    ConflictingConstraints {
        /// Label of the offending vertex
        vertex: String,
        /// What conflicts
        reason: String,
    },

    /// No slice size lets a core hold the population
    #[error("Vertex {vertex}: a slice of {atoms} atoms does not fit on a core: {reason}")]
    SliceDoesNotFit {
        /// Label of the vertex
        vertex: String,
        /// Atoms in the rejected slice
        atoms: u32,
        /// Which resource overflowed
        reason: String,
    },

    /// Slice bounds do not describe a non-empty range
    #[error("Invalid atom slice [{lo}, {hi})")]
    InvalidSlice {
        /// First atom
        lo: u32,
        /// One past the last atom
        hi: u32,
    },

    /// Population without atoms
    #[error("Vertex {vertex} has no atoms to partition")]
    EmptyPopulation {
        /// Label of the vertex
        vertex: String,
    },
}

impl PartitionError {
    /// Create an unsupported constraint error
    pub fn unsupported_constraint(vertex: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::UnsupportedConstraint {
            vertex: vertex.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a conflicting constraints error
    pub fn conflicting_constraints(vertex: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConflictingConstraints {
            vertex: vertex.into(),
            reason: reason.into(),
        }
    }

    /// Create a slice-does-not-fit error
    pub fn slice_does_not_fit(vertex: impl Into<String>, atoms: u32, reason: impl Into<String>) -> Self {
        Self::SliceDoesNotFit {
            vertex: vertex.into(),
            atoms,
            reason: reason.into(),
        }
    }
}
