//! Error types for the acceleration-structure core.
//!
//! Only caller-facing, recoverable failures live here. Broken preconditions
//! (out-of-range ids, building a scene over an unbuilt mesh, mismatched
//! array lengths) panic instead: a corrupted acceleration structure has no
//! recovery path.

use thiserror::Error;

/// Errors reported by configuration, validation, GPU packing and batch
/// dispatch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccelError {
    /// Build settings are out of range.
    #[error("invalid BVH settings: {0}")]
    InvalidConfig(String),

    /// A structural invariant of a built tree does not hold.
    #[error("BVH invariant broken at node {node}: {reason}")]
    BrokenInvariant {
        /// Index of the offending node.
        node: usize,
        /// What was violated.
        reason: String,
    },

    /// Packed data exceeds a fixed GPU buffer limit.
    #[error("too many {what}: {count} (max {max})")]
    CapacityExceeded {
        /// Which buffer overflowed.
        what: &'static str,
        /// Requested element count.
        count: usize,
        /// Limit.
        max: usize,
    },

    /// One or more work chunks failed; every other chunk still ran.
    #[error("{failed} of {total} work chunks failed; first failure: {first}")]
    WorkFailed {
        /// Number of failed chunks.
        failed: usize,
        /// Number of chunks dispatched.
        total: usize,
        /// Message of the lowest-indexed failing chunk.
        first: String,
    },
}

/// Result type for acceleration-structure operations.
pub type Result<T> = std::result::Result<T, AccelError>;
