//! MeshSweepError: Unified error type for mesh-sweep public APIs
//!
//! Configuration errors (the plan cannot be built) and protocol errors (a
//! neighbor sent something we cannot decode) are reported through this type.
//! Transient conditions such as a send that has not completed yet are never
//! errors; they are handled by the polling design of the exchange buffer.

use crate::sweep::direction::Direction;
use thiserror::Error;

/// Unified error type for mesh-sweep operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshSweepError {
    /// The partition topology handed to us is malformed.
    #[error("Invalid topology on partition {partition}: {reason}")]
    InvalidTopology { partition: usize, reason: String },
    /// Two partitions disagree about the orientation of their shared faces.
    #[error(
        "Inconsistent partition topology for direction {direction}: partition {a} lists {b} as successor but {b} does not list {a} as predecessor"
    )]
    InconsistentPartitionTopology {
        direction: Direction,
        a: usize,
        b: usize,
    },
    /// The local cell graph of one partition contains a cycle.
    #[error(
        "Cyclic local dependency for direction {direction} on partition {partition}: {unresolved} cells could not be ordered"
    )]
    CyclicLocalDependency {
        direction: Direction,
        partition: usize,
        unresolved: usize,
    },
    /// Cycle breaking left a cycle in the partition graph.
    #[error("Unresolvable partition cycle for direction {direction} through partition {partition}")]
    UnresolvableCycle {
        direction: Direction,
        partition: usize,
    },
    /// A message from `neighbor` violated the wire format.
    #[error("Protocol violation from partition {neighbor}: {reason}")]
    Protocol { neighbor: usize, reason: String },
    /// Communication with `neighbor` failed.
    #[error("Communication error with partition {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// A compact cell view cannot be represented on the wire.
    #[error("Invalid compact cell view: {0}")]
    InvalidCellView(String),
    /// An incoming face could not be matched with any upstream face.
    #[error("No upstream face matches face {face} of local cell {cell}")]
    MissingFaceMapping { cell: usize, face: usize },
    /// A configuration value is out of range.
    #[error("Invalid sweep configuration: {0}")]
    InvalidConfig(String),
    /// Message tags for the requested angle sets do not fit the tag space.
    #[error("Tag space exhausted: angle set {angle_set} needs tag {needed}, max is {max}")]
    TagSpaceExhausted {
        angle_set: usize,
        needed: u32,
        max: u32,
    },
    /// An operation was called in a state where it is not allowed.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn comm_error_carries_reason_text() {
        let err = MeshSweepError::CommError {
            neighbor: 3,
            reason: "receive on tag 7 returned no data".into(),
        };
        assert_eq!(
            err.to_string(),
            "Communication error with partition 3: receive on tag 7 returned no data"
        );
        assert!(err.source().is_none());
    }
}
