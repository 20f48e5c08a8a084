#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-sweep
//!
//! mesh-sweep is the parallel core of a discrete-ordinates transport sweep.
//! For every direction it visits each cell of a partitioned mesh once, in
//! upwind-to-downwind order, and moves boundary angular flux between
//! partitions with non-blocking, flow-controlled messages.
//!
//! ## Features
//! - Per-direction sweep plans: local cell order, partition predecessors and
//!   successors, and deterministic cycle breaking through *delayed* edges
//! - Flux data store mapping every face to its slot in the local, staging and
//!   receive buffers
//! - Chunked, backpressured flux exchange with a bit-exact integer wire
//!   format for compact cell views
//! - Cooperative scheduler over many angle sets per partition
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//! Add `mesh-sweep` as a dependency in your `Cargo.toml` and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! mesh-sweep = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! A partition hands its [`PartitionTopology`](topology::PartitionTopology)
//! and direction-groups to [`SweepScheduler::new`](sweep::SweepScheduler::new),
//! then calls [`execute_sweep`](sweep::SweepScheduler::execute_sweep) once
//! per source iteration with its [`CellSolver`](sweep::CellSolver).
//!
//! ## Determinism
//!
//! Every partition computes the delayed edges from the same gathered data
//! with the same ordered search, so neighbors agree on them without further
//! messages. Local cell order breaks ties by global cell id.

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod mesh_error;
pub mod sweep;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm, Wait};
    pub use crate::config::SweepConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh_error::MeshSweepError;
    pub use crate::sweep::{
        AngleSetState, CellSolveContext, CellSolver, Direction, DirectionGroup, FaceFluxes,
        LocalFluxBuffer, SweepPlan, SweepScheduler, build_plans,
    };
    pub use crate::topology::{Cell, CellShape, Face, FaceNeighbor, GlobalCellId, PartitionTopology};
}
