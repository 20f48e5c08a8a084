//! Partition topology consumed by the sweep: cells, faces, neighbors.

pub mod cell_type;
pub mod meshgen;
pub mod partition;
pub mod point;

pub use cell_type::CellShape;
pub use partition::{Cell, Face, FaceNeighbor, PartitionTopology};
pub use point::GlobalCellId;
