//! Communication, wire encoding and graph algorithms used by the sweep.

pub mod communicator;
pub mod exchange;
pub mod graph;
pub mod wire;

pub use communicator::{Communicator, NoComm, RayonComm, Wait};
pub use graph::DiGraph;
pub use wire::{CommTag, SweepCommTags};
