//! The sweep core: plans, flux storage, flux exchange and the driver.
//!
//! Data flows one way: a [`SweepPlan`] depends only on the partition
//! topology; the [`FluxDataStore`] is laid out from the plan; the
//! [`FluxExchangeBuffer`] is sized from the store; the [`SweepScheduler`]
//! drives all three per direction-group and iteration.

pub mod buffer;
pub mod cell_view;
pub mod direction;
pub mod fluds;
pub mod plan;
pub mod scheduler;
pub mod solver;

pub use buffer::{ExchangeStatus, FluxExchangeBuffer, exchange_cell_views};
pub use cell_view::{CellViewMessage, CompactCellView, CompactFaceView};
pub use direction::{Direction, FaceOrientation};
pub use fluds::{FaceSlot, FluxDataStore, IncomingSlot, LocalFluxBuffer};
pub use plan::{PartitionGraph, SweepPlan, build_plans};
pub use scheduler::{AngleSet, AngleSetState, DirectionGroup, SweepScheduler};
pub use solver::{CellSolveContext, CellSolver, FaceFluxes};
