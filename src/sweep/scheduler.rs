//! Sweep driver: angle sets and the cooperative scheduler that runs them.
//!
//! Each [`AngleSet`] is a direction-group bound to its plan, flux store and
//! exchange buffer. Per iteration it walks
//!
//! ```text
//! NotStarted -> ReceivingBoundaryData (polled) -> Sweeping -> SendingBoundaryData -> Done
//! ```
//!
//! [`SweepScheduler::execute_sweep`] advances all angle sets round-robin so
//! that a set waiting on a neighbor never stalls the others. A set in
//! `SendingBoundaryData` keeps being advanced: it posts its queued messages
//! as earlier ones complete and collects the delayed data it will read next
//! iteration. It is `Done` once both are through.

use crate::algs::communicator::Communicator;
use crate::algs::wire::SweepCommTags;
use crate::config::SweepConfig;
use crate::mesh_error::MeshSweepError;
use crate::sweep::buffer::{ExchangeStatus, FluxExchangeBuffer, exchange_cell_views};
use crate::sweep::direction::Direction;
use crate::sweep::fluds::{FluxDataStore, LocalFluxBuffer};
use crate::sweep::plan::{SweepPlan, build_plans};
use crate::sweep::solver::{CellSolveContext, CellSolver};
use crate::topology::partition::PartitionTopology;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AngleSetState {
    NotStarted,
    ReceivingBoundaryData,
    Sweeping,
    SendingBoundaryData,
    Done,
}

/// Angles swept together with one plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionGroup {
    /// Representative direction; the plan is built for it.
    pub direction: Direction,
    /// Caller ids of the angles in the group, handed to the solver.
    pub angles: Vec<usize>,
}

pub struct AngleSet<C: Communicator> {
    id: usize,
    angles: Vec<usize>,
    num_groups: usize,
    plan: SweepPlan,
    fluds: FluxDataStore,
    buffer: FluxExchangeBuffer<C>,
    state: AngleSetState,
}

impl<C> AngleSet<C>
where
    C: Communicator + Clone,
{
    /// Exchange cell views with the plan's neighbors and lay out the flux
    /// store and the message buffers. Collective over those neighbors.
    pub fn new(
        id: usize,
        angles: Vec<usize>,
        plan: SweepPlan,
        topology: &PartitionTopology,
        comm: &C,
        config: &SweepConfig,
    ) -> Result<Self, MeshSweepError> {
        if angles.is_empty() {
            return Err(MeshSweepError::InvalidConfig(format!("angle set {id} has no angles")));
        }
        let tags = SweepCommTags::for_angle_set(config.base_tag, id)?;
        let outgoing = FluxDataStore::outgoing_cell_views(topology, &plan);
        let (upstream, delayed_upstream) = exchange_cell_views(comm, &tags, &plan, outgoing)?;
        let stride = config.num_groups * angles.len();
        let fluds = FluxDataStore::new(topology, &plan, stride, &upstream, &delayed_upstream)?;
        let buffer = FluxExchangeBuffer::new(comm.clone(), tags, &plan, &fluds, config)?;
        log::debug!(
            "angle set {id} on partition {}: {} angles, tags {:?}, {} message slots max",
            plan.partition(),
            angles.len(),
            tags,
            buffer.max_num_messages()
        );
        Ok(Self {
            id,
            angles,
            num_groups: config.num_groups,
            plan,
            fluds,
            buffer,
            state: AngleSetState::NotStarted,
        })
    }
}

impl<C> AngleSet<C>
where
    C: Communicator,
{
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn angles(&self) -> &[usize] {
        &self.angles
    }

    pub fn state(&self) -> AngleSetState {
        self.state
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    pub fn fluds(&self) -> &FluxDataStore {
        &self.fluds
    }

    pub fn buffer(&self) -> &FluxExchangeBuffer<C> {
        &self.buffer
    }

    fn set_state(&mut self, next: AngleSetState) {
        log::trace!(
            "angle set {} on partition {}: {:?} -> {:?}",
            self.id,
            self.plan.partition(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Take one scheduling step. Never blocks.
    pub fn advance<S>(
        &mut self,
        topology: &PartitionTopology,
        solver: &mut S,
        phi: &mut LocalFluxBuffer,
    ) -> Result<AngleSetState, MeshSweepError>
    where
        S: CellSolver + ?Sized,
    {
        match self.state {
            AngleSetState::NotStarted => self.set_state(AngleSetState::ReceivingBoundaryData),
            AngleSetState::ReceivingBoundaryData => {
                if self.buffer.receive_upstream_psi(&mut self.fluds)? == ExchangeStatus::Ready {
                    self.set_state(AngleSetState::Sweeping);
                }
            }
            AngleSetState::Sweeping => {
                self.sweep_cells(topology, solver, phi)?;
                self.buffer.send_downstream_psi(&self.fluds);
                self.fluds.clear_local_and_receive_psi();
                self.set_state(AngleSetState::SendingBoundaryData);
            }
            AngleSetState::SendingBoundaryData => {
                let sent = self.buffer.clear_downstream_buffers(&mut self.fluds);
                let delayed = self.buffer.receive_delayed_psi(&mut self.fluds)?;
                if sent && delayed == ExchangeStatus::Ready {
                    self.set_state(AngleSetState::Done);
                }
            }
            AngleSetState::Done => {}
        }
        Ok(self.state)
    }

    fn sweep_cells<S>(
        &mut self,
        topology: &PartitionTopology,
        solver: &mut S,
        phi: &mut LocalFluxBuffer,
    ) -> Result<(), MeshSweepError>
    where
        S: CellSolver + ?Sized,
    {
        self.fluds.allocate_local_psi();
        self.fluds.allocate_outgoing_psi();
        let direction = self.plan.direction();
        for &c in self.plan.order() {
            let incoming = self.fluds.gather_incoming(c)?;
            let mut outgoing = self.fluds.outgoing_scratch(c);
            let ctx = CellSolveContext {
                cell: topology.cell(c),
                local_id: c,
                angle_set: self.id,
                angles: &self.angles,
                direction,
                num_groups: self.num_groups,
            };
            solver.solve_cell(&ctx, &incoming, &mut outgoing, phi.cell_mut(c));
            self.fluds.scatter_outgoing(c, &outgoing)?;
        }
        Ok(())
    }

    /// Back to `NotStarted`; the plan and the layouts stay.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.set_state(AngleSetState::NotStarted);
    }
}

/// Runs all angle sets of one partition.
pub struct SweepScheduler<C: Communicator> {
    topology: Arc<PartitionTopology>,
    angle_sets: Vec<AngleSet<C>>,
}

impl<C> SweepScheduler<C>
where
    C: Communicator + Clone,
{
    /// Build one plan per group (a single partition-graph exchange for all of
    /// them) and set up the angle sets. Collective over `comm`.
    pub fn new(
        topology: Arc<PartitionTopology>,
        groups: &[DirectionGroup],
        comm: &C,
        config: &SweepConfig,
    ) -> Result<Self, MeshSweepError> {
        config.validate()?;
        let directions: Vec<Direction> = groups.iter().map(|g| g.direction).collect();
        let plans = build_plans(
            &topology,
            &directions,
            comm,
            SweepCommTags::plan_tag(config.base_tag),
        )?;
        let angle_sets = groups
            .iter()
            .zip(plans)
            .enumerate()
            .map(|(id, (group, plan))| {
                AngleSet::new(id, group.angles.clone(), plan, &topology, comm, config)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "partition {}: sweep scheduler ready with {} angle sets",
            topology.partition(),
            angle_sets.len()
        );
        Ok(Self {
            topology,
            angle_sets,
        })
    }
}

impl<C> SweepScheduler<C>
where
    C: Communicator,
{
    pub fn topology(&self) -> &PartitionTopology {
        &self.topology
    }

    pub fn angle_sets(&self) -> &[AngleSet<C>] {
        &self.angle_sets
    }

    /// One full sweep of every angle set. `phi` is zeroed first and holds
    /// the accumulated scalar flux on return.
    pub fn execute_sweep<S>(
        &mut self,
        solver: &mut S,
        phi: &mut LocalFluxBuffer,
    ) -> Result<(), MeshSweepError>
    where
        S: CellSolver + ?Sized,
    {
        if phi.num_cells() != self.topology.num_cells() {
            return Err(MeshSweepError::InvalidState(
                "scalar flux buffer does not match the topology",
            ));
        }
        if self
            .angle_sets
            .iter()
            .any(|a| a.state() != AngleSetState::NotStarted)
        {
            self.reset();
        }
        phi.zero();

        // Round-robin until every set is done; a pass that moves no state
        // forward yields to the other partitions' threads.
        loop {
            let mut all_done = true;
            let mut progressed = false;
            for set in &mut self.angle_sets {
                let before = set.state();
                if before == AngleSetState::Done {
                    continue;
                }
                let after = set.advance(&self.topology, solver, phi)?;
                progressed |= after != before;
                all_done &= after == AngleSetState::Done;
            }
            if all_done {
                return Ok(());
            }
            if !progressed {
                std::thread::yield_now();
            }
        }
    }

    /// Prepare every angle set for the next iteration.
    pub fn reset(&mut self) {
        for set in &mut self.angle_sets {
            set.reset();
        }
    }
}
