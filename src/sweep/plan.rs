//! Sweep plan: local visitation order plus the partition-level dependency
//! graph for one direction.
//!
//! Building a plan has three steps:
//!
//! 1. [`LocalSweepGraph::compute`] classifies every face of this partition by
//!    the sign of `omega . n`. Faces between local cells become edges of the
//!    cell graph; faces towards other partitions make those partitions
//!    predecessors (incoming) or successors (outgoing).
//! 2. The per-partition summaries ([`PartitionEdges`]) are gathered on every
//!    partition and assembled into a [`PartitionGraph`]. Its back edges,
//!    found by a depth-first search that visits partitions and successors in
//!    ascending order, are the *delayed* edges. Every partition runs the same
//!    search on the same data, so both ends of an edge agree on whether it is
//!    delayed.
//! 3. [`SweepPlan::assemble`] orders the local cells topologically, smallest
//!    global id first among ready cells, and splits the neighbor lists into
//!    ordinary and delayed.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::all_gather_ints;
use crate::algs::graph::DiGraph;
use crate::algs::wire::CommTag;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::mesh_error::MeshSweepError;
use crate::sweep::direction::{Direction, FaceOrientation};
use crate::topology::partition::{FaceNeighbor, PartitionTopology};
use itertools::Itertools;
use std::collections::{BTreeSet, HashSet};

/// Partition-level dependencies of one partition for one direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionEdges {
    pub partition: usize,
    /// Partitions this one receives flux from, ascending.
    pub predecessors: Vec<usize>,
    /// Partitions this one sends flux to, ascending.
    pub successors: Vec<usize>,
}

impl PartitionEdges {
    fn encode(&self, out: &mut Vec<i64>) {
        out.push(self.predecessors.len() as i64);
        out.extend(self.predecessors.iter().map(|&p| p as i64));
        out.push(self.successors.len() as i64);
        out.extend(self.successors.iter().map(|&p| p as i64));
    }

    fn decode(
        ints: &[i64],
        pos: &mut usize,
        partition: usize,
        num_partitions: usize,
    ) -> Result<Self, MeshSweepError> {
        let predecessors = read_list(ints, pos, partition, num_partitions)?;
        let successors = read_list(ints, pos, partition, num_partitions)?;
        Ok(Self {
            partition,
            predecessors,
            successors,
        })
    }
}

fn read_list(
    ints: &[i64],
    pos: &mut usize,
    neighbor: usize,
    num_partitions: usize,
) -> Result<Vec<usize>, MeshSweepError> {
    let protocol = |reason: String| MeshSweepError::Protocol { neighbor, reason };
    let n = *ints
        .get(*pos)
        .ok_or_else(|| protocol(format!("list length missing at entry {}", *pos)))?;
    let n = usize::try_from(n).map_err(|_| protocol(format!("negative list length {n}")))?;
    let start = *pos + 1;
    let end = start
        .checked_add(n)
        .filter(|&e| e <= ints.len())
        .ok_or_else(|| {
            protocol(format!(
                "list of {n} entries at {start} overruns message of {}",
                ints.len()
            ))
        })?;
    let list = ints[start..end]
        .iter()
        .map(|&p| {
            usize::try_from(p)
                .ok()
                .filter(|&p| p < num_partitions)
                .ok_or_else(|| protocol(format!("partition id {p} out of range")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    *pos = end;
    Ok(list)
}

/// Cell-level graph of one partition for one direction.
#[derive(Clone, Debug)]
pub struct LocalSweepGraph {
    direction: Direction,
    cell_graph: DiGraph,
    edges: PartitionEdges,
}

impl LocalSweepGraph {
    /// Classify every face of `topology` against `direction`.
    pub fn compute(
        topology: &PartitionTopology,
        direction: Direction,
    ) -> Result<Self, MeshSweepError> {
        if direction.is_zero() {
            return Err(MeshSweepError::InvalidConfig(
                "sweep direction must be non-zero".into(),
            ));
        }
        let mut cell_graph = DiGraph::new(topology.num_cells());
        let mut preds = BTreeSet::new();
        let mut succs = BTreeSet::new();

        for (c, cell) in topology.cells().iter().enumerate() {
            for face in &cell.faces {
                let orientation = FaceOrientation::classify(&direction, &face.normal);
                match (face.neighbor, orientation) {
                    (_, FaceOrientation::Parallel) | (FaceNeighbor::Boundary, _) => {}
                    (FaceNeighbor::Local(n), FaceOrientation::Outgoing) => {
                        cell_graph.add_edge(c, n);
                    }
                    (FaceNeighbor::Local(n), FaceOrientation::Incoming) => {
                        cell_graph.add_edge(n, c);
                    }
                    (FaceNeighbor::Remote { partition, .. }, FaceOrientation::Outgoing) => {
                        succs.insert(partition);
                    }
                    (FaceNeighbor::Remote { partition, .. }, FaceOrientation::Incoming) => {
                        preds.insert(partition);
                    }
                }
            }
        }

        Ok(Self {
            direction,
            cell_graph,
            edges: PartitionEdges {
                partition: topology.partition(),
                predecessors: preds.into_iter().collect(),
                successors: succs.into_iter().collect(),
            },
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn cell_graph(&self) -> &DiGraph {
        &self.cell_graph
    }

    pub fn edges(&self) -> &PartitionEdges {
        &self.edges
    }
}

/// Global partition dependency graph for one direction, with cycles broken.
#[derive(Clone, Debug)]
pub struct PartitionGraph {
    direction: Direction,
    graph: DiGraph,
    delayed: BTreeSet<(usize, usize)>,
    levels: Vec<Vec<usize>>,
}

impl PartitionGraph {
    /// Assemble from the summaries of all partitions, indexed by partition.
    ///
    /// # Errors
    /// - [`MeshSweepError::InconsistentPartitionTopology`] if `a` lists `b`
    ///   as a successor without `b` listing `a` as a predecessor (or vice
    ///   versa).
    /// - [`MeshSweepError::UnresolvableCycle`] if a cycle survives removal
    ///   of the back edges.
    pub fn from_edges(
        direction: Direction,
        all: &[PartitionEdges],
    ) -> Result<Self, MeshSweepError> {
        let n = all.len();
        for (i, e) in all.iter().enumerate() {
            if e.partition != i {
                return Err(MeshSweepError::InvalidTopology {
                    partition: i,
                    reason: format!("summary at index {i} belongs to partition {}", e.partition),
                });
            }
        }
        let pred_sets: Vec<HashSet<usize>> = all
            .iter()
            .map(|e| e.predecessors.iter().copied().collect())
            .collect();

        let mut graph = DiGraph::new(n);
        for (a, e) in all.iter().enumerate() {
            for &b in &e.successors {
                if b >= n || !pred_sets[b].contains(&a) {
                    return Err(MeshSweepError::InconsistentPartitionTopology { direction, a, b });
                }
                graph.add_edge(a, b);
            }
        }
        for (a, e) in all.iter().enumerate() {
            for &p in &e.predecessors {
                if p >= n || !graph.has_edge(p, a) {
                    return Err(MeshSweepError::InconsistentPartitionTopology {
                        direction,
                        a: p,
                        b: a,
                    });
                }
            }
        }

        let delayed: BTreeSet<(usize, usize)> = graph.back_edges().into_iter().collect();
        let mut residual = graph.clone();
        for &(u, v) in &delayed {
            residual.remove_edge(u, v);
        }
        let levels = residual
            .levels()
            .ok_or_else(|| MeshSweepError::UnresolvableCycle {
                direction,
                partition: residual.first_on_cycle().unwrap_or(0),
            })?;

        if !delayed.is_empty() {
            log::info!(
                "direction {direction}: {} partition edge(s) delayed to break cycles: {}",
                delayed.len(),
                delayed.iter().map(|(u, v)| format!("{u}->{v}")).join(", ")
            );
        }

        Ok(Self {
            direction,
            graph,
            delayed,
            levels,
        })
    }

    /// Gather every partition's summary over `comm` and assemble.
    pub fn gather<C>(
        comm: &C,
        tag: CommTag,
        direction: Direction,
        local: &PartitionEdges,
    ) -> Result<Self, MeshSweepError>
    where
        C: Communicator,
    {
        let mut ints = Vec::new();
        local.encode(&mut ints);
        let gathered = all_gather_ints(comm, tag, &ints)?;
        let size = gathered.len();
        let all = gathered
            .iter()
            .enumerate()
            .map(|(rank, ints)| {
                let mut pos = 0;
                let e = PartitionEdges::decode(ints, &mut pos, rank, size)?;
                expect_consumed(ints, pos, rank)?;
                Ok(e)
            })
            .collect::<Result<Vec<_>, MeshSweepError>>()?;
        Self::from_edges(direction, &all)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn num_partitions(&self) -> usize {
        self.graph.num_nodes()
    }

    /// Full graph, delayed edges included.
    pub fn graph(&self) -> &DiGraph {
        &self.graph
    }

    pub fn is_delayed(&self, from: usize, to: usize) -> bool {
        self.delayed.contains(&(from, to))
    }

    pub fn delayed_edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.delayed.iter().copied()
    }

    /// Graph without delayed edges.
    pub fn residual(&self) -> DiGraph {
        let mut g = self.graph.clone();
        for &(u, v) in &self.delayed {
            g.remove_edge(u, v);
        }
        g
    }

    /// Sweep levels of the residual graph.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }
}

fn expect_consumed(ints: &[i64], pos: usize, neighbor: usize) -> Result<(), MeshSweepError> {
    if pos == ints.len() {
        Ok(())
    } else {
        Err(MeshSweepError::Protocol {
            neighbor,
            reason: format!("{} trailing entries in dependency message", ints.len() - pos),
        })
    }
}

/// Everything one partition needs to sweep one direction.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepPlan {
    direction: Direction,
    partition: usize,
    num_partitions: usize,
    order: Vec<usize>,
    position: Vec<usize>,
    cell_graph: DiGraph,
    location_dependencies: Vec<usize>,
    location_successors: Vec<usize>,
    delayed_location_dependencies: Vec<usize>,
    delayed_location_successors: Vec<usize>,
    delayed_edges: Vec<(usize, usize)>,
    levels: Vec<Vec<usize>>,
}

impl SweepPlan {
    /// Build the plan for `direction`. Collective: every partition of
    /// `comm` must call this with the same direction and tag.
    pub fn build<C>(
        topology: &PartitionTopology,
        direction: Direction,
        comm: &C,
        tag: CommTag,
    ) -> Result<Self, MeshSweepError>
    where
        C: Communicator,
    {
        let local = LocalSweepGraph::compute(topology, direction)?;
        let graph = PartitionGraph::gather(comm, tag, direction, local.edges())?;
        Self::assemble(topology, local, &graph)
    }

    /// Combine the local cell graph with the global partition graph.
    ///
    /// # Errors
    /// [`MeshSweepError::CyclicLocalDependency`] if the local cells cannot be
    /// ordered: a cycle inside one partition has no partition edge to delay.
    pub fn assemble(
        topology: &PartitionTopology,
        local: LocalSweepGraph,
        graph: &PartitionGraph,
    ) -> Result<Self, MeshSweepError> {
        let direction = local.direction;
        let me = topology.partition();
        if graph.num_partitions() != topology.num_partitions() {
            return Err(MeshSweepError::InvalidTopology {
                partition: me,
                reason: format!(
                    "partition graph has {} partitions, topology expects {}",
                    graph.num_partitions(),
                    topology.num_partitions()
                ),
            });
        }

        let order = local
            .cell_graph
            .topological_order_by_key(|c| topology.cell(c).global_id)
            .map_err(|unresolved| MeshSweepError::CyclicLocalDependency {
                direction,
                partition: me,
                unresolved,
            })?;
        let mut position = vec![0; order.len()];
        for (k, &c) in order.iter().enumerate() {
            position[c] = k;
        }

        let (delayed_location_dependencies, location_dependencies): (Vec<usize>, Vec<usize>) =
            local
                .edges
                .predecessors
                .iter()
                .partition(|&&p| graph.is_delayed(p, me));
        let location_successors = local.edges.successors.clone();
        let delayed_location_successors: Vec<usize> = location_successors
            .iter()
            .copied()
            .filter(|&s| graph.is_delayed(me, s))
            .collect();

        let plan = Self {
            direction,
            partition: me,
            num_partitions: topology.num_partitions(),
            order,
            position,
            cell_graph: local.cell_graph,
            location_dependencies,
            location_successors,
            delayed_location_dependencies,
            delayed_location_successors,
            delayed_edges: graph.delayed_edges().collect(),
            levels: graph.levels().to_vec(),
        };
        log::debug!(
            "plan {direction} on partition {me}: {} cells, deps {:?}, delayed deps {:?}, succs {:?}, delayed succs {:?}",
            plan.order.len(),
            plan.location_dependencies,
            plan.delayed_location_dependencies,
            plan.location_successors,
            plan.delayed_location_successors
        );
        crate::debug_invariants!(plan.validate_invariants(), "sweep plan");
        Ok(plan)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Local cells in visitation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Position of a local cell in [`order`](Self::order).
    pub fn position_of(&self, cell: usize) -> usize {
        self.position[cell]
    }

    /// Local "solve before" relation.
    pub fn cell_graph(&self) -> &DiGraph {
        &self.cell_graph
    }

    /// Ordinary predecessor partitions: their flux arrives this iteration.
    pub fn location_dependencies(&self) -> &[usize] {
        &self.location_dependencies
    }

    /// All successor partitions, delayed ones included.
    pub fn location_successors(&self) -> &[usize] {
        &self.location_successors
    }

    /// Predecessors behind a delayed edge: their flux is from the previous
    /// iteration.
    pub fn delayed_location_dependencies(&self) -> &[usize] {
        &self.delayed_location_dependencies
    }

    /// Successors reached over a delayed edge.
    pub fn delayed_location_successors(&self) -> &[usize] {
        &self.delayed_location_successors
    }

    pub fn is_delayed_successor(&self, partition: usize) -> bool {
        self.delayed_location_successors.contains(&partition)
    }

    /// Global delayed edges `(from, to)`, identical on every partition.
    pub fn delayed_edges(&self) -> &[(usize, usize)] {
        &self.delayed_edges
    }

    /// Global partition sweep levels (residual graph).
    pub fn global_levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Level of this partition in [`global_levels`](Self::global_levels).
    pub fn level(&self) -> Option<usize> {
        self.levels.iter().position(|l| l.contains(&self.partition))
    }
}

impl DebugInvariants for SweepPlan {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SweepPlan");
    }

    fn validate_invariants(&self) -> Result<(), MeshSweepError> {
        let n = self.order.len();
        ensure(self.position.len() == n, "plan position table has wrong length")?;
        for (k, &c) in self.order.iter().enumerate() {
            ensure(c < n && self.position[c] == k, "plan order is not a permutation")?;
        }
        for (u, v) in self.cell_graph.edges() {
            ensure(
                self.position[u] < self.position[v],
                "cell visited before a local predecessor",
            )?;
        }
        ensure(
            self.delayed_location_dependencies
                .iter()
                .all(|p| !self.location_dependencies.contains(p)),
            "partition is both delayed and ordinary predecessor",
        )?;
        ensure(
            self.delayed_location_successors
                .iter()
                .all(|s| self.location_successors.contains(s)),
            "delayed successor missing from successor list",
        )?;
        ensure(
            self.location_dependencies
                .iter()
                .all(|p| !self.location_successors.contains(p) || self.is_delayed_successor(*p)),
            "partition is predecessor and successor over non-delayed edges",
        )
    }
}

/// Build plans for several directions with a single partition-graph
/// exchange. Collective like [`SweepPlan::build`].
pub fn build_plans<C>(
    topology: &PartitionTopology,
    directions: &[Direction],
    comm: &C,
    tag: CommTag,
) -> Result<Vec<SweepPlan>, MeshSweepError>
where
    C: Communicator,
{
    #[cfg(feature = "rayon")]
    let locals: Vec<LocalSweepGraph> = {
        use rayon::prelude::*;
        directions
            .par_iter()
            .map(|&d| LocalSweepGraph::compute(topology, d))
            .collect::<Result<_, _>>()?
    };
    #[cfg(not(feature = "rayon"))]
    let locals: Vec<LocalSweepGraph> = directions
        .iter()
        .map(|&d| LocalSweepGraph::compute(topology, d))
        .collect::<Result<_, _>>()?;

    let mut ints = vec![directions.len() as i64];
    for local in &locals {
        local.edges().encode(&mut ints);
    }
    let gathered = all_gather_ints(comm, tag, &ints)?;
    let size = gathered.len();

    // per_direction[d][rank]
    let mut per_direction: Vec<Vec<PartitionEdges>> = vec![Vec::with_capacity(size); directions.len()];
    for (rank, msg) in gathered.iter().enumerate() {
        if msg.first() != Some(&(directions.len() as i64)) {
            return Err(MeshSweepError::Protocol {
                neighbor: rank,
                reason: format!(
                    "expected dependency lists for {} directions, header says {:?}",
                    directions.len(),
                    msg.first()
                ),
            });
        }
        let mut pos = 1;
        for slot in per_direction.iter_mut() {
            slot.push(PartitionEdges::decode(msg, &mut pos, rank, size)?);
        }
        expect_consumed(msg, pos, rank)?;
    }

    locals
        .into_iter()
        .zip(per_direction)
        .map(|(local, all)| {
            let graph = PartitionGraph::from_edges(local.direction(), &all)?;
            SweepPlan::assemble(topology, local, &graph)
        })
        .collect()
}
