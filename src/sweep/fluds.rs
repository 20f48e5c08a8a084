//! Flux data store: where every face's angular flux lives during a sweep.
//!
//! For one angle set on one partition the store owns
//!
//! - `local_psi`: downwind flux of faces shared by two local cells,
//! - `deploc_psi[s]`: staging buffer for successor `s` (order of
//!   [`SweepPlan::location_successors`]),
//! - `preloc_psi[i]`: flux received from ordinary predecessor `i`,
//! - `delayed_preloc_psi[j]`: flux from delayed predecessor `j`, kept across
//!   iterations (zero before the first delayed message arrives).
//!
//! Offsets are fixed when the store is built. The sender lays out a
//! successor buffer by walking its plan order and each cell's faces in index
//! order; the receiver learns the same layout from the compact cell views
//! the sender emitted in that order, so both sides agree without ever
//! negotiating per message.

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::mesh_error::MeshSweepError;
use crate::sweep::cell_view::{CellViewMessage, CompactCellView, CompactFaceView};
use crate::sweep::direction::FaceOrientation;
use crate::sweep::plan::SweepPlan;
use crate::sweep::solver::FaceFluxes;
use crate::topology::partition::{Face, FaceNeighbor, PartitionTopology};
use crate::topology::point::GlobalCellId;
use itertools::Itertools;
use std::collections::HashMap;

/// Where an upwind face reads its flux from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncomingSlot {
    /// Written by an upstream local cell into `local_psi`.
    Local { offset: usize, node_map: Vec<usize> },
    /// Received this iteration from an ordinary predecessor.
    Remote {
        predecessor: usize,
        offset: usize,
        node_map: Vec<usize>,
    },
    /// Received during the previous iteration from a delayed predecessor.
    Delayed {
        predecessor: usize,
        offset: usize,
        node_map: Vec<usize>,
    },
    /// Domain boundary: no incoming flux.
    Boundary,
}

/// Role of one face of one cell for the store's direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FaceSlot {
    /// Downwind, read by a local cell.
    Local { offset: usize },
    /// Downwind, staged for successor `successor`.
    Outgoing { successor: usize, offset: usize },
    /// Downwind onto the domain boundary; the flux is dropped.
    Boundary,
    /// Upwind.
    Incoming(IncomingSlot),
    /// Parallel to the direction.
    Parallel,
}

/// Which predecessor buffer an incoming location refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PredecessorRef {
    Ordinary(usize),
    Delayed(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IncomingLocation {
    pub predecessor: PredecessorRef,
    /// Offset of the face's first value in the predecessor buffer.
    pub offset: usize,
}

/// Upstream face as announced by a predecessor's cell views.
#[derive(Clone, Debug)]
struct UpstreamFace {
    vertices: Vec<u64>,
    offset: usize,
}

#[derive(Clone, Debug)]
pub struct FluxDataStore {
    stride: usize,
    slots: Vec<Vec<FaceSlot>>,
    face_nodes: Vec<Vec<usize>>,

    local_psi_size: usize,
    deploc_face_dof_count: Vec<usize>,
    preloc_face_dof_count: Vec<usize>,
    delayed_preloc_face_dof_count: Vec<usize>,

    incoming_index: HashMap<(GlobalCellId, usize), IncomingLocation>,

    local_psi: Vec<f64>,
    deploc_psi: Vec<Vec<f64>>,
    preloc_psi: Vec<Vec<f64>>,
    delayed_preloc_psi: Vec<Vec<f64>>,
}

impl FluxDataStore {
    /// Cell views this partition owes each successor, in the order of
    /// [`SweepPlan::location_successors`].
    pub fn outgoing_cell_views(
        topology: &PartitionTopology,
        plan: &SweepPlan,
    ) -> Vec<CellViewMessage> {
        let direction = plan.direction();
        let mut per_successor: Vec<Vec<CompactCellView>> =
            vec![Vec::new(); plan.location_successors().len()];
        for &c in plan.order() {
            let cell = topology.cell(c);
            let faces_by_successor = cell
                .faces
                .iter()
                .enumerate()
                .filter(|(_, face)| {
                    FaceOrientation::classify(&direction, &face.normal)
                        == FaceOrientation::Outgoing
                })
                .filter_map(|(f, face)| match face.neighbor {
                    FaceNeighbor::Remote { partition, .. } => plan
                        .location_successors()
                        .binary_search(&partition)
                        .ok()
                        .map(|s| (s, f, face)),
                    _ => None,
                })
                .into_group_map_by(|&(s, _, _)| s);
            for (s, faces) in faces_by_successor.into_iter().sorted_by_key(|(s, _)| *s) {
                per_successor[s].push(CompactCellView {
                    global_id: cell.global_id,
                    faces: faces
                        .into_iter()
                        .map(|(_, f, face)| CompactFaceView {
                            face_id: f,
                            vertices: face.vertices.clone(),
                        })
                        .collect(),
                });
            }
        }
        per_successor.into_iter().map(CellViewMessage::new).collect()
    }

    /// Lay out every buffer for one angle set.
    ///
    /// `upstream[i]` are the views of ordinary predecessor
    /// `plan.location_dependencies()[i]`, `delayed_upstream[j]` those of
    /// `plan.delayed_location_dependencies()[j]`.
    pub fn new(
        topology: &PartitionTopology,
        plan: &SweepPlan,
        stride: usize,
        upstream: &[CellViewMessage],
        delayed_upstream: &[CellViewMessage],
    ) -> Result<Self, MeshSweepError> {
        if upstream.len() != plan.location_dependencies().len()
            || delayed_upstream.len() != plan.delayed_location_dependencies().len()
        {
            return Err(MeshSweepError::InvalidState(
                "one cell view message is needed per predecessor",
            ));
        }
        let direction = plan.direction();
        let n = topology.num_cells();

        let mut slots: Vec<Vec<FaceSlot>> = Vec::with_capacity(n);
        let mut face_nodes: Vec<Vec<usize>> = Vec::with_capacity(n);
        for cell in topology.cells() {
            face_nodes.push(cell.faces.iter().map(|f| f.vertices.len()).collect());
            slots.push(vec![FaceSlot::Parallel; cell.faces.len()]);
        }

        // Downwind side, in plan order so successor offsets match the views.
        let mut local_psi_size = 0usize;
        let mut deploc_face_dof_count = vec![0usize; plan.location_successors().len()];
        for &c in plan.order() {
            for (f, face) in topology.cell(c).faces.iter().enumerate() {
                if FaceOrientation::classify(&direction, &face.normal) != FaceOrientation::Outgoing
                {
                    continue;
                }
                let nodes = face.vertices.len();
                slots[c][f] = match face.neighbor {
                    FaceNeighbor::Boundary => FaceSlot::Boundary,
                    FaceNeighbor::Local(_) => {
                        let offset = local_psi_size;
                        local_psi_size += nodes * stride;
                        FaceSlot::Local { offset }
                    }
                    FaceNeighbor::Remote { partition, .. } => {
                        let successor = plan
                            .location_successors()
                            .binary_search(&partition)
                            .map_err(|_| MeshSweepError::MissingFaceMapping { cell: c, face: f })?;
                        let offset = deploc_face_dof_count[successor] * stride;
                        deploc_face_dof_count[successor] += nodes;
                        FaceSlot::Outgoing { successor, offset }
                    }
                };
            }
        }

        // Index the upstream views.
        let mut incoming_index = HashMap::new();
        let mut upstream_faces: HashMap<(usize, GlobalCellId), Vec<UpstreamFace>> = HashMap::new();
        let predecessor_lists = [
            (plan.location_dependencies(), upstream, false),
            (plan.delayed_location_dependencies(), delayed_upstream, true),
        ];
        for (partitions, messages, delayed) in predecessor_lists {
            for (i, (&partition, msg)) in partitions.iter().zip(messages).enumerate() {
                let pred = if delayed {
                    PredecessorRef::Delayed(i)
                } else {
                    PredecessorRef::Ordinary(i)
                };
                let mut offset = 0;
                for view in &msg.cells {
                    for face in &view.faces {
                        incoming_index.insert(
                            (view.global_id, face.face_id),
                            IncomingLocation {
                                predecessor: pred,
                                offset,
                            },
                        );
                        upstream_faces
                            .entry((partition, view.global_id))
                            .or_default()
                            .push(UpstreamFace {
                                vertices: face.vertices.clone(),
                                offset,
                            });
                        offset += face.vertices.len() * stride;
                    }
                }
            }
        }
        let preloc_face_dof_count = upstream.iter().map(CellViewMessage::face_dof_count).collect();
        let delayed_preloc_face_dof_count: Vec<usize> = delayed_upstream
            .iter()
            .map(CellViewMessage::face_dof_count)
            .collect();

        // Upwind side.
        for (c, cell) in topology.cells().iter().enumerate() {
            for (f, face) in cell.faces.iter().enumerate() {
                if FaceOrientation::classify(&direction, &face.normal) != FaceOrientation::Incoming
                {
                    continue;
                }
                let missing = MeshSweepError::MissingFaceMapping { cell: c, face: f };
                let incoming = match face.neighbor {
                    FaceNeighbor::Boundary => IncomingSlot::Boundary,
                    FaceNeighbor::Local(up) => {
                        let (offset, node_map) = topology
                            .cell(up)
                            .faces
                            .iter()
                            .enumerate()
                            .filter(|(_, g)| g.neighbor == FaceNeighbor::Local(c))
                            .find_map(|(g, up_face)| match slots[up][g] {
                                FaceSlot::Local { offset } => {
                                    vertex_permutation(face, &up_face.vertices).map(|m| (offset, m))
                                }
                                _ => None,
                            })
                            .ok_or(missing)?;
                        IncomingSlot::Local { offset, node_map }
                    }
                    FaceNeighbor::Remote { partition, cell: gid } => {
                        let (offset, node_map) = upstream_faces
                            .get(&(partition, gid))
                            .and_then(|faces| {
                                faces.iter().find_map(|u| {
                                    vertex_permutation(face, &u.vertices).map(|m| (u.offset, m))
                                })
                            })
                            .ok_or(missing)?;
                        if let Ok(predecessor) =
                            plan.location_dependencies().binary_search(&partition)
                        {
                            IncomingSlot::Remote {
                                predecessor,
                                offset,
                                node_map,
                            }
                        } else {
                            let predecessor = plan
                                .delayed_location_dependencies()
                                .binary_search(&partition)
                                .map_err(|_| MeshSweepError::MissingFaceMapping {
                                    cell: c,
                                    face: f,
                                })?;
                            IncomingSlot::Delayed {
                                predecessor,
                                offset,
                                node_map,
                            }
                        }
                    }
                };
                slots[c][f] = FaceSlot::Incoming(incoming);
            }
        }

        let delayed_preloc_psi = delayed_preloc_face_dof_count
            .iter()
            .map(|&d| vec![0.0; d * stride])
            .collect();

        let store = Self {
            stride,
            slots,
            face_nodes,
            local_psi_size,
            deploc_psi: vec![Vec::new(); deploc_face_dof_count.len()],
            preloc_psi: vec![Vec::new(); plan.location_dependencies().len()],
            deploc_face_dof_count,
            preloc_face_dof_count,
            delayed_preloc_face_dof_count,
            incoming_index,
            local_psi: Vec::new(),
            delayed_preloc_psi,
        };
        crate::debug_invariants!(store.validate_invariants(), "flux data store");
        Ok(store)
    }

    /// Values per face node: `angles x groups`.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn face_slot(&self, cell: usize, face: usize) -> &FaceSlot {
        &self.slots[cell][face]
    }

    /// Offset of a downwind face in its buffer (`local_psi` or the staging
    /// buffer of its successor). `None` for faces that are not stored.
    pub fn map_outgoing_face(&self, cell: usize, face: usize) -> Option<usize> {
        match self.slots.get(cell)?.get(face)? {
            FaceSlot::Local { offset } | FaceSlot::Outgoing { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Location of an upstream face, named the way its owner's cell views
    /// name it.
    pub fn map_incoming_face(&self, cell: GlobalCellId, face_id: usize) -> Option<IncomingLocation> {
        self.incoming_index.get(&(cell, face_id)).copied()
    }

    pub fn deploc_face_dof_count(&self, successor: usize) -> usize {
        self.deploc_face_dof_count[successor]
    }

    pub fn preloc_face_dof_count(&self, predecessor: usize) -> usize {
        self.preloc_face_dof_count[predecessor]
    }

    pub fn delayed_preloc_face_dof_count(&self, predecessor: usize) -> usize {
        self.delayed_preloc_face_dof_count[predecessor]
    }

    pub fn num_successors(&self) -> usize {
        self.deploc_face_dof_count.len()
    }

    pub fn num_predecessors(&self) -> usize {
        self.preloc_face_dof_count.len()
    }

    pub fn num_delayed_predecessors(&self) -> usize {
        self.delayed_preloc_face_dof_count.len()
    }

    // --- buffer lifecycle; `clear_*` keep capacity for the next iteration

    pub fn allocate_local_psi(&mut self) {
        resize_zeroed(&mut self.local_psi, self.local_psi_size);
    }

    pub fn allocate_outgoing_psi(&mut self) {
        for (buf, &dofs) in self.deploc_psi.iter_mut().zip(&self.deploc_face_dof_count) {
            resize_zeroed(buf, dofs * self.stride);
        }
    }

    pub fn allocate_preloc_psi(&mut self) {
        for (buf, &dofs) in self.preloc_psi.iter_mut().zip(&self.preloc_face_dof_count) {
            resize_zeroed(buf, dofs * self.stride);
        }
    }

    pub fn clear_send_psi(&mut self) {
        self.deploc_psi.iter_mut().for_each(Vec::clear);
    }

    pub fn clear_local_and_receive_psi(&mut self) {
        self.local_psi.clear();
        self.preloc_psi.iter_mut().for_each(Vec::clear);
    }

    pub fn deploc_psi(&self, successor: usize) -> &[f64] {
        &self.deploc_psi[successor]
    }

    pub fn preloc_psi_mut(&mut self, predecessor: usize) -> &mut [f64] {
        &mut self.preloc_psi[predecessor]
    }

    pub fn delayed_preloc_psi(&self, predecessor: usize) -> &[f64] {
        &self.delayed_preloc_psi[predecessor]
    }

    pub fn delayed_preloc_psi_mut(&mut self, predecessor: usize) -> &mut [f64] {
        &mut self.delayed_preloc_psi[predecessor]
    }

    /// Upwind fluxes of `cell`, reordered to the cell's own vertex order.
    pub fn gather_incoming(&self, cell: usize) -> Result<FaceFluxes, MeshSweepError> {
        let stride = self.stride;
        let mut fluxes = FaceFluxes::new(stride, self.slots[cell].len());
        for (f, slot) in self.slots[cell].iter().enumerate() {
            let FaceSlot::Incoming(incoming) = slot else {
                continue;
            };
            let (src, offset, node_map): (&[f64], usize, &[usize]) = match incoming {
                IncomingSlot::Boundary => continue,
                IncomingSlot::Local { offset, node_map } => {
                    (self.local_psi.as_slice(), *offset, node_map.as_slice())
                }
                IncomingSlot::Remote {
                    predecessor,
                    offset,
                    node_map,
                } => (
                    self.preloc_psi[*predecessor].as_slice(),
                    *offset,
                    node_map.as_slice(),
                ),
                IncomingSlot::Delayed {
                    predecessor,
                    offset,
                    node_map,
                } => (
                    self.delayed_preloc_psi[*predecessor].as_slice(),
                    *offset,
                    node_map.as_slice(),
                ),
            };
            let mut values = vec![0.0; node_map.len() * stride];
            for (dst, &up) in values.chunks_exact_mut(stride).zip(node_map) {
                let start = offset + up * stride;
                let chunk = src.get(start..start + stride).ok_or(MeshSweepError::InvalidState(
                    "incoming flux buffer not allocated",
                ))?;
                dst.copy_from_slice(chunk);
            }
            fluxes.set(f, values);
        }
        Ok(fluxes)
    }

    /// Zeroed downwind faces of `cell` for the solver to fill.
    pub fn outgoing_scratch(&self, cell: usize) -> FaceFluxes {
        let mut fluxes = FaceFluxes::new(self.stride, self.slots[cell].len());
        for (f, slot) in self.slots[cell].iter().enumerate() {
            if matches!(
                slot,
                FaceSlot::Local { .. } | FaceSlot::Outgoing { .. } | FaceSlot::Boundary
            ) {
                fluxes.set(f, vec![0.0; self.face_nodes[cell][f] * self.stride]);
            }
        }
        fluxes
    }

    /// Store the solver's downwind fluxes of `cell`.
    pub fn scatter_outgoing(
        &mut self,
        cell: usize,
        outgoing: &FaceFluxes,
    ) -> Result<(), MeshSweepError> {
        for (f, values) in outgoing.iter() {
            let dst = match self.slots[cell].get(f) {
                Some(FaceSlot::Local { offset }) => {
                    self.local_psi.get_mut(*offset..*offset + values.len())
                }
                Some(FaceSlot::Outgoing { successor, offset }) => self.deploc_psi[*successor]
                    .get_mut(*offset..*offset + values.len()),
                _ => continue,
            };
            dst.ok_or(MeshSweepError::InvalidState(
                "outgoing flux buffer not allocated",
            ))?
            .copy_from_slice(values);
        }
        Ok(())
    }
}

fn resize_zeroed(buf: &mut Vec<f64>, len: usize) {
    buf.clear();
    buf.resize(len, 0.0);
}

/// For each vertex of `face`, its position in `upstream`; `None` unless the
/// two faces have the same vertex set.
fn vertex_permutation(face: &Face, upstream: &[u64]) -> Option<Vec<usize>> {
    if !face.same_vertices(upstream) {
        return None;
    }
    face.vertices
        .iter()
        .map(|v| upstream.iter().position(|u| u == v))
        .collect()
}

impl DebugInvariants for FluxDataStore {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "FluxDataStore");
    }

    fn validate_invariants(&self) -> Result<(), MeshSweepError> {
        for (c, cell_slots) in self.slots.iter().enumerate() {
            for (f, slot) in cell_slots.iter().enumerate() {
                let len = self.face_nodes[c][f] * self.stride;
                let fits = match slot {
                    FaceSlot::Local { offset } => offset + len <= self.local_psi_size,
                    FaceSlot::Outgoing { successor, offset } => {
                        offset + len <= self.deploc_face_dof_count[*successor] * self.stride
                    }
                    FaceSlot::Incoming(IncomingSlot::Local { offset, node_map }) => {
                        node_map.len() == self.face_nodes[c][f]
                            && offset + len <= self.local_psi_size
                    }
                    FaceSlot::Incoming(IncomingSlot::Remote {
                        predecessor,
                        offset,
                        node_map,
                    }) => {
                        node_map.len() == self.face_nodes[c][f]
                            && offset + len
                                <= self.preloc_face_dof_count[*predecessor] * self.stride
                    }
                    FaceSlot::Incoming(IncomingSlot::Delayed {
                        predecessor,
                        offset,
                        node_map,
                    }) => {
                        node_map.len() == self.face_nodes[c][f]
                            && offset + len
                                <= self.delayed_preloc_face_dof_count[*predecessor] * self.stride
                    }
                    _ => true,
                };
                ensure(fits, "face slot outside its buffer")?;
            }
        }
        Ok(())
    }
}

/// Scalar flux of the local cells: `nodes x moments x groups` per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalFluxBuffer {
    offsets: Vec<usize>,
    values: Vec<f64>,
    num_moments: usize,
    num_groups: usize,
}

impl LocalFluxBuffer {
    pub fn for_topology(topology: &PartitionTopology, num_moments: usize, num_groups: usize) -> Self {
        let mut offsets = Vec::with_capacity(topology.num_cells() + 1);
        offsets.push(0);
        let mut total = 0;
        for cell in topology.cells() {
            total += cell.node_count() * num_moments * num_groups;
            offsets.push(total);
        }
        Self {
            offsets,
            values: vec![0.0; total],
            num_moments,
            num_groups,
        }
    }

    pub fn num_moments(&self) -> usize {
        self.num_moments
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_cells(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn cell(&self, cell: usize) -> &[f64] {
        &self.values[self.offsets[cell]..self.offsets[cell + 1]]
    }

    pub fn cell_mut(&mut self, cell: usize) -> &mut [f64] {
        &mut self.values[self.offsets[cell]..self.offsets[cell + 1]]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }
}
