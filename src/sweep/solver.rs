//! Seam between the sweep and the per-cell physics.
//!
//! The sweep knows nothing about cross sections or sources. For every cell,
//! in plan order, it hands a [`CellSolver`] the upwind face fluxes and gets
//! back the downwind ones plus the cell's contribution to the scalar flux.

use crate::sweep::direction::Direction;
use crate::topology::partition::Cell;

/// Per-face angular flux of one cell, `nodes x stride` values per face.
///
/// Within a face the layout is node-major: value `(node, angle, group)` sits
/// at `node * stride + angle * num_groups + group`, where `stride` is
/// `angles * num_groups` of the angle set.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceFluxes {
    stride: usize,
    faces: Vec<Option<Vec<f64>>>,
}

impl FaceFluxes {
    pub fn new(stride: usize, num_faces: usize) -> Self {
        Self {
            stride,
            faces: vec![None; num_faces],
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// `None` for faces that carry nothing in this role: a domain boundary
    /// (incoming vacuum), a parallel face, or a face of the other role.
    pub fn face(&self, face: usize) -> Option<&[f64]> {
        self.faces.get(face)?.as_deref()
    }

    pub fn face_mut(&mut self, face: usize) -> Option<&mut [f64]> {
        self.faces.get_mut(face)?.as_deref_mut()
    }

    pub(crate) fn set(&mut self, face: usize, values: Vec<f64>) {
        self.faces[face] = Some(values);
    }

    /// Faces holding data, with their index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> + '_ {
        self.faces
            .iter()
            .enumerate()
            .filter_map(|(f, v)| v.as_deref().map(|v| (f, v)))
    }
}

/// What a solver gets to know about the cell it is solving.
#[derive(Clone, Copy, Debug)]
pub struct CellSolveContext<'a> {
    pub cell: &'a Cell,
    pub local_id: usize,
    pub angle_set: usize,
    /// Caller-assigned ids of the angles in the set.
    pub angles: &'a [usize],
    /// Representative direction the plan was built for.
    pub direction: Direction,
    pub num_groups: usize,
}

/// Per-cell transport solve.
pub trait CellSolver {
    /// Compute `outgoing` (pre-sized, zeroed) from `incoming`, and add this
    /// cell's contribution to `phi` (`nodes x moments x groups` values).
    fn solve_cell(
        &mut self,
        ctx: &CellSolveContext<'_>,
        incoming: &FaceFluxes,
        outgoing: &mut FaceFluxes,
        phi: &mut [f64],
    );
}

impl<F> CellSolver for F
where
    F: FnMut(&CellSolveContext<'_>, &FaceFluxes, &mut FaceFluxes, &mut [f64]),
{
    fn solve_cell(
        &mut self,
        ctx: &CellSolveContext<'_>,
        incoming: &FaceFluxes,
        outgoing: &mut FaceFluxes,
        phi: &mut [f64],
    ) {
        self(ctx, incoming, outgoing, phi)
    }
}
