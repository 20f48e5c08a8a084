//! Compact cell views: the minimum a downstream partition needs to know about
//! the upstream cells whose outgoing faces it will read flux from.
//!
//! Wire layout (one `i64` per entry):
//!
//! ```text
//! [face_dof_count, num_cells,
//!  marker(c0), face_id, v, v, ...,  marker(c0), face_id, v, ...,
//!  marker(c1), face_id, v, ...]
//! ```
//!
//! Every face starts with the owning cell's negative marker
//! (see [`GlobalCellId::to_marker`]) followed by the face id; vertex ids
//! follow until the next marker. A new cell begins whenever the marker
//! changes, so two consecutive cells must never share an id.

use crate::mesh_error::MeshSweepError;
use crate::topology::point::GlobalCellId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactFaceView {
    /// Face index inside the owning cell.
    pub face_id: usize,
    /// Vertex ids in the upstream cell's face order.
    pub vertices: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactCellView {
    pub global_id: GlobalCellId,
    pub faces: Vec<CompactFaceView>,
}

impl CompactCellView {
    pub fn face_dof_count(&self) -> usize {
        self.faces.iter().map(|f| f.vertices.len()).sum()
    }
}

/// All views one partition sends to one neighbor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellViewMessage {
    face_dof_count: usize,
    pub cells: Vec<CompactCellView>,
}

impl CellViewMessage {
    pub fn new(cells: Vec<CompactCellView>) -> Self {
        let face_dof_count = cells.iter().map(CompactCellView::face_dof_count).sum();
        Self {
            face_dof_count,
            cells,
        }
    }

    /// Total face nodes over all faces, i.e. the length of the boundary flux
    /// buffer per unit stride.
    pub fn face_dof_count(&self) -> usize {
        self.face_dof_count
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<i64>, MeshSweepError> {
        let faces: usize = self.cells.iter().map(|c| c.faces.len()).sum();
        let mut out = Vec::with_capacity(2 + 2 * faces + self.face_dof_count);
        out.push(wire_int(self.face_dof_count, "face dof count")?);
        out.push(wire_int(self.cells.len(), "cell count")?);

        let mut previous: Option<GlobalCellId> = None;
        for cell in &self.cells {
            if previous == Some(cell.global_id) {
                return Err(MeshSweepError::InvalidCellView(format!(
                    "consecutive views of cell {} would merge on the wire",
                    cell.global_id
                )));
            }
            if cell.faces.is_empty() {
                return Err(MeshSweepError::InvalidCellView(format!(
                    "cell {} has no faces and cannot be encoded",
                    cell.global_id
                )));
            }
            previous = Some(cell.global_id);
            let marker = cell.global_id.to_marker();
            for face in &cell.faces {
                out.push(marker);
                out.push(wire_int(face.face_id, "face id")?);
                for &v in &face.vertices {
                    out.push(i64::try_from(v).map_err(|_| {
                        MeshSweepError::InvalidCellView(format!("vertex id {v} exceeds i64"))
                    })?);
                }
            }
        }
        Ok(out)
    }

    /// Decode a message received from `neighbor`.
    pub fn deserialize(ints: &[i64], neighbor: usize) -> Result<Self, MeshSweepError> {
        let protocol = |reason: String| MeshSweepError::Protocol { neighbor, reason };
        let [dofs, ncells, body @ ..] = ints else {
            return Err(protocol(format!(
                "cell view message of {} entries has no header",
                ints.len()
            )));
        };
        let face_dof_count = usize::try_from(*dofs)
            .map_err(|_| protocol(format!("negative face dof count {dofs}")))?;
        let num_cells = usize::try_from(*ncells)
            .map_err(|_| protocol(format!("negative cell count {ncells}")))?;

        let mut cells: Vec<CompactCellView> = Vec::new();
        let mut current_marker: Option<i64> = None;
        let mut vertex_total = 0usize;
        let mut i = 0;
        while i < body.len() {
            let entry = body[i];
            if let Some(id) = GlobalCellId::from_marker(entry) {
                let face_id = *body.get(i + 1).ok_or_else(|| {
                    protocol(format!("cell marker {entry} at the end of the message has no face id"))
                })?;
                let face_id = usize::try_from(face_id)
                    .map_err(|_| protocol(format!("invalid face id {face_id} for cell {id}")))?;
                if current_marker != Some(entry) {
                    cells.push(CompactCellView {
                        global_id: id,
                        faces: Vec::new(),
                    });
                    current_marker = Some(entry);
                }
                if let Some(cell) = cells.last_mut() {
                    cell.faces.push(CompactFaceView {
                        face_id,
                        vertices: Vec::new(),
                    });
                }
                i += 2;
            } else {
                let face = cells
                    .last_mut()
                    .and_then(|c| c.faces.last_mut())
                    .ok_or_else(|| protocol(format!("vertex {entry} before any cell marker")))?;
                face.vertices.push(entry as u64);
                vertex_total += 1;
                i += 1;
            }
        }

        if cells.len() != num_cells {
            return Err(protocol(format!(
                "header announces {num_cells} cells, message holds {}",
                cells.len()
            )));
        }
        if vertex_total != face_dof_count {
            return Err(protocol(format!(
                "header announces {face_dof_count} face dofs, message holds {vertex_total}"
            )));
        }
        Ok(Self {
            face_dof_count,
            cells,
        })
    }
}

fn wire_int(v: usize, what: &str) -> Result<i64, MeshSweepError> {
    i64::try_from(v).map_err(|_| MeshSweepError::InvalidCellView(format!("{what} {v} exceeds i64")))
}
