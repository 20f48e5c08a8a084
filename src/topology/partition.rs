//! Partition topology: the mesh as one partition sees it.
//!
//! This is the whole interface to the mesh/partitioning collaborator. Each
//! partition holds its own cells (indexed locally), their faces with outward
//! normals and vertex ids, and for every face what lies across it: nothing
//! (domain boundary), another local cell, or a cell owned by a neighbor
//! partition. The structure is immutable once validated.

use crate::mesh_error::MeshSweepError;
use crate::topology::cell_type::CellShape;
use crate::topology::point::GlobalCellId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What lies across a face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceNeighbor {
    /// True domain boundary.
    Boundary,
    /// Another cell of this partition, by local index.
    Local(usize),
    /// A cell owned by a neighbor partition.
    Remote {
        partition: usize,
        cell: GlobalCellId,
    },
}

/// One face of a cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Face {
    /// Outward unit normal.
    pub normal: [f64; 3],
    /// Global vertex ids, in the owning cell's orientation.
    pub vertices: Vec<u64>,
    pub neighbor: FaceNeighbor,
}

impl Face {
    pub fn new(normal: [f64; 3], vertices: Vec<u64>, neighbor: FaceNeighbor) -> Self {
        Self {
            normal,
            vertices,
            neighbor,
        }
    }

    /// True if both faces carry the same vertex set, in any order.
    pub fn same_vertices(&self, other: &[u64]) -> bool {
        if self.vertices.len() != other.len() {
            return false;
        }
        let mut a = self.vertices.clone();
        let mut b = other.to_vec();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

/// A local cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub global_id: GlobalCellId,
    pub shape: CellShape,
    pub faces: Vec<Face>,
}

impl Cell {
    pub fn new(global_id: GlobalCellId, shape: CellShape, faces: Vec<Face>) -> Self {
        Self {
            global_id,
            shape,
            faces,
        }
    }

    /// Distinct vertices over all faces.
    pub fn node_count(&self) -> usize {
        self.faces
            .iter()
            .flat_map(|f| f.vertices.iter().copied())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Cells of one partition plus the partition-level neighbor map.
#[derive(Clone, Debug)]
pub struct PartitionTopology {
    partition: usize,
    num_partitions: usize,
    cells: Vec<Cell>,
    global_to_local: HashMap<GlobalCellId, usize>,
}

impl PartitionTopology {
    /// Validate and wrap the cells owned by `partition`.
    ///
    /// # Errors
    /// Returns [`MeshSweepError::InvalidTopology`] for duplicate global ids,
    /// faces pointing at nonexistent local cells or at the partition itself,
    /// neighbor partitions out of range, and faces incompatible with the cell
    /// shape.
    pub fn new(
        partition: usize,
        num_partitions: usize,
        cells: Vec<Cell>,
    ) -> Result<Self, MeshSweepError> {
        let invalid = |reason: String| MeshSweepError::InvalidTopology { partition, reason };

        if partition >= num_partitions {
            return Err(invalid(format!(
                "partition id {partition} out of range for {num_partitions} partitions"
            )));
        }

        let mut global_to_local = HashMap::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            if global_to_local.insert(cell.global_id, i).is_some() {
                return Err(invalid(format!("duplicate global cell id {}", cell.global_id)));
            }
        }

        for (i, cell) in cells.iter().enumerate() {
            if cell.faces.len() < cell.shape.min_faces() {
                return Err(invalid(format!(
                    "cell {} ({:?}) has {} faces",
                    cell.global_id,
                    cell.shape,
                    cell.faces.len()
                )));
            }
            for (f, face) in cell.faces.iter().enumerate() {
                if !cell.shape.accepts_face(face.vertices.len()) {
                    return Err(invalid(format!(
                        "face {f} of cell {} has {} vertices, not valid for {:?}",
                        cell.global_id,
                        face.vertices.len(),
                        cell.shape
                    )));
                }
                if face.vertices.iter().any(|&v| v > i64::MAX as u64) {
                    return Err(invalid(format!(
                        "face {f} of cell {} has a vertex id outside the wire range",
                        cell.global_id
                    )));
                }
                match face.neighbor {
                    FaceNeighbor::Boundary => {}
                    FaceNeighbor::Local(n) => {
                        if n >= cells.len() || n == i {
                            return Err(invalid(format!(
                                "face {f} of cell {} points at local cell {n}",
                                cell.global_id
                            )));
                        }
                    }
                    FaceNeighbor::Remote { partition: p, .. } => {
                        if p == partition || p >= num_partitions {
                            return Err(invalid(format!(
                                "face {f} of cell {} points at partition {p}",
                                cell.global_id
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            partition,
            num_partitions,
            cells,
            global_to_local,
        })
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, local: usize) -> &Cell {
        &self.cells[local]
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Local index of a global id owned here.
    pub fn local_of(&self, id: GlobalCellId) -> Option<usize> {
        self.global_to_local.get(&id).copied()
    }

    /// Boundary faces grouped by neighbor partition, as `(cell, face)` pairs.
    pub fn boundary_faces_by_partition(&self) -> BTreeMap<usize, Vec<(usize, usize)>> {
        let mut out: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for (c, cell) in self.cells.iter().enumerate() {
            for (f, face) in cell.faces.iter().enumerate() {
                if let FaceNeighbor::Remote { partition, .. } = face.neighbor {
                    out.entry(partition).or_default().push((c, f));
                }
            }
        }
        out
    }

    /// Partitions sharing at least one face with this one, ascending.
    pub fn neighbor_partitions(&self) -> Vec<usize> {
        self.boundary_faces_by_partition().into_keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(n: u64) -> GlobalCellId {
        GlobalCellId::new(n).unwrap()
    }

    fn slab(id: u64, left: FaceNeighbor, right: FaceNeighbor) -> Cell {
        Cell::new(
            gid(id),
            CellShape::Slab,
            vec![
                Face::new([-1.0, 0.0, 0.0], vec![id], left),
                Face::new([1.0, 0.0, 0.0], vec![id + 1], right),
            ],
        )
    }

    #[test]
    fn groups_boundary_faces() {
        let cells = vec![
            slab(
                4,
                FaceNeighbor::Remote {
                    partition: 0,
                    cell: gid(3),
                },
                FaceNeighbor::Local(1),
            ),
            slab(
                5,
                FaceNeighbor::Local(0),
                FaceNeighbor::Remote {
                    partition: 2,
                    cell: gid(6),
                },
            ),
        ];
        let topo = PartitionTopology::new(1, 3, cells).unwrap();
        let groups = topo.boundary_faces_by_partition();
        assert_eq!(groups[&0], vec![(0, 0)]);
        assert_eq!(groups[&2], vec![(1, 1)]);
        assert_eq!(topo.neighbor_partitions(), vec![0, 2]);
        assert_eq!(topo.local_of(gid(5)), Some(1));
    }

    #[test]
    fn rejects_self_partition_neighbor() {
        let cells = vec![slab(
            0,
            FaceNeighbor::Boundary,
            FaceNeighbor::Remote {
                partition: 0,
                cell: gid(1),
            },
        )];
        assert!(matches!(
            PartitionTopology::new(0, 2, cells),
            Err(MeshSweepError::InvalidTopology { partition: 0, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_ids_and_bad_faces() {
        let cells = vec![
            slab(0, FaceNeighbor::Boundary, FaceNeighbor::Local(1)),
            slab(0, FaceNeighbor::Local(0), FaceNeighbor::Boundary),
        ];
        assert!(PartitionTopology::new(0, 1, cells).is_err());

        let bad = Cell::new(
            gid(0),
            CellShape::Slab,
            vec![
                Face::new([-1.0, 0.0, 0.0], vec![0, 1], FaceNeighbor::Boundary),
                Face::new([1.0, 0.0, 0.0], vec![1], FaceNeighbor::Boundary),
            ],
        );
        assert!(PartitionTopology::new(0, 1, vec![bad]).is_err());
    }

    #[test]
    fn same_vertices_ignores_order() {
        let f = Face::new([0.0, 1.0, 0.0], vec![3, 7], FaceNeighbor::Boundary);
        assert!(f.same_vertices(&[7, 3]));
        assert!(!f.same_vertices(&[7, 4]));
    }
}
