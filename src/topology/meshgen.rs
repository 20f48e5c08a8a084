//! Small structured partition generators.
//!
//! These build the [`PartitionTopology`] one partition would receive from a
//! real mesher/partitioner, for slabs and structured quad grids. They exist
//! for tests, benches and demos; general mesh generation is the mesher's job.

use crate::mesh_error::MeshSweepError;
use crate::topology::cell_type::CellShape;
use crate::topology::partition::{Cell, Face, FaceNeighbor, PartitionTopology};
use crate::topology::point::GlobalCellId;
use std::collections::HashMap;

fn gid(raw: usize) -> Result<GlobalCellId, MeshSweepError> {
    GlobalCellId::new(raw as u64).ok_or_else(|| MeshSweepError::InvalidTopology {
        partition: 0,
        reason: format!("cell id {raw} too large"),
    })
}

/// Owner of slab cell `i` when `total` cells are split into `parts`
/// contiguous blocks.
pub fn slab_owner(i: usize, total: usize, parts: usize) -> usize {
    // block p covers [p*total/parts, (p+1)*total/parts)
    (0..parts)
        .find(|&p| i < (p + 1) * total / parts)
        .unwrap_or(parts - 1)
}

/// Partition `part` of a 1D slab of `total` unit cells split into `parts`
/// contiguous blocks. Cell `i` spans vertices `i` and `i + 1`; with
/// `periodic` the last cell's right face wraps onto cell 0.
pub fn slab_partition(
    total: usize,
    parts: usize,
    part: usize,
    periodic: bool,
) -> Result<PartitionTopology, MeshSweepError> {
    if parts == 0 || total < parts || (periodic && total < 2) {
        return Err(MeshSweepError::InvalidTopology {
            partition: part,
            reason: format!("cannot split {total} slab cells into {parts} partitions"),
        });
    }
    let start = part * total / parts;
    let end = (part + 1) * total / parts;

    let neighbor = |j: Option<usize>| -> Result<FaceNeighbor, MeshSweepError> {
        Ok(match j {
            None => FaceNeighbor::Boundary,
            Some(j) => {
                let owner = slab_owner(j, total, parts);
                if owner == part {
                    FaceNeighbor::Local(j - start)
                } else {
                    FaceNeighbor::Remote {
                        partition: owner,
                        cell: gid(j)?,
                    }
                }
            }
        })
    };

    let mut cells = Vec::with_capacity(end - start);
    for i in start..end {
        let left = if i > 0 {
            Some(i - 1)
        } else if periodic {
            Some(total - 1)
        } else {
            None
        };
        let right = if i + 1 < total {
            Some(i + 1)
        } else if periodic {
            Some(0)
        } else {
            None
        };
        let right_vertex = if periodic { (i + 1) % total } else { i + 1 };
        cells.push(Cell::new(
            gid(i)?,
            CellShape::Slab,
            vec![
                Face::new([-1.0, 0.0, 0.0], vec![i as u64], neighbor(left)?),
                Face::new([1.0, 0.0, 0.0], vec![right_vertex as u64], neighbor(right)?),
            ],
        ));
    }
    PartitionTopology::new(part, parts, cells)
}

/// Partition `part` of an `nx` x `ny` grid of unit quads. `owner(i, j)`
/// assigns cell `(i, j)` (global id `j * nx + i`) to a partition. Faces are
/// ordered bottom, right, top, left with counter-clockwise vertex order.
pub fn quad_grid_partition<F>(
    nx: usize,
    ny: usize,
    num_partitions: usize,
    part: usize,
    owner: F,
) -> Result<PartitionTopology, MeshSweepError>
where
    F: Fn(usize, usize) -> usize,
{
    let vid = |i: usize, j: usize| (j * (nx + 1) + i) as u64;

    let mut owned = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let o = owner(i, j);
            if o >= num_partitions {
                return Err(MeshSweepError::InvalidTopology {
                    partition: part,
                    reason: format!("cell ({i}, {j}) assigned to partition {o}"),
                });
            }
            if o == part {
                owned.push((i, j));
            }
        }
    }
    let local: HashMap<(usize, usize), usize> =
        owned.iter().enumerate().map(|(k, &ij)| (ij, k)).collect();

    let neighbor = |n: Option<(usize, usize)>| -> Result<FaceNeighbor, MeshSweepError> {
        Ok(match n {
            None => FaceNeighbor::Boundary,
            Some(ij) => match local.get(&ij) {
                Some(&k) => FaceNeighbor::Local(k),
                None => FaceNeighbor::Remote {
                    partition: owner(ij.0, ij.1),
                    cell: gid(ij.1 * nx + ij.0)?,
                },
            },
        })
    };

    let mut cells = Vec::with_capacity(owned.len());
    for &(i, j) in &owned {
        let below = (j > 0).then(|| (i, j - 1));
        let right = (i + 1 < nx).then(|| (i + 1, j));
        let above = (j + 1 < ny).then(|| (i, j + 1));
        let left = (i > 0).then(|| (i - 1, j));
        cells.push(Cell::new(
            gid(j * nx + i)?,
            CellShape::Polygon,
            vec![
                Face::new([0.0, -1.0, 0.0], vec![vid(i, j), vid(i + 1, j)], neighbor(below)?),
                Face::new(
                    [1.0, 0.0, 0.0],
                    vec![vid(i + 1, j), vid(i + 1, j + 1)],
                    neighbor(right)?,
                ),
                Face::new(
                    [0.0, 1.0, 0.0],
                    vec![vid(i + 1, j + 1), vid(i, j + 1)],
                    neighbor(above)?,
                ),
                Face::new([-1.0, 0.0, 0.0], vec![vid(i, j + 1), vid(i, j)], neighbor(left)?),
            ],
        ));
    }
    PartitionTopology::new(part, num_partitions, cells)
}
