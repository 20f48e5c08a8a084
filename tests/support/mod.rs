#![allow(dead_code)]
use mesh_sweep::prelude::*;

/// Run `f` once per rank of an in-process world of `n` ranks, one thread
/// each, and collect the results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = RayonComm::world(n)
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Toy upwind solver: a cell's value is the largest incoming value plus one
/// (vacuum counts as zero). It writes the value on every downwind face and
/// adds it to every scalar-flux entry of the cell, so on an acyclic sweep
/// `phi` is the cell's depth in the dependency graph.
#[derive(Default)]
pub struct MaxPlusOne {
    pub solved: usize,
}

impl CellSolver for MaxPlusOne {
    fn solve_cell(
        &mut self,
        _ctx: &CellSolveContext<'_>,
        incoming: &FaceFluxes,
        outgoing: &mut FaceFluxes,
        phi: &mut [f64],
    ) {
        let up = incoming
            .iter()
            .flat_map(|(_, v)| v.iter().copied())
            .fold(0.0, f64::max);
        let value = up + 1.0;
        for f in 0..outgoing.num_faces() {
            if let Some(v) = outgoing.face_mut(f) {
                v.fill(value);
            }
        }
        for p in phi.iter_mut() {
            *p += value;
        }
        self.solved += 1;
    }
}

/// First scalar-flux entry of each local cell, keyed by global id.
pub fn phi_by_gid(topo: &PartitionTopology, phi: &LocalFluxBuffer) -> Vec<(u64, f64)> {
    topo.cells()
        .iter()
        .enumerate()
        .map(|(c, cell)| (cell.global_id.get(), phi.cell(c)[0]))
        .collect()
}

/// Merge per-rank results and sort by global id.
pub fn merged(per_rank: Vec<Vec<(u64, f64)>>) -> Vec<(u64, f64)> {
    let mut all: Vec<_> = per_rank.into_iter().flatten().collect();
    all.sort_by_key(|&(g, _)| g);
    all
}

pub fn group(x: f64, y: f64, angles: &[usize]) -> DirectionGroup {
    DirectionGroup {
        direction: Direction::new(x, y, 0.0),
        angles: angles.to_vec(),
    }
}
