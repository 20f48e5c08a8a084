//! Small deterministic digraph used for both the partition-level and the
//! cell-level sweep graphs.
//!
//! Adjacency is kept in `BTreeSet`s so every traversal visits successors in
//! ascending node order. Two partitions building the same graph therefore
//! find the same back edges, which is what lets them agree on delayed edges
//! without talking to each other.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Directed graph over nodes `0..n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiGraph {
    adj: Vec<BTreeSet<usize>>,
}

impl DiGraph {
    pub fn new(n: usize) -> Self {
        Self {
            adj: vec![BTreeSet::new(); n],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.adj.len()
    }

    /// Adds `u -> v`; returns `false` if it was already present.
    pub fn add_edge(&mut self, u: usize, v: usize) -> bool {
        self.adj[u].insert(v)
    }

    pub fn remove_edge(&mut self, u: usize, v: usize) -> bool {
        self.adj[u].remove(&v)
    }

    pub fn has_edge(&self, u: usize, v: usize) -> bool {
        self.adj[u].contains(&v)
    }

    pub fn successors(&self, u: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj[u].iter().copied()
    }

    /// All edges in `(u, v)` lexicographic order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adj
            .iter()
            .enumerate()
            .flat_map(|(u, s)| s.iter().map(move |&v| (u, v)))
    }

    fn in_degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.adj.len()];
        for (_, v) in self.edges() {
            deg[v] += 1;
        }
        deg
    }

    /// Depth-first search from roots in ascending order, successors in
    /// ascending order, tracking the active recursion stack. Returns every
    /// edge that closes onto a node still on the stack. Removing all of them
    /// leaves the graph acyclic.
    pub fn back_edges(&self) -> Vec<(usize, usize)> {
        let n = self.adj.len();
        let succ: Vec<Vec<usize>> = self.adj.iter().map(|s| s.iter().copied().collect()).collect();
        let mut color = vec![Color::White; n];
        let mut back = Vec::new();
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..n {
            if color[root] != Color::White {
                continue;
            }
            color[root] = Color::Gray;
            stack.push((root, 0));
            while let Some(top) = stack.last_mut() {
                let u = top.0;
                if let Some(&v) = succ[u].get(top.1) {
                    top.1 += 1;
                    match color[v] {
                        Color::White => {
                            color[v] = Color::Gray;
                            stack.push((v, 0));
                        }
                        Color::Gray => back.push((u, v)),
                        Color::Black => {}
                    }
                } else {
                    color[u] = Color::Black;
                    stack.pop();
                }
            }
        }
        back
    }

    /// Kahn's algorithm; among ready nodes the one with the smallest `key`
    /// goes first. On a cycle returns `Err(n)` with the number of nodes that
    /// could not be placed.
    pub fn topological_order_by_key<K, F>(&self, key: F) -> Result<Vec<usize>, usize>
    where
        K: Ord,
        F: Fn(usize) -> K,
    {
        let n = self.adj.len();
        let mut deg = self.in_degrees();
        let mut ready: BinaryHeap<Reverse<(K, usize)>> = (0..n)
            .filter(|&u| deg[u] == 0)
            .map(|u| Reverse((key(u), u)))
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((_, u))) = ready.pop() {
            order.push(u);
            for v in self.successors(u) {
                deg[v] -= 1;
                if deg[v] == 0 {
                    ready.push(Reverse((key(v), v)));
                }
            }
        }
        if order.len() == n {
            Ok(order)
        } else {
            Err(n - order.len())
        }
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order_by_key(|u| u).is_ok()
    }

    /// Smallest node that Kahn's algorithm cannot place, i.e. one lying on
    /// or downstream of a cycle.
    pub fn first_on_cycle(&self) -> Option<usize> {
        let mut deg = self.in_degrees();
        let mut ready: Vec<usize> = (0..self.adj.len()).filter(|&u| deg[u] == 0).collect();
        let mut placed = vec![false; self.adj.len()];
        while let Some(u) = ready.pop() {
            placed[u] = true;
            for v in self.successors(u) {
                deg[v] -= 1;
                if deg[v] == 0 {
                    ready.push(v);
                }
            }
        }
        placed.iter().position(|&p| !p)
    }

    /// Longest-path levels: level 0 holds the sources, a node sits one level
    /// below its deepest predecessor. `None` if the graph is cyclic.
    pub fn levels(&self) -> Option<Vec<Vec<usize>>> {
        let order = self.topological_order_by_key(|u| u).ok()?;
        let mut level = vec![0usize; self.adj.len()];
        for &u in &order {
            for v in self.successors(u) {
                level[v] = level[v].max(level[u] + 1);
            }
        }
        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut out = vec![Vec::new(); depth];
        for (u, &l) in level.iter().enumerate() {
            out[l].push(u);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(usize, usize)]) -> DiGraph {
        let mut g = DiGraph::new(n);
        for &(u, v) in edges {
            g.add_edge(u, v);
        }
        g
    }

    #[test]
    fn dag_has_no_back_edges() {
        let g = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert!(g.back_edges().is_empty());
        assert!(g.is_acyclic());
    }

    #[test]
    fn three_cycle_gets_one_back_edge() {
        let g = graph(3, &[(0, 1), (1, 2), (2, 0)]);
        assert_eq!(g.back_edges(), vec![(2, 0)]);
    }

    #[test]
    fn removing_back_edges_breaks_all_cycles() {
        let mut g = graph(5, &[(0, 1), (1, 0), (1, 2), (2, 3), (3, 1), (3, 4), (4, 4)]);
        for (u, v) in g.back_edges() {
            assert!(g.remove_edge(u, v));
            assert!(!g.has_edge(u, v));
        }
        assert!(g.has_edge(0, 1));
        assert!(g.is_acyclic());
    }

    #[test]
    fn min_key_tie_break() {
        // 0 and 1 both ready; key prefers 1
        let g = graph(3, &[(0, 2), (1, 2)]);
        let order = g.topological_order_by_key(|u| [5, 3, 0][u]).unwrap();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn cycle_reports_unplaced() {
        let g = graph(4, &[(0, 1), (1, 2), (2, 1)]);
        assert_eq!(g.topological_order_by_key(|u| u), Err(2));
        assert_eq!(g.first_on_cycle(), Some(1));
        assert_eq!(graph(2, &[(0, 1)]).first_on_cycle(), None);
    }

    #[test]
    fn levels_follow_longest_path() {
        let g = graph(4, &[(0, 1), (1, 2), (0, 2), (3, 2)]);
        assert_eq!(g.levels().unwrap(), vec![vec![0, 3], vec![1], vec![2]]);
    }
}
