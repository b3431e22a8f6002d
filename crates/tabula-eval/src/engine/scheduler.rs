//! Recomputation ordering: strongly connected components plus
//! topological layering of the acyclic remainder.
//!
//! Tarjan's algorithm runs with an explicit frame stack — dependency
//! cycles tens of thousands of cells long are realistic and must not
//! exhaust the thread stack.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use super::graph::{DependencyGraph, VertexId};

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

/// The plan for one batch: evaluation layers over the acyclic vertices,
/// plus every non-trivial SCC (size > 1, or a singleton with a
/// self-edge).
#[derive(Debug)]
pub struct Schedule {
    pub layers: Vec<Vec<VertexId>>,
    pub cycles: Vec<Vec<VertexId>>,
}

struct DfsFrame {
    vertex: VertexId,
    neighbours: Vec<VertexId>,
    next: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn schedule(&self, vertices: &FxHashSet<VertexId>) -> Schedule {
        let sccs = self.tarjan_scc(vertices);
        let (cycles, acyclic) = self.separate_cycles(sccs);
        let layers = self.build_layers(&acyclic);
        Schedule { layers, cycles }
    }

    /// Strongly connected components of the subgraph induced by
    /// `vertices`, following `dependencies` edges.
    pub fn tarjan_scc(&self, vertices: &FxHashSet<VertexId>) -> Vec<Vec<VertexId>> {
        let mut roots: Vec<VertexId> = vertices.iter().copied().collect();
        roots.sort();

        let mut index_counter: u32 = 0;
        let mut indices: FxHashMap<VertexId, u32> = FxHashMap::default();
        let mut lowlinks: FxHashMap<VertexId, u32> = FxHashMap::default();
        let mut stack: Vec<VertexId> = Vec::new();
        let mut on_stack: FxHashSet<VertexId> = FxHashSet::default();
        let mut sccs: Vec<Vec<VertexId>> = Vec::new();

        let neighbours = |v: VertexId| -> Vec<VertexId> {
            let mut out: Vec<VertexId> = self
                .graph
                .vertex(v)
                .dependencies
                .iter()
                .copied()
                .filter(|d| vertices.contains(d))
                .collect();
            out.sort();
            out
        };

        for &root in &roots {
            if indices.contains_key(&root) {
                continue;
            }

            let mut dfs_stack: Vec<DfsFrame> = Vec::new();

            indices.insert(root, index_counter);
            lowlinks.insert(root, index_counter);
            index_counter += 1;
            stack.push(root);
            on_stack.insert(root);
            dfs_stack.push(DfsFrame {
                vertex: root,
                neighbours: neighbours(root),
                next: 0,
            });

            while let Some(frame) = dfs_stack.last_mut() {
                if frame.next < frame.neighbours.len() {
                    let w = frame.neighbours[frame.next];
                    frame.next += 1;

                    if !indices.contains_key(&w) {
                        indices.insert(w, index_counter);
                        lowlinks.insert(w, index_counter);
                        index_counter += 1;
                        stack.push(w);
                        on_stack.insert(w);
                        dfs_stack.push(DfsFrame {
                            vertex: w,
                            neighbours: neighbours(w),
                            next: 0,
                        });
                    } else if on_stack.contains(&w) {
                        let w_idx = indices[&w];
                        let v_low = lowlinks.get_mut(&frame.vertex).unwrap();
                        if w_idx < *v_low {
                            *v_low = w_idx;
                        }
                    }
                } else {
                    let finished = dfs_stack.pop().unwrap();
                    let v = finished.vertex;
                    let v_low = lowlinks[&v];

                    if let Some(parent) = dfs_stack.last() {
                        let parent_low = lowlinks.get_mut(&parent.vertex).unwrap();
                        if v_low < *parent_low {
                            *parent_low = v_low;
                        }
                    }

                    if v_low == indices[&v] {
                        let mut scc = Vec::new();
                        loop {
                            let w = stack.pop().unwrap();
                            on_stack.remove(&w);
                            scc.push(w);
                            if w == v {
                                break;
                            }
                        }
                        sccs.push(scc);
                    }
                }
            }
        }

        sccs
    }

    fn separate_cycles(
        &self,
        sccs: Vec<Vec<VertexId>>,
    ) -> (Vec<Vec<VertexId>>, Vec<VertexId>) {
        let mut cycles = Vec::new();
        let mut acyclic = Vec::new();

        for scc in sccs {
            if scc.len() > 1 || (scc.len() == 1 && self.has_self_edge(scc[0])) {
                cycles.push(scc);
            } else {
                acyclic.push(scc[0]);
            }
        }

        (cycles, acyclic)
    }

    fn has_self_edge(&self, vertex: VertexId) -> bool {
        self.graph.vertex(vertex).dependencies.contains(&vertex)
    }

    /// Kahn layering over the acyclic vertices. Edges into cycle members
    /// or outside the set are ignored: cycle members are settled to
    /// `#CIRCREF!` before any layer evaluates.
    fn build_layers(&self, vertices: &[VertexId]) -> Vec<Vec<VertexId>> {
        if vertices.is_empty() {
            return Vec::new();
        }
        let vertex_set: FxHashSet<VertexId> = vertices.iter().copied().collect();

        let mut in_degrees: FxHashMap<VertexId, usize> =
            vertices.iter().map(|&v| (v, 0)).collect();
        for &v in vertices {
            for dep in &self.graph.vertex(v).dependencies {
                if vertex_set.contains(dep) {
                    *in_degrees.get_mut(&v).unwrap() += 1;
                }
            }
        }

        let mut queue: VecDeque<VertexId> = in_degrees
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&v, _)| v)
            .collect();

        let mut layers = Vec::new();
        while !queue.is_empty() {
            let mut layer = Vec::with_capacity(queue.len());
            for _ in 0..queue.len() {
                let v = queue.pop_front().unwrap();
                layer.push(v);
                for &dependent in &self.graph.vertex(v).dependents {
                    if let Some(deg) = in_degrees.get_mut(&dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
            layer.sort();
            layers.push(layer);
        }

        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_common::Coord;

    fn coord(col: u32, row: u32) -> Coord {
        Coord::from_one_based(col, row).unwrap()
    }

    fn link(graph: &mut DependencyGraph, from: VertexId, to: &[VertexId]) {
        let deps: FxHashSet<VertexId> = to.iter().copied().collect();
        graph.replace_dependencies(from, deps);
    }

    #[test]
    fn chain_layers_in_dependency_order() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        let c = g.ensure_vertex(0, coord(3, 1));
        link(&mut g, b, &[a]);
        link(&mut g, c, &[b]);

        let set: FxHashSet<VertexId> = [a, b, c].into_iter().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert!(schedule.cycles.is_empty());
        assert_eq!(schedule.layers, vec![vec![a], vec![b], vec![c]]);
    }

    #[test]
    fn two_cell_cycle_is_reported() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        link(&mut g, a, &[b]);
        link(&mut g, b, &[a]);

        let set: FxHashSet<VertexId> = [a, b].into_iter().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert_eq!(schedule.cycles.len(), 1);
        assert_eq!(schedule.cycles[0].len(), 2);
        assert!(schedule.layers.is_empty());
    }

    #[test]
    fn self_edge_counts_as_cycle() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        link(&mut g, a, &[a]);

        let set: FxHashSet<VertexId> = [a].into_iter().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert_eq!(schedule.cycles.len(), 1);
        assert_eq!(schedule.cycles[0], vec![a]);
    }

    #[test]
    fn cycle_dependents_still_get_layered() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        let c = g.ensure_vertex(0, coord(3, 1));
        link(&mut g, a, &[b]);
        link(&mut g, b, &[a]);
        link(&mut g, c, &[a]);

        let set: FxHashSet<VertexId> = [a, b, c].into_iter().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert_eq!(schedule.cycles.len(), 1);
        assert_eq!(schedule.layers, vec![vec![c]]);
    }

    #[test]
    fn edges_outside_the_set_are_ignored() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        link(&mut g, b, &[a]);

        let set: FxHashSet<VertexId> = [b].into_iter().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert_eq!(schedule.layers, vec![vec![b]]);
    }

    #[test]
    fn deep_cycle_does_not_overflow_the_stack() {
        let mut g = DependencyGraph::new();
        let n = 30_000u32;
        let ids: Vec<VertexId> = (0..n)
            .map(|i| g.ensure_vertex(0, coord(1, i + 1)))
            .collect();
        for i in 0..n as usize {
            let next = ids[(i + 1) % n as usize];
            link(&mut g, ids[i], &[next]);
        }
        let set: FxHashSet<VertexId> = ids.iter().copied().collect();
        let schedule = Scheduler::new(&g).schedule(&set);
        assert_eq!(schedule.cycles.len(), 1);
        assert_eq!(schedule.cycles[0].len(), n as usize);
    }
}
