//! Cell store and dependency graph.
//!
//! Cells live in a vertex arena indexed by `VertexId`; a hash index maps
//! `(SheetId, Coord)` to its vertex. Edges are kept bidirectionally:
//! `dependencies` are the cells a formula reads, `dependents` the mirror
//! image.
//!
//! # Invariants
//!
//! 1. `a ∈ dependencies[b]` iff `b ∈ dependents[a]`.
//! 2. A vertex's `dependencies` equal its cell's recorded dependency set.
//! 3. A dead vertex (no contents, no edges) is absent from the index; the
//!    arena slot is retired, never reused.

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{CellValue, Coord, SheetId};
use tabula_parse::parser::ASTNode;

/// Opaque arena handle for a cell vertex.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u32);

impl VertexId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub(crate) fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// One cell: location, stored contents, parsed formula, current value,
/// and both edge directions.
#[derive(Debug)]
pub struct Vertex {
    pub sheet: SheetId,
    pub coord: Coord,
    /// Raw contents as entered (trimmed); `None` means the cell is empty.
    pub contents: Option<String>,
    /// Parsed formula, kept so re-evaluation never re-parses.
    pub ast: Option<ASTNode>,
    pub value: CellValue,
    pub dependencies: FxHashSet<VertexId>,
    pub dependents: FxHashSet<VertexId>,
}

impl Vertex {
    fn new(sheet: SheetId, coord: Coord) -> Self {
        Self {
            sheet,
            coord,
            contents: None,
            ast: None,
            value: CellValue::Empty,
            dependencies: FxHashSet::default(),
            dependents: FxHashSet::default(),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.contents.is_some()
    }

    /// A vertex with no contents and no edges can leave the index.
    pub fn is_dead(&self) -> bool {
        self.contents.is_none() && self.dependencies.is_empty() && self.dependents.is_empty()
    }
}

#[derive(Default, Debug)]
pub struct DependencyGraph {
    vertices: Vec<Vertex>,
    index: FxHashMap<(SheetId, Coord), VertexId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.as_index()]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.as_index()]
    }

    pub fn lookup(&self, sheet: SheetId, coord: Coord) -> Option<VertexId> {
        self.index.get(&(sheet, coord)).copied()
    }

    /// Find or create the vertex for a cell location.
    pub fn ensure_vertex(&mut self, sheet: SheetId, coord: Coord) -> VertexId {
        if let Some(&id) = self.index.get(&(sheet, coord)) {
            return id;
        }
        let id = VertexId::new(self.vertices.len() as u32);
        self.vertices.push(Vertex::new(sheet, coord));
        self.index.insert((sheet, coord), id);
        id
    }

    /// Atomically replace a vertex's outgoing edges, keeping the reverse
    /// index symmetric.
    pub fn replace_dependencies(&mut self, id: VertexId, new_deps: FxHashSet<VertexId>) {
        let old_deps =
            std::mem::take(&mut self.vertices[id.as_index()].dependencies);
        for dep in &old_deps {
            if !new_deps.contains(dep) {
                self.vertices[dep.as_index()].dependents.remove(&id);
            }
        }
        for dep in &new_deps {
            if !old_deps.contains(dep) {
                self.vertices[dep.as_index()].dependents.insert(id);
            }
        }
        self.vertices[id.as_index()].dependencies = new_deps;
    }

    pub fn clear_dependencies(&mut self, id: VertexId) {
        self.replace_dependencies(id, FxHashSet::default());
    }

    /// Every vertex reachable from the seeds over `dependents` edges,
    /// seeds included. Iterative — dependency chains can be very long.
    pub fn reachable_dependents(&self, seeds: &[VertexId]) -> FxHashSet<VertexId> {
        let mut reachable: FxHashSet<VertexId> = seeds.iter().copied().collect();
        let mut stack: Vec<VertexId> = seeds.to_vec();
        while let Some(id) = stack.pop() {
            for &dep in &self.vertices[id.as_index()].dependents {
                if reachable.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        reachable
    }

    /// All live vertices belonging to a sheet.
    pub fn vertices_in_sheet(&self, sheet: SheetId) -> Vec<VertexId> {
        self.index
            .iter()
            .filter(|((s, _), _)| *s == sheet)
            .map(|(_, &id)| id)
            .collect()
    }

    /// Occupied cells of a sheet as (coordinate, contents) pairs.
    pub fn occupied_in_sheet(&self, sheet: SheetId) -> Vec<(Coord, String)> {
        let mut cells: Vec<(Coord, String)> = self
            .index
            .iter()
            .filter(|((s, _), _)| *s == sheet)
            .filter_map(|(&(_, coord), &id)| {
                self.vertices[id.as_index()]
                    .contents
                    .as_ref()
                    .map(|c| (coord, c.clone()))
            })
            .collect();
        cells.sort_by_key(|(coord, _)| *coord);
        cells
    }

    /// Extent of a sheet: 1-based (max column, max row) over occupied
    /// cells, (0, 0) when the sheet is empty.
    pub fn extent(&self, sheet: SheetId) -> (u32, u32) {
        let mut max_col = 0;
        let mut max_row = 0;
        for ((s, coord), &id) in &self.index {
            if *s == sheet && self.vertices[id.as_index()].is_occupied() {
                max_col = max_col.max(coord.col() + 1);
                max_row = max_row.max(coord.row() + 1);
            }
        }
        (max_col, max_row)
    }

    /// Drop a dead vertex from the index. The arena slot stays retired.
    pub fn prune(&mut self, id: VertexId) {
        let v = &self.vertices[id.as_index()];
        if v.is_dead() {
            self.index.remove(&(v.sheet, v.coord));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(col: u32, row: u32) -> Coord {
        Coord::from_one_based(col, row).unwrap()
    }

    #[test]
    fn ensure_vertex_is_idempotent() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(1, 1));
        assert_eq!(a, b);
        let c = g.ensure_vertex(1, coord(1, 1));
        assert_ne!(a, c);
    }

    #[test]
    fn replace_dependencies_keeps_edges_symmetric() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        let c = g.ensure_vertex(0, coord(3, 1));

        let mut deps = FxHashSet::default();
        deps.insert(b);
        deps.insert(c);
        g.replace_dependencies(a, deps);
        assert!(g.vertex(b).dependents.contains(&a));
        assert!(g.vertex(c).dependents.contains(&a));

        let mut deps = FxHashSet::default();
        deps.insert(b);
        g.replace_dependencies(a, deps);
        assert!(g.vertex(b).dependents.contains(&a));
        assert!(!g.vertex(c).dependents.contains(&a));
        assert_eq!(g.vertex(a).dependencies.len(), 1);
    }

    #[test]
    fn self_edges_are_representable() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let mut deps = FxHashSet::default();
        deps.insert(a);
        g.replace_dependencies(a, deps);
        assert!(g.vertex(a).dependencies.contains(&a));
        assert!(g.vertex(a).dependents.contains(&a));
    }

    #[test]
    fn reachability_over_dependents() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        let b = g.ensure_vertex(0, coord(2, 1));
        let c = g.ensure_vertex(0, coord(3, 1));
        let d = g.ensure_vertex(0, coord(4, 1));
        // b reads a, c reads b; d is unrelated.
        let mut deps = FxHashSet::default();
        deps.insert(a);
        g.replace_dependencies(b, deps);
        let mut deps = FxHashSet::default();
        deps.insert(b);
        g.replace_dependencies(c, deps);

        let reach = g.reachable_dependents(&[a]);
        assert!(reach.contains(&a) && reach.contains(&b) && reach.contains(&c));
        assert!(!reach.contains(&d));
    }

    #[test]
    fn reachability_survives_long_chains() {
        let mut g = DependencyGraph::new();
        let n = 50_000u32;
        let ids: Vec<VertexId> = (0..n)
            .map(|i| g.ensure_vertex(0, coord(1, i + 1)))
            .collect();
        for w in ids.windows(2) {
            let mut deps = FxHashSet::default();
            deps.insert(w[0]);
            g.replace_dependencies(w[1], deps);
        }
        let reach = g.reachable_dependents(&[ids[0]]);
        assert_eq!(reach.len(), n as usize);
    }

    #[test]
    fn extent_tracks_occupied_cells() {
        let mut g = DependencyGraph::new();
        assert_eq!(g.extent(0), (0, 0));
        let a = g.ensure_vertex(0, coord(3, 7));
        g.vertex_mut(a).contents = Some("x".into());
        assert_eq!(g.extent(0), (3, 7));
        // Placeholder vertices do not count toward the extent.
        g.ensure_vertex(0, coord(10, 10));
        assert_eq!(g.extent(0), (3, 7));
    }

    #[test]
    fn prune_removes_dead_vertices_from_index() {
        let mut g = DependencyGraph::new();
        let a = g.ensure_vertex(0, coord(1, 1));
        g.prune(a);
        assert!(g.lookup(0, coord(1, 1)).is_none());
    }
}
