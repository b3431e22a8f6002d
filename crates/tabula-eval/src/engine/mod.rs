//! The recalculation engine: cell store, sheet registry and the batched
//! update transaction.

pub mod graph;
pub mod scheduler;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{CellError, CellErrorKind, CellValue, Coord, SheetId};
use tabula_parse::parser::{parse_formula, ASTNode};

use crate::function::Function;
use crate::interpreter::Interpreter;
use crate::traits::EvaluationContext;
use graph::{DependencyGraph, VertexId};
use scheduler::Scheduler;

/// One entry of a batched content change.
#[derive(Debug, Clone)]
pub struct CellChange {
    pub sheet: SheetId,
    pub coord: Coord,
    pub contents: Option<String>,
}

/// A cell whose value differs from before the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedCell {
    pub sheet: SheetId,
    pub coord: Coord,
}

#[derive(Debug)]
struct SheetInfo {
    display: String,
    exists: bool,
}

/// Name registry for sheets. Ids are stable and never reused; names that
/// are referenced before the sheet exists get a phantom id so the graph
/// can track their dependents.
#[derive(Default, Debug)]
pub struct SheetRegistry {
    by_name: FxHashMap<String, SheetId>,
    info: Vec<SheetInfo>,
}

impl SheetRegistry {
    /// Id under this name, phantom or not.
    pub fn id_of(&self, name: &str) -> Option<SheetId> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    /// Id under this name, but only if the sheet actually exists.
    pub fn existing_id(&self, name: &str) -> Option<SheetId> {
        self.id_of(name).filter(|&id| self.exists(id))
    }

    /// Find or allocate an id for a name (allocations are phantoms).
    pub fn ensure_id(&mut self, name: &str) -> SheetId {
        let key = name.to_lowercase();
        if let Some(&id) = self.by_name.get(&key) {
            return id;
        }
        let id = self.info.len() as SheetId;
        self.info.push(SheetInfo {
            display: name.to_string(),
            exists: false,
        });
        self.by_name.insert(key, id);
        id
    }

    pub fn display(&self, id: SheetId) -> &str {
        &self.info[id as usize].display
    }

    pub fn exists(&self, id: SheetId) -> bool {
        self.info[id as usize].exists
    }

    fn set_display(&mut self, id: SheetId, name: &str) {
        self.info[id as usize].display = name.to_string();
    }

    fn set_exists(&mut self, id: SheetId, exists: bool) {
        self.info[id as usize].exists = exists;
    }

    /// Move a sheet to a new name. The old key is freed; an existing
    /// mapping for the new key (a phantom) is overwritten.
    fn rename(&mut self, id: SheetId, new_name: &str) {
        let old_key = self.info[id as usize].display.to_lowercase();
        self.by_name.remove(&old_key);
        self.by_name.insert(new_name.to_lowercase(), id);
        self.info[id as usize].display = new_name.to_string();
    }
}

/// The computation core. Owns all cells and the dependency graph; every
/// mutation funnels through [`Engine::apply_changes`].
#[derive(Default, Debug)]
pub struct Engine {
    graph: DependencyGraph,
    sheets: SheetRegistry,
}

impl Engine {
    pub fn new() -> Self {
        crate::builtins::ensure_registered();
        Self::default()
    }

    /* ===================  sheet management  =================== */

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.sheets.existing_id(name)
    }

    pub fn display_name(&self, id: SheetId) -> &str {
        self.sheets.display(id)
    }

    pub fn sheet_exists(&self, name: &str) -> bool {
        self.sheets.existing_id(name).is_some()
    }

    /// Bring a sheet into existence, adopting a phantom id if the name
    /// was already referenced. Readers of the name re-evaluate.
    pub fn create_sheet(&mut self, name: &str) -> (SheetId, Vec<ChangedCell>) {
        let id = self.sheets.ensure_id(name);
        self.sheets.set_display(id, name);
        self.sheets.set_exists(id, true);
        let dirty = self.dependents_of_sheet(id);
        let changed = self.apply_changes(Vec::new(), dirty);
        (id, changed)
    }

    /// Remove a sheet. Its cells are cleared; the id stays registered so
    /// dangling references keep tracking the name.
    pub fn delete_sheet(&mut self, id: SheetId) -> Vec<ChangedCell> {
        let vertices = self.graph.vertices_in_sheet(id);
        let dirty = self.dependents_of_sheet(id);
        for &vid in &vertices {
            if self.graph.vertex(vid).is_occupied() {
                self.store_contents(vid, None);
            }
        }
        self.sheets.set_exists(id, false);
        let changed = self.apply_changes(Vec::new(), dirty);
        for vid in vertices {
            self.graph.prune(vid);
        }
        changed
    }

    /// Rename a sheet: re-serialise every formula naming it, adopt
    /// readers of the target name, settle everything in one batch.
    pub fn rename_sheet(&mut self, id: SheetId, new_name: &str) -> Vec<ChangedCell> {
        let old_display = self.sheets.display(id).to_string();

        let mut rewrites: Vec<CellChange> = Vec::new();
        let mut seen: FxHashSet<VertexId> = FxHashSet::default();
        for vid in self.graph.vertices_in_sheet(id) {
            for &reader in &self.graph.vertex(vid).dependents {
                if !seen.insert(reader) {
                    continue;
                }
                let v = self.graph.vertex(reader);
                if let Some(ast) = &v.ast {
                    if ast.references_sheet(&old_display) {
                        let rewritten = ast.with_renamed_sheet(&old_display, new_name);
                        rewrites.push(CellChange {
                            sheet: v.sheet,
                            coord: v.coord,
                            contents: Some(rewritten.to_formula()),
                        });
                    }
                }
            }
        }

        // Cells referencing the new name were #REF! until now.
        let mut dirty: Vec<VertexId> = Vec::new();
        let mut phantom_vertices: Vec<VertexId> = Vec::new();
        if let Some(phantom) = self.sheets.id_of(new_name) {
            if phantom != id && !self.sheets.exists(phantom) {
                phantom_vertices = self.graph.vertices_in_sheet(phantom);
                let mut seen_d: FxHashSet<VertexId> = FxHashSet::default();
                for &vid in &phantom_vertices {
                    for &d in &self.graph.vertex(vid).dependents {
                        if seen_d.insert(d) {
                            dirty.push(d);
                        }
                    }
                }
            }
        }

        self.sheets.rename(id, new_name);
        let changed = self.apply_changes(rewrites, dirty);
        for vid in phantom_vertices {
            self.graph.prune(vid);
        }
        changed
    }

    fn dependents_of_sheet(&self, id: SheetId) -> Vec<VertexId> {
        let mut dirty = Vec::new();
        let mut seen: FxHashSet<VertexId> = FxHashSet::default();
        for vid in self.graph.vertices_in_sheet(id) {
            for &d in &self.graph.vertex(vid).dependents {
                if seen.insert(d) {
                    dirty.push(d);
                }
            }
        }
        dirty
    }

    /* ===================  cell accessors  =================== */

    pub fn cell_contents(&self, sheet: SheetId, coord: Coord) -> Option<&str> {
        self.graph
            .lookup(sheet, coord)
            .and_then(|id| self.graph.vertex(id).contents.as_deref())
    }

    pub fn cell_value(&self, sheet: SheetId, coord: Coord) -> CellValue {
        self.graph
            .lookup(sheet, coord)
            .map(|id| self.graph.vertex(id).value.clone())
            .unwrap_or(CellValue::Empty)
    }

    /// Contents plus parsed formula, for staged rewrites. `None` when the
    /// cell is empty.
    pub fn cell_state(&self, sheet: SheetId, coord: Coord) -> Option<(&str, Option<&ASTNode>)> {
        let id = self.graph.lookup(sheet, coord)?;
        let v = self.graph.vertex(id);
        v.contents.as_deref().map(|c| (c, v.ast.as_ref()))
    }

    pub fn extent(&self, sheet: SheetId) -> (u32, u32) {
        self.graph.extent(sheet)
    }

    pub fn occupied_cells(&self, sheet: SheetId) -> Vec<(Coord, String)> {
        self.graph.occupied_in_sheet(sheet)
    }

    /* ===================  the batch transaction  =================== */

    /// Apply a batch of content changes plus externally-dirtied cells as
    /// one transaction, returning the deduplicated change set in
    /// first-computed order.
    pub fn apply_changes(
        &mut self,
        changes: Vec<CellChange>,
        extra_dirty: Vec<VertexId>,
    ) -> Vec<ChangedCell> {
        let mut snapshot: FxHashMap<VertexId, CellValue> = FxHashMap::default();
        let mut order: Vec<VertexId> = Vec::new();
        let mut order_set: FxHashSet<VertexId> = FxHashSet::default();

        // Store contents first so every directly-changed cell sees the
        // batch's final contents once evaluation begins.
        let mut direct: Vec<VertexId> = Vec::new();
        let mut direct_set: FxHashSet<VertexId> = FxHashSet::default();
        for change in &changes {
            let id = self.graph.ensure_vertex(change.sheet, change.coord);
            snapshot
                .entry(id)
                .or_insert_with(|| self.graph.vertex(id).value.clone());
            self.store_contents(id, change.contents.as_deref());
            if direct_set.insert(id) {
                direct.push(id);
            }
        }
        for id in extra_dirty {
            if direct_set.insert(id) {
                snapshot
                    .entry(id)
                    .or_insert_with(|| self.graph.vertex(id).value.clone());
                direct.push(id);
            }
        }

        // Initial evaluation, batch order: produces each cell's fresh
        // dependency edges.
        for &id in &direct {
            self.evaluate_vertex(id);
            self.note_change(id, &snapshot, &mut order, &mut order_set);
        }

        // Everything downstream of the changes.
        let affected = self.graph.reachable_dependents(&direct);
        for &id in &affected {
            snapshot
                .entry(id)
                .or_insert_with(|| self.graph.vertex(id).value.clone());
        }

        // Cycles settle to #CIRCREF!; their edges stay in place so that
        // breaking the cycle later re-evaluates the members.
        let schedule = Scheduler::new(&self.graph).schedule(&affected);
        for scc in &schedule.cycles {
            for &id in scc {
                self.graph.vertex_mut(id).value =
                    CellValue::Error(CellError::new(CellErrorKind::Circ));
                self.note_change(id, &snapshot, &mut order, &mut order_set);
            }
        }

        // Topological evaluation of the acyclic remainder: every cell
        // reads already-settled inputs.
        for layer in &schedule.layers {
            for &id in layer {
                if self.graph.vertex(id).ast.is_some() {
                    self.evaluate_vertex(id);
                }
                self.note_change(id, &snapshot, &mut order, &mut order_set);
            }
        }

        // Re-evaluation refreshes edges; a flipped branch or INDIRECT can
        // close a cycle the first pass could not see.
        let late = Scheduler::new(&self.graph).schedule(&affected);
        for scc in &late.cycles {
            for &id in scc {
                self.graph.vertex_mut(id).value =
                    CellValue::Error(CellError::new(CellErrorKind::Circ));
                self.note_change(id, &snapshot, &mut order, &mut order_set);
            }
        }

        // Emit exactly the cells whose value differs from before the
        // batch, in the order each first changed.
        let mut out = Vec::new();
        for id in order {
            let v = self.graph.vertex(id);
            let differs = snapshot.get(&id).map_or(true, |old| *old != v.value);
            if differs {
                out.push(ChangedCell {
                    sheet: v.sheet,
                    coord: v.coord,
                });
            }
        }

        for &id in &affected {
            self.graph.prune(id);
        }

        out
    }

    fn note_change(
        &self,
        id: VertexId,
        snapshot: &FxHashMap<VertexId, CellValue>,
        order: &mut Vec<VertexId>,
        order_set: &mut FxHashSet<VertexId>,
    ) {
        if order_set.contains(&id) {
            return;
        }
        let differs = snapshot
            .get(&id)
            .map_or(true, |old| *old != self.graph.vertex(id).value);
        if differs {
            order_set.insert(id);
            order.push(id);
        }
    }

    /// Parse and stage new contents on a vertex. Formula evaluation comes
    /// later; literals and parse failures settle immediately.
    fn store_contents(&mut self, id: VertexId, contents: Option<&str>) {
        let trimmed = contents.map(str::trim).filter(|s| !s.is_empty());
        match trimmed {
            None => {
                let v = self.graph.vertex_mut(id);
                v.contents = None;
                v.ast = None;
                v.value = CellValue::Empty;
                self.graph.clear_dependencies(id);
            }
            Some(text) => {
                let (ast, value) = if let Some(rest) = text.strip_prefix('\'') {
                    (None, CellValue::Text(rest.to_string()))
                } else if text.starts_with('=') {
                    match parse_formula(text) {
                        Ok(ast) => (Some(ast), CellValue::Empty),
                        Err(_) => (
                            None,
                            CellValue::Error(
                                CellError::new(CellErrorKind::Parse)
                                    .with_message("unable to parse formula"),
                            ),
                        ),
                    }
                } else {
                    (None, CellValue::from_literal(text))
                };
                let has_ast = ast.is_some();
                let v = self.graph.vertex_mut(id);
                v.contents = Some(text.to_string());
                v.ast = ast;
                v.value = value;
                if !has_ast {
                    self.graph.clear_dependencies(id);
                }
            }
        }
    }

    /// Evaluate one formula cell against current stored values, then
    /// install its value and refreshed edges. A panicking builtin costs
    /// the cell a `#VALUE!` but never the batch.
    fn evaluate_vertex(&mut self, id: VertexId) {
        let Some(ast) = self.graph.vertex(id).ast.clone() else {
            return;
        };
        let sheet_name = self.sheets.display(self.graph.vertex(id).sheet).to_string();

        let outcome = {
            let ctx: &Engine = &*self;
            catch_unwind(AssertUnwindSafe(|| {
                let interp = Interpreter::new(ctx, &sheet_name);
                let value = interp.evaluate(&ast);
                (value, interp.into_deps())
            }))
        };

        let (value, deps) = match outcome {
            Ok(pair) => pair,
            Err(_) => (
                CellValue::Error(
                    CellError::new(CellErrorKind::Value)
                        .with_message("evaluation failed unexpectedly"),
                ),
                FxHashSet::default(),
            ),
        };
        // A formula that reduces to an empty read settles as zero.
        let value = if matches!(value, CellValue::Empty) {
            CellValue::Number(rust_decimal::Decimal::ZERO)
        } else {
            value
        };

        let mut dep_ids: FxHashSet<VertexId> = FxHashSet::default();
        for dep in deps {
            let sheet_id = self.sheets.ensure_id(&dep.sheet);
            dep_ids.insert(self.graph.ensure_vertex(sheet_id, dep.coord));
        }
        self.graph.replace_dependencies(id, dep_ids);
        self.graph.vertex_mut(id).value = value;
    }
}

impl EvaluationContext for Engine {
    fn resolve_cell(&self, sheet: &str, coord: Coord) -> CellValue {
        match self.sheets.existing_id(sheet) {
            Some(id) => self
                .graph
                .lookup(id, coord)
                .map(|v| self.graph.vertex(v).value.clone())
                .unwrap_or(CellValue::Empty),
            None => CellValue::Error(
                CellError::new(CellErrorKind::Ref).with_message(format!("unknown sheet '{sheet}'")),
            ),
        }
    }

    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        crate::function_registry::get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(loc: &str) -> Coord {
        tabula_parse::parser::CellRef::parse(loc)
            .and_then(|r| r.coord())
            .unwrap()
    }

    fn set(engine: &mut Engine, sheet: SheetId, loc: &str, contents: &str) -> Vec<ChangedCell> {
        engine.apply_changes(
            vec![CellChange {
                sheet,
                coord: coord(loc),
                contents: Some(contents.to_string()),
            }],
            Vec::new(),
        )
    }

    fn value(engine: &Engine, sheet: SheetId, loc: &str) -> CellValue {
        engine.cell_value(sheet, coord(loc))
    }

    fn num(s: &str) -> CellValue {
        CellValue::Number(s.parse().unwrap())
    }

    fn new_engine() -> (Engine, SheetId) {
        let mut engine = Engine::new();
        let (id, _) = engine.create_sheet("Sheet1");
        (engine, id)
    }

    #[test]
    fn dependent_updates_follow_their_input() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "B1", "2");
        set(&mut engine, s, "A1", "=B1+1");
        assert_eq!(value(&engine, s, "A1"), num("3"));

        let changed = set(&mut engine, s, "B1", "10");
        assert_eq!(value(&engine, s, "A1"), num("11"));
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn two_cell_cycle_marks_both_circref() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "B1", "2");
        set(&mut engine, s, "A1", "=B1+1");
        set(&mut engine, s, "B1", "=A1");

        for loc in ["A1", "B1"] {
            let v = value(&engine, s, loc);
            assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Circ, "{loc}");
        }
    }

    #[test]
    fn breaking_a_cycle_restores_values() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=B1");
        set(&mut engine, s, "B1", "=A1");
        assert!(value(&engine, s, "A1").is_error());

        set(&mut engine, s, "B1", "5");
        assert_eq!(value(&engine, s, "A1"), num("5"));
        assert_eq!(value(&engine, s, "B1"), num("5"));
    }

    #[test]
    fn lazy_branch_avoids_false_cycle() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=IF(TRUE, 1, A1)");
        assert_eq!(value(&engine, s, "A1"), num("1"));

        set(&mut engine, s, "A1", "=IF(FALSE, 1, A1)");
        let v = value(&engine, s, "A1");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Circ);
    }

    #[test]
    fn indirect_self_reference_is_a_cycle() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=INDIRECT(\"A1\")");
        let v = value(&engine, s, "A1");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Circ);
    }

    #[test]
    fn error_propagation_through_dependents() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=1/0");
        set(&mut engine, s, "B1", "=A1+2");
        set(&mut engine, s, "C1", "=ISERROR(A1)");

        assert_eq!(
            value(&engine, s, "A1").as_error().unwrap().kind,
            CellErrorKind::Div
        );
        assert_eq!(
            value(&engine, s, "B1").as_error().unwrap().kind,
            CellErrorKind::Div
        );
        assert_eq!(value(&engine, s, "C1"), CellValue::Boolean(true));
    }

    #[test]
    fn idempotent_set_emits_no_changes() {
        let (mut engine, s) = new_engine();
        let first = set(&mut engine, s, "A1", "42");
        assert_eq!(first.len(), 1);
        let second = set(&mut engine, s, "A1", "42");
        assert!(second.is_empty());
    }

    #[test]
    fn reference_to_missing_sheet_resolves_after_creation() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=Later!B1+1");
        assert_eq!(
            value(&engine, s, "A1").as_error().unwrap().kind,
            CellErrorKind::Ref
        );

        let (later, changed) = engine.create_sheet("Later");
        assert_eq!(changed.len(), 1);
        assert_eq!(value(&engine, s, "A1"), num("1"));

        set(&mut engine, later, "B1", "41");
        assert_eq!(value(&engine, s, "A1"), num("42"));
    }

    #[test]
    fn deleting_a_sheet_breaks_references() {
        let (mut engine, s) = new_engine();
        let (other, _) = engine.create_sheet("Other");
        set(&mut engine, other, "B1", "5");
        set(&mut engine, s, "A1", "=Other!B1");
        assert_eq!(value(&engine, s, "A1"), num("5"));

        let changed = engine.delete_sheet(other);
        assert_eq!(changed.len(), 1);
        assert_eq!(
            value(&engine, s, "A1").as_error().unwrap().kind,
            CellErrorKind::Ref
        );
    }

    #[test]
    fn rename_rewrites_referencing_formulas() {
        let (mut engine, s) = new_engine();
        let (data, _) = engine.create_sheet("Data");
        set(&mut engine, data, "A1", "7");
        set(&mut engine, s, "A1", "=Data!A1*2");

        let changed = engine.rename_sheet(data, "My Data");
        // Value is unchanged, so the batch reports nothing.
        assert!(changed.is_empty());
        assert_eq!(
            engine.cell_contents(s, coord("A1")),
            Some("='My Data'!A1*2")
        );
        assert_eq!(value(&engine, s, "A1"), num("14"));
    }

    #[test]
    fn rename_adopts_readers_of_the_new_name() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "='My Data'!A1+1");
        assert_eq!(
            value(&engine, s, "A1").as_error().unwrap().kind,
            CellErrorKind::Ref
        );

        let (data, _) = engine.create_sheet("Data");
        set(&mut engine, data, "A1", "9");
        let changed = engine.rename_sheet(data, "My Data");
        assert_eq!(changed.len(), 1);
        assert_eq!(value(&engine, s, "A1"), num("10"));
    }

    #[test]
    fn long_chain_recomputes_in_topological_order() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "1");
        let mut batch = Vec::new();
        for row in 2..=2_000u32 {
            batch.push(CellChange {
                sheet: s,
                coord: Coord::from_one_based(1, row).unwrap(),
                contents: Some(format!("=A{}+1", row - 1)),
            });
        }
        engine.apply_changes(batch, Vec::new());
        assert_eq!(value(&engine, s, "A2000"), num("2000"));

        let changed = set(&mut engine, s, "A1", "100");
        assert_eq!(changed.len(), 2_000);
        assert_eq!(value(&engine, s, "A2000"), num("2099"));
    }

    #[test]
    fn parse_failure_settles_to_parse_error() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "=1+");
        assert_eq!(
            value(&engine, s, "A1").as_error().unwrap().kind,
            CellErrorKind::Parse
        );
        assert_eq!(engine.cell_contents(s, coord("A1")), Some("=1+"));
    }

    #[test]
    fn clearing_a_cell_empties_it() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "3");
        set(&mut engine, s, "B1", "=A1");
        let changed = engine.apply_changes(
            vec![CellChange {
                sheet: s,
                coord: coord("A1"),
                contents: None,
            }],
            Vec::new(),
        );
        assert_eq!(changed.len(), 2);
        assert_eq!(value(&engine, s, "A1"), CellValue::Empty);
        assert_eq!(value(&engine, s, "B1"), num("0"));
    }

    #[test]
    fn batch_order_is_irrelevant_for_final_values() {
        let (mut engine, s) = new_engine();
        engine.apply_changes(
            vec![
                CellChange {
                    sheet: s,
                    coord: coord("A1"),
                    contents: Some("=B1*2".into()),
                },
                CellChange {
                    sheet: s,
                    coord: coord("B1"),
                    contents: Some("=C1+1".into()),
                },
                CellChange {
                    sheet: s,
                    coord: coord("C1"),
                    contents: Some("4".into()),
                },
            ],
            Vec::new(),
        );
        assert_eq!(value(&engine, s, "A1"), num("10"));
        assert_eq!(value(&engine, s, "B1"), num("5"));
    }

    #[test]
    fn apostrophe_prefix_forces_text() {
        let (mut engine, s) = new_engine();
        set(&mut engine, s, "A1", "'123");
        assert_eq!(value(&engine, s, "A1"), CellValue::Text("123".into()));
        assert_eq!(engine.cell_contents(s, coord("A1")), Some("'123"));
    }
}
