//! The workbook facade: named sheets over the recalculation engine.
//!
//! Sheet name matching is case-insensitive everywhere; the case given at
//! creation is preserved for display. Every mutating call funnels through
//! the engine's batch transaction and ends with one observer dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tabula_common::{CellValue, Coord, SheetId};
use tabula_eval::engine::{CellChange, ChangedCell, Engine};
use tabula_parse::parser::CellRef;

use crate::error::WorkbookError;

/// Characters allowed in sheet names besides letters, digits and spaces.
const SHEET_NAME_PUNCTUATION: &str = ".?!,:;@#$%^&*()-_";

/// A change observer: receives (sheet name, cell location) pairs.
pub type ChangeObserver = Box<dyn FnMut(&[(String, String)])>;

pub struct Workbook {
    pub(crate) engine: Engine,
    pub(crate) order: Vec<SheetId>,
    observers: Vec<ChangeObserver>,
}

impl std::fmt::Debug for Workbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbook")
            .field("engine", &self.engine)
            .field("order", &self.order)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// A new workbook with no sheets.
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
            order: Vec::new(),
            observers: Vec::new(),
        }
    }

    /* ===================  sheets  =================== */

    /// Sheet names in workbook order, with creation-time capitalisation.
    pub fn list_sheets(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&id| self.engine.display_name(id).to_string())
            .collect()
    }

    pub fn num_sheets(&self) -> usize {
        self.order.len()
    }

    /// Add a sheet. With `None`, a free `Sheet{N}` name is generated.
    /// Returns the new sheet's 0-based index and its name.
    pub fn new_sheet(&mut self, sheet_name: Option<&str>) -> Result<(usize, String), WorkbookError> {
        let name = match sheet_name {
            Some(name) => {
                validate_sheet_name(name)?;
                if self.engine.sheet_exists(name) {
                    return Err(WorkbookError::DuplicateSheetName(name.to_string()));
                }
                name.to_string()
            }
            None => {
                let mut n = 1usize;
                loop {
                    let candidate = format!("Sheet{n}");
                    if !self.engine.sheet_exists(&candidate) {
                        break candidate;
                    }
                    n += 1;
                }
            }
        };

        let (id, changed) = self.engine.create_sheet(&name);
        self.order.push(id);
        self.notify(changed);
        Ok((self.order.len() - 1, name))
    }

    /// Remove a sheet; formulas referencing it turn into `#REF!`.
    pub fn del_sheet(&mut self, sheet_name: &str) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let changed = self.engine.delete_sheet(id);
        self.order.retain(|&s| s != id);
        self.notify(changed);
        Ok(())
    }

    /// Rename a sheet, rewriting every formula that references it. Values
    /// are preserved; only contents change.
    pub fn rename_sheet(&mut self, sheet_name: &str, new_name: &str) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        validate_sheet_name(new_name)?;
        if self.engine.sheet_exists(new_name) {
            return Err(WorkbookError::DuplicateSheetName(new_name.to_string()));
        }
        let changed = self.engine.rename_sheet(id, new_name);
        self.notify(changed);
        Ok(())
    }

    /// Move a sheet to the given position in the workbook order.
    pub fn move_sheet(&mut self, sheet_name: &str, index: usize) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        if index >= self.order.len() {
            return Err(WorkbookError::IndexOutOfRange(index));
        }
        self.order.retain(|&s| s != id);
        self.order.insert(index, id);
        Ok(())
    }

    /// Duplicate a sheet under a generated `{name}_{N}` name, appended at
    /// the end of the workbook order.
    pub fn copy_sheet(&mut self, sheet_name: &str) -> Result<(usize, String), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let base = self.engine.display_name(id).to_string();

        let mut n = 1usize;
        let copy_name = loop {
            let candidate = format!("{base}_{n}");
            if !self.engine.sheet_exists(&candidate) {
                break candidate;
            }
            n += 1;
        };

        let cells = self.engine.occupied_cells(id);
        let (index, copy_name) = self.new_sheet(Some(&copy_name))?;
        let copy_id = self.order[index];
        let batch: Vec<CellChange> = cells
            .into_iter()
            .map(|(coord, contents)| CellChange {
                sheet: copy_id,
                coord,
                contents: Some(contents),
            })
            .collect();
        let changed = self.engine.apply_changes(batch, Vec::new());
        self.notify(changed);
        Ok((index, copy_name))
    }

    /// Current extent of a sheet: 1-based (columns, rows), (0, 0) for an
    /// empty sheet.
    pub fn get_sheet_extent(&self, sheet_name: &str) -> Result<(u32, u32), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        Ok(self.engine.extent(id))
    }

    /* ===================  cells  =================== */

    /// Set one cell's contents. `None`, empty or all-whitespace contents
    /// clear the cell.
    pub fn set_cell_contents(
        &mut self,
        sheet_name: &str,
        location: &str,
        contents: Option<&str>,
    ) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let coord = parse_location(location)?;
        let changed = self.engine.apply_changes(
            vec![CellChange {
                sheet: id,
                coord,
                contents: contents.map(str::to_string),
            }],
            Vec::new(),
        );
        self.notify(changed);
        Ok(())
    }

    /// Set many cells of one sheet as a single transaction.
    pub fn set_cell_contents_batch(
        &mut self,
        sheet_name: &str,
        cells: &[(String, Option<String>)],
    ) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        // Validate every location before mutating anything.
        let mut batch = Vec::with_capacity(cells.len());
        for (location, contents) in cells {
            batch.push(CellChange {
                sheet: id,
                coord: parse_location(location)?,
                contents: contents.clone(),
            });
        }
        let changed = self.engine.apply_changes(batch, Vec::new());
        self.notify(changed);
        Ok(())
    }

    /// Raw contents of a cell, `None` when empty. Never a zero-length
    /// string; surrounding whitespace was stripped on entry.
    pub fn get_cell_contents(
        &self,
        sheet_name: &str,
        location: &str,
    ) -> Result<Option<String>, WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let coord = parse_location(location)?;
        Ok(self.engine.cell_contents(id, coord).map(str::to_string))
    }

    /// Computed value of a cell; empty cells are `CellValue::Empty`.
    pub fn get_cell_value(
        &self,
        sheet_name: &str,
        location: &str,
    ) -> Result<CellValue, WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let coord = parse_location(location)?;
        Ok(self.engine.cell_value(id, coord))
    }

    /* ===================  observers  =================== */

    /// Register a change observer. Observers fire in registration order
    /// after each settled batch; registering one twice delivers twice.
    pub fn notify_cells_changed<F>(&mut self, observer: F)
    where
        F: FnMut(&[(String, String)]) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub(crate) fn notify(&mut self, changed: Vec<ChangedCell>) {
        if changed.is_empty() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(cells = changed.len(), "change batch settled");
        if self.observers.is_empty() {
            return;
        }
        let payload: Vec<(String, String)> = changed
            .iter()
            .map(|c| {
                (
                    self.engine.display_name(c.sheet).to_string(),
                    c.coord.to_a1(),
                )
            })
            .collect();
        for observer in &mut self.observers {
            // A misbehaving observer must not corrupt engine state or
            // starve the observers after it.
            let _ = catch_unwind(AssertUnwindSafe(|| observer(&payload)));
        }
    }

    /* ===================  shared helpers  =================== */

    pub(crate) fn resolve_sheet(&self, name: &str) -> Result<SheetId, WorkbookError> {
        self.engine
            .sheet_id(name)
            .ok_or_else(|| WorkbookError::UnknownSheet(name.to_string()))
    }
}

/// Parse an `A1`-style location (optional `$` anchors, any case) into a
/// grid coordinate.
pub(crate) fn parse_location(location: &str) -> Result<Coord, WorkbookError> {
    CellRef::parse(location.trim())
        .filter(CellRef::in_bounds)
        .and_then(|r| r.coord())
        .ok_or_else(|| WorkbookError::InvalidLocation(location.to_string()))
}

fn validate_sheet_name(name: &str) -> Result<(), WorkbookError> {
    if name.is_empty() {
        return Err(WorkbookError::InvalidSheetName(
            "cannot be an empty string".to_string(),
        ));
    }
    if name != name.trim() {
        return Err(WorkbookError::InvalidSheetName(
            "cannot start or end with whitespace".to_string(),
        ));
    }
    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || c == ' ' || SHEET_NAME_PUNCTUATION.contains(c)) {
            return Err(WorkbookError::InvalidSheetName(format!(
                "character '{c}' is not allowed"
            )));
        }
    }
    Ok(())
}
