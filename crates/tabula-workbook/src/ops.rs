//! Bulk cell operations: move, copy and sort.
//!
//! All three stage the complete set of (target, rewritten contents)
//! pairs before writing anything, so overlapping source and target
//! regions behave, then settle in a single engine batch.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;
use tabula_common::{CellValue, Coord, SheetId, MAX_COL, MAX_ROW};
use tabula_eval::engine::CellChange;

use crate::error::WorkbookError;
use crate::workbook::{parse_location, Workbook};

impl Workbook {
    /// Move a rectangular region. Relative references in moved formulas
    /// shift by the displacement; source cells outside the target
    /// rectangle are cleared.
    pub fn move_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.transfer_cells(
            sheet_name,
            start_location,
            end_location,
            to_location,
            to_sheet,
            true,
        )
    }

    /// Copy a rectangular region; the source is left untouched.
    pub fn copy_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.transfer_cells(
            sheet_name,
            start_location,
            end_location,
            to_location,
            to_sheet,
            false,
        )
    }

    fn transfer_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
        is_move: bool,
    ) -> Result<(), WorkbookError> {
        let src_id = self.resolve_sheet(sheet_name)?;
        let dst_id = match to_sheet {
            Some(name) => self.resolve_sheet(name)?,
            None => src_id,
        };

        let a = parse_location(start_location)?;
        let b = parse_location(end_location)?;
        let to = parse_location(to_location)?;
        let (tl, br) = normalize_corners(a, b);

        let dcol = to.col() as i64 - tl.col() as i64;
        let drow = to.row() as i64 - tl.row() as i64;

        // The whole target rectangle must fit before anything is written.
        let target_max_col = br.col() as i64 + dcol;
        let target_max_row = br.row() as i64 + drow;
        if target_max_col >= MAX_COL as i64 || target_max_row >= MAX_ROW as i64 {
            return Err(WorkbookError::TargetOutOfBounds);
        }

        let mut batch: Vec<CellChange> = Vec::new();

        if is_move {
            // Clears go first so an overlapping target write wins.
            for coord in rect_coords(tl, br) {
                let inside_target = dst_id == src_id && in_rect(coord, tl, br, dcol, drow);
                if !inside_target && self.engine.cell_state(src_id, coord).is_some() {
                    batch.push(CellChange {
                        sheet: src_id,
                        coord,
                        contents: None,
                    });
                }
            }
        }

        for coord in rect_coords(tl, br) {
            let target = shift_coord(coord, dcol, drow);
            let contents = self.rewritten_contents(src_id, coord, dcol, drow);
            if contents.is_some() || self.engine.cell_state(dst_id, target).is_some() {
                batch.push(CellChange {
                    sheet: dst_id,
                    coord: target,
                    contents,
                });
            }
        }

        let changed = self.engine.apply_changes(batch, Vec::new());
        self.notify(changed);
        Ok(())
    }

    /// Sort the rows of a region by one or more key columns.
    ///
    /// `sort_cols` holds 1-based column offsets within the region; a
    /// negative entry sorts that key descending. The sort is stable.
    pub fn sort_region(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        sort_cols: &[i32],
    ) -> Result<(), WorkbookError> {
        let id = self.resolve_sheet(sheet_name)?;
        let a = parse_location(start_location)?;
        let b = parse_location(end_location)?;
        let (tl, br) = normalize_corners(a, b);

        let width = br.col() - tl.col() + 1;
        let height = (br.row() - tl.row() + 1) as usize;
        validate_sort_cols(sort_cols, width)?;

        // Key values per row, in key order.
        let row_keys: Vec<Vec<CellValue>> = (0..height)
            .map(|r| {
                sort_cols
                    .iter()
                    .map(|&k| {
                        let col = tl.col() + k.unsigned_abs() - 1;
                        self.engine
                            .cell_value(id, Coord::new(tl.row() + r as u32, col))
                    })
                    .collect()
            })
            .collect();

        // Stable sort: equal rows keep their original order.
        let mut order: Vec<usize> = (0..height).collect();
        order.sort_by(|&x, &y| {
            for (i, &k) in sort_cols.iter().enumerate() {
                let mut ord = row_keys[x][i].sort_ordering(&row_keys[y][i]);
                if k < 0 {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let mut batch: Vec<CellChange> = Vec::new();
        for (dest, &src) in order.iter().enumerate() {
            if src == dest {
                continue;
            }
            let drow = dest as i64 - src as i64;
            for c in 0..width {
                let src_coord = Coord::new(tl.row() + src as u32, tl.col() + c);
                let dst_coord = Coord::new(tl.row() + dest as u32, tl.col() + c);
                let contents = self.rewritten_contents(id, src_coord, 0, drow);
                if contents.is_some() || self.engine.cell_state(id, dst_coord).is_some() {
                    batch.push(CellChange {
                        sheet: id,
                        coord: dst_coord,
                        contents,
                    });
                }
            }
        }

        let changed = self.engine.apply_changes(batch, Vec::new());
        self.notify(changed);
        Ok(())
    }

    /// Contents a cell would carry after moving by the given deltas:
    /// parsed formulas shift their relative references; literals and
    /// unparsable formulas travel verbatim.
    fn rewritten_contents(&self, sheet: SheetId, coord: Coord, dcol: i64, drow: i64) -> Option<String> {
        let (contents, ast) = self.engine.cell_state(sheet, coord)?;
        match ast {
            Some(ast) if dcol != 0 || drow != 0 => Some(ast.shifted(dcol, drow).to_formula()),
            _ => Some(contents.to_string()),
        }
    }
}

fn normalize_corners(a: Coord, b: Coord) -> (Coord, Coord) {
    let tl = Coord::new(a.row().min(b.row()), a.col().min(b.col()));
    let br = Coord::new(a.row().max(b.row()), a.col().max(b.col()));
    (tl, br)
}

fn rect_coords(tl: Coord, br: Coord) -> impl Iterator<Item = Coord> {
    (tl.row()..=br.row()).flat_map(move |r| (tl.col()..=br.col()).map(move |c| Coord::new(r, c)))
}

fn shift_coord(coord: Coord, dcol: i64, drow: i64) -> Coord {
    Coord::new(
        (coord.row() as i64 + drow) as u32,
        (coord.col() as i64 + dcol) as u32,
    )
}

/// Is `coord` inside the rectangle (tl..=br) displaced by the deltas?
fn in_rect(coord: Coord, tl: Coord, br: Coord, dcol: i64, drow: i64) -> bool {
    let row = coord.row() as i64;
    let col = coord.col() as i64;
    row >= tl.row() as i64 + drow
        && row <= br.row() as i64 + drow
        && col >= tl.col() as i64 + dcol
        && col <= br.col() as i64 + dcol
}

fn validate_sort_cols(sort_cols: &[i32], width: u32) -> Result<(), WorkbookError> {
    if sort_cols.is_empty() {
        return Err(WorkbookError::InvalidSortSpec(
            "at least one column is required".to_string(),
        ));
    }
    let mut seen: FxHashSet<u32> = FxHashSet::default();
    for &k in sort_cols {
        if k == 0 {
            return Err(WorkbookError::InvalidSortSpec(
                "column index 0 is not allowed".to_string(),
            ));
        }
        let offset = k.unsigned_abs();
        if offset > width {
            return Err(WorkbookError::InvalidSortSpec(format!(
                "column {k} is outside the region"
            )));
        }
        if !seen.insert(offset) {
            return Err(WorkbookError::InvalidSortSpec(format!(
                "column {} specified twice",
                offset
            )));
        }
    }
    Ok(())
}
