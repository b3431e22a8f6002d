//! JSON persistence.
//!
//! Shape: `{"sheets": [{"name": …, "cell-contents": {"A1": …, …}}, …]}`.
//! Only non-empty cells are stored, as their exact input strings. Loading
//! replays the document through the normal API, one batch per sheet.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::WorkbookError;
use crate::workbook::Workbook;

#[derive(Serialize, Deserialize)]
struct WorkbookFile {
    sheets: Vec<SheetFile>,
}

#[derive(Serialize, Deserialize)]
struct SheetFile {
    name: String,
    #[serde(rename = "cell-contents")]
    cell_contents: BTreeMap<String, String>,
}

impl Workbook {
    /// Serialise the workbook to a writer as JSON.
    pub fn save_workbook<W: Write>(&self, writer: W) -> Result<(), WorkbookError> {
        let sheets = self
            .order
            .iter()
            .map(|&id| SheetFile {
                name: self.engine.display_name(id).to_string(),
                cell_contents: self
                    .engine
                    .occupied_cells(id)
                    .into_iter()
                    .map(|(coord, contents)| (coord.to_a1(), contents))
                    .collect(),
            })
            .collect();
        serde_json::to_writer(writer, &WorkbookFile { sheets })?;
        Ok(())
    }

    /// Build a workbook from serialised JSON. Malformed documents,
    /// duplicate sheet names and bad cell locations fail the load; the
    /// result is equivalent to issuing the same calls by hand.
    pub fn load_workbook<R: Read>(reader: R) -> Result<Workbook, WorkbookError> {
        let file: WorkbookFile = serde_json::from_reader(reader)?;
        let mut workbook = Workbook::new();
        for sheet in file.sheets {
            workbook.new_sheet(Some(&sheet.name))?;
            let cells: Vec<(String, Option<String>)> = sheet
                .cell_contents
                .into_iter()
                .map(|(location, contents)| (location, Some(contents)))
                .collect();
            workbook.set_cell_contents_batch(&sheet.name, &cells)?;
        }
        Ok(workbook)
    }
}
