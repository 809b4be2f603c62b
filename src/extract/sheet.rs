//! Spreadsheet extraction via calamine.

use calamine::{open_workbook_auto, Reader};
use std::path::Path;

use super::{truncate_to_budget, TextExtractor};
use crate::error::{PipelineError, Result};

/// Rows read per sheet; enough for summarization without slurping huge
/// exports.
const MAX_ROWS_PER_SHEET: usize = 100;

pub struct SheetExtractor;

impl TextExtractor for SheetExtractor {
    fn extract(&self, path: &Path, budget: usize) -> Result<String> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| PipelineError::corrupt(format!("cannot open {}: {e}", path.display())))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let mut out = String::new();

        for name in sheet_names {
            let Ok(range) = workbook.worksheet_range(&name) else {
                continue;
            };

            let mut rows_written = 0;
            let mut sheet_text = format!("[Sheet: {name}]\n");
            for row in range.rows().take(MAX_ROWS_PER_SHEET) {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                if cells.iter().all(|c| c.trim().is_empty()) {
                    continue;
                }
                sheet_text.push_str(&cells.join(" | "));
                sheet_text.push('\n');
                rows_written += 1;
            }

            if rows_written > 0 {
                out.push_str(&sheet_text);
                out.push('\n');
            }
            if out.len() > budget {
                break;
            }
        }

        Ok(truncate_to_budget(out, budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_invalid_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.xlsx");
        std::fs::write(&path, b"definitely not a workbook").unwrap();
        let err = SheetExtractor.extract(&path, 1024).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Corrupt);
    }
}
