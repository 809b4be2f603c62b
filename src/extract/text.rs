//! Plain-text extraction with lossy decoding.

use std::io::Read;
use std::path::Path;

use super::{truncate_to_budget, TextExtractor};
use crate::error::{PipelineError, Result};

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, budget: usize) -> Result<String> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| PipelineError::io(format!("cannot open {}: {e}", path.display())))?;

        // Read a little past the budget so multi-byte sequences at the cut
        // decode before truncation.
        let mut raw = Vec::with_capacity(budget.min(1 << 20));
        let mut limited = std::io::Read::take(&mut file, budget as u64 + 8);
        limited
            .read_to_end(&mut raw)
            .map_err(|e| PipelineError::io(format!("cannot read {}: {e}", path.display())))?;

        if raw.iter().take(4096).filter(|&&b| b == 0).count() > 8 {
            return Err(PipelineError::corrupt(format!(
                "{} looks like binary data, not text",
                path.display()
            )));
        }

        let text = String::from_utf8_lossy(&raw).into_owned();
        Ok(truncate_to_budget(text, budget))
    }
}
