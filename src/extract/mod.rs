//! Text extraction, polymorphic over file formats.
//!
//! Every extractor takes a path and a byte budget and yields UTF-8 text no
//! longer than the budget. Binary categories yield empty text; unknown
//! extensions route to the generic binary extractor.

mod office;
mod pdf;
mod sheet;
mod text;

use std::path::Path;

use crate::error::Result;

pub use office::OfficeExtractor;
pub use pdf::PdfExtractor;
pub use sheet::SheetExtractor;
pub use text::PlainTextExtractor;

pub trait TextExtractor: Send + Sync {
    /// Extract a plain-text representation, at most `budget` bytes.
    fn extract(&self, path: &Path, budget: usize) -> Result<String>;
}

/// Extractor that yields no text; used for all binary categories and for
/// anything without a better match.
pub struct BinaryExtractor;

impl TextExtractor for BinaryExtractor {
    fn extract(&self, _path: &Path, _budget: usize) -> Result<String> {
        Ok(String::new())
    }
}

/// Coarse content categories used for routing and planning rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Text,
    Pdf,
    WordProcessing,
    Spreadsheet,
    Presentation,
    Image,
    Audio,
    Video,
    Archive,
    Executable,
    Unknown,
}

impl FileCategory {
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "txt" | "md" | "csv" | "html" | "htm" | "json" | "xml" | "log" | "ini" | "cfg"
            | "yaml" | "yml" | "rtf" => FileCategory::Text,
            "pdf" => FileCategory::Pdf,
            "doc" | "docx" | "odt" => FileCategory::WordProcessing,
            "xls" | "xlsx" | "ods" => FileCategory::Spreadsheet,
            "ppt" | "pptx" | "odp" => FileCategory::Presentation,
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "heic" | "svg" => {
                FileCategory::Image
            }
            "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => FileCategory::Audio,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "wmv" => FileCategory::Video,
            "zip" | "tar" | "gz" | "bz2" | "7z" | "rar" | "xz" => FileCategory::Archive,
            "exe" | "dll" | "so" | "dylib" | "bin" | "msi" | "app" => FileCategory::Executable,
            _ => FileCategory::Unknown,
        }
    }

    /// Categories whose content is never summarized.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            FileCategory::Image
                | FileCategory::Audio
                | FileCategory::Video
                | FileCategory::Archive
                | FileCategory::Executable
                | FileCategory::Unknown
        )
    }
}

/// Pick the extractor for an extension (lowercased, no dot).
pub fn extractor_for(ext: &str) -> Box<dyn TextExtractor> {
    match FileCategory::from_extension(ext) {
        FileCategory::Text => Box::new(PlainTextExtractor),
        FileCategory::Pdf => Box::new(PdfExtractor::default()),
        FileCategory::WordProcessing | FileCategory::Presentation => Box::new(OfficeExtractor),
        FileCategory::Spreadsheet => Box::new(SheetExtractor),
        _ => Box::new(BinaryExtractor),
    }
}

/// Truncate to at most `budget` bytes on a char boundary.
pub(crate) fn truncate_to_budget(mut text: String, budget: usize) -> String {
    if text.len() <= budget {
        return text;
    }
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_routing() {
        assert_eq!(FileCategory::from_extension("md"), FileCategory::Text);
        assert_eq!(FileCategory::from_extension("docx"), FileCategory::WordProcessing);
        assert_eq!(FileCategory::from_extension("xlsx"), FileCategory::Spreadsheet);
        assert_eq!(FileCategory::from_extension("jpg"), FileCategory::Image);
        assert_eq!(FileCategory::from_extension("xyz"), FileCategory::Unknown);
    }

    #[test]
    fn test_binary_categories() {
        assert!(FileCategory::Image.is_binary());
        assert!(FileCategory::Unknown.is_binary());
        assert!(!FileCategory::Pdf.is_binary());
        assert!(!FileCategory::Text.is_binary());
    }

    #[test]
    fn test_unknown_extension_yields_empty_text() {
        let extractor = extractor_for("xyz");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.xyz");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();
        assert_eq!(extractor.extract(&path, 1000).unwrap(), "");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "héllo wörld".to_string();
        let cut = truncate_to_budget(text, 2);
        // 'é' starts at byte 1 and is two bytes wide; the cut backs off.
        assert_eq!(cut, "h");
    }
}
