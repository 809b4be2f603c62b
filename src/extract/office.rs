//! Word-processing and presentation extraction.
//!
//! OOXML documents are ZIP containers of XML parts; the text lives in
//! `word/document.xml` for documents and `ppt/slides/slideN.xml` for
//! presentations. Stripping tags from those parts is enough for
//! summarization purposes.

use std::io::Read;
use std::path::Path;

use super::{truncate_to_budget, TextExtractor};
use crate::error::{PipelineError, Result};

pub struct OfficeExtractor;

impl TextExtractor for OfficeExtractor {
    fn extract(&self, path: &Path, budget: usize) -> Result<String> {
        let file = std::fs::File::open(path)
            .map_err(|e| PipelineError::io(format!("cannot open {}: {e}", path.display())))?;
        let mut container = zip::ZipArchive::new(file).map_err(|_| {
            PipelineError::corrupt(format!("{} is not an OOXML container", path.display()))
        })?;

        let mut parts: Vec<String> = Vec::new();
        for index in 0..container.len() {
            let entry = container.by_index(index)?;
            let name = entry.name();
            if name == "word/document.xml"
                || (name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
            {
                parts.push(name.to_string());
            }
        }

        if parts.is_empty() {
            return Err(PipelineError::unsupported(format!(
                "{} has no readable document parts",
                path.display()
            )));
        }
        parts.sort();

        let mut text = String::new();
        for part in parts {
            let mut entry = container.by_name(&part)?;
            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|e| PipelineError::corrupt(format!("bad XML part {part}: {e}")))?;
            strip_tags_into(&xml, &mut text);
            text.push('\n');
            if text.len() > budget {
                break;
            }
        }

        Ok(truncate_to_budget(text, budget))
    }
}

/// Append the character data of `xml` to `out`, separating adjacent runs
/// with spaces and paragraphs with newlines.
fn strip_tags_into(xml: &str, out: &mut String) {
    let mut in_tag = false;
    let mut tag = String::new();
    let mut last_was_text = false;

    for ch in xml.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                // Paragraph and row closers become line breaks.
                if tag == "/w:p" || tag == "/a:p" || tag == "/w:tr" {
                    out.push('\n');
                    last_was_text = false;
                } else if last_was_text && (tag == "/w:t" || tag == "/a:t") {
                    out.push(' ');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => {
                out.push(ch);
                last_was_text = !ch.is_whitespace();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::FileOptions;

    fn build_docx(document_xml: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.docx");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: FileOptions = FileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap();
        (dir, path)
    }

    #[test]
    fn test_extracts_paragraph_text() {
        let (_guard, path) = build_docx(
            "<w:document><w:p><w:r><w:t>Quarterly budget</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Draft for review</w:t></w:r></w:p></w:document>",
        );
        let text = OfficeExtractor.extract(&path, 4096).unwrap();
        assert!(text.contains("Quarterly budget"));
        assert!(text.contains("Draft for review"));
        // Paragraphs end up on separate lines.
        let first_line = text.lines().next().unwrap();
        assert!(!first_line.contains("Draft"));
    }

    #[test]
    fn test_non_zip_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"not a zip at all").unwrap();
        let err = OfficeExtractor.extract(&path, 1024).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Corrupt);
    }

    #[test]
    fn test_zip_without_document_part_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.docx");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: FileOptions = FileOptions::default();
        writer.start_file("unrelated.xml", options).unwrap();
        writer.write_all(b"<x/>").unwrap();
        writer.finish().unwrap();

        let err = OfficeExtractor.extract(&path, 1024).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unsupported);
    }
}
