//! Source archive handling: safe ZIP extraction and output packaging.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;

use crate::error::{PipelineError, Result};

/// Junk entries cloud-drive exports tend to carry.
const SYSTEM_FILES: &[&str] = &["__MACOSX", ".DS_Store", "Thumbs.db", "desktop.ini", "._.DS_Store"];

fn is_system_entry(name: &str) -> bool {
    Path::new(name)
        .components()
        .any(|c| matches!(c, Component::Normal(part) if SYSTEM_FILES.contains(&part.to_string_lossy().as_ref())))
}

/// Resolve a ZIP entry name to a relative path, refusing anything that
/// would escape the extraction root.
fn safe_entry_path(name: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PipelineError::io(format!(
                    "archive entry escapes extraction root: {name}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PipelineError::io(format!(
                    "archive entry uses an absolute path: {name}"
                )));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(PipelineError::io(format!("archive entry path is empty: {name}")));
    }

    Ok(out)
}

/// Extract a source archive into `dest`. Returns the number of files
/// written. Any entry failing containment fails the whole extraction.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)
        .map_err(|e| PipelineError::io(format!("cannot open archive {}: {e}", archive_path.display())))?;
    let mut archive = zip::ZipArchive::new(file)?;

    fs::create_dir_all(dest)?;
    let mut extracted = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if name.ends_with('/') {
            continue;
        }
        if is_system_entry(&name) {
            tracing::debug!(entry = %name, "skipping system entry");
            continue;
        }

        let rel = safe_entry_path(&name)?;
        let out_path = dest.join(&rel);

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(&out_path)
            .map_err(|e| PipelineError::io(format!("cannot write {}: {e}", out_path.display())))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| PipelineError::io(format!("cannot extract {name}: {e}")))?;
        extracted += 1;
    }

    tracing::info!(archive = %archive_path.display(), files = extracted, "archive extracted");
    Ok(extracted)
}

/// Package a directory tree into a ZIP, paths relative to `root`.
pub fn package_tree(root: &Path, archive_path: &Path) -> Result<usize> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = fs::File::create(archive_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options: FileOptions = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut packaged = 0usize;

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PipelineError::io(e.to_string()))?;
        writer.start_file(rel.to_string_lossy(), options)?;
        let mut input = fs::File::open(entry.path())?;
        io::copy(&mut input, &mut writer).map_err(|e| PipelineError::io(e.to_string()))?;
        packaged += 1;
    }

    writer
        .finish()
        .map_err(|e| PipelineError::io(e.to_string()))?;
    tracing::info!(archive = %archive_path.display(), files = packaged, "working tree packaged");
    Ok(packaged)
}
