//! Execution manifest: the JSON audit trail of everything the executor
//! did (or, in a dry run, would do).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_files: usize,
    pub directories_created: usize,
    pub files_copied: usize,
    pub files_renamed: usize,
    pub files_moved: usize,
    pub shortcuts_created: usize,
    pub version_archives: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<i64>,
    pub success: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutEntry {
    pub shortcut_path: String,
    pub target_path: String,
    pub original_path: String,
    pub shortcut_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub error: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub executed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_archive: Option<String>,
    pub dry_run: bool,
    pub statistics: Statistics,
    pub operations: Vec<Operation>,
    pub shortcuts: Vec<ShortcutEntry>,
    pub errors: Vec<ErrorEntry>,
}

/// Accumulates operations during execution, then serializes once.
pub struct ManifestBuilder {
    job_id: String,
    source_archive: Option<String>,
    dry_run: bool,
    statistics: Statistics,
    operations: Vec<Operation>,
    shortcuts: Vec<ShortcutEntry>,
    errors: Vec<ErrorEntry>,
}

impl ManifestBuilder {
    pub fn new(job_id: &str, source_archive: Option<String>, dry_run: bool) -> Self {
        Self {
            job_id: job_id.to_string(),
            source_archive,
            dry_run,
            statistics: Statistics::default(),
            operations: Vec::new(),
            shortcuts: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn set_total_files(&mut self, count: usize) {
        self.statistics.total_files = count;
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn error_count(&self) -> usize {
        self.statistics.errors
    }

    pub fn add_operation(
        &mut self,
        op_type: &str,
        source: Option<&str>,
        target: Option<&str>,
        document_id: Option<i64>,
        success: bool,
        error: Option<&str>,
    ) {
        if success {
            match op_type {
                "create_dir" => self.statistics.directories_created += 1,
                "copy_file" => self.statistics.files_copied += 1,
                "rename" => self.statistics.files_renamed += 1,
                "move" => self.statistics.files_moved += 1,
                "create_shortcut" => self.statistics.shortcuts_created += 1,
                "archive_version" => self.statistics.version_archives += 1,
                _ => {}
            }
        } else {
            self.statistics.errors += 1;
            self.errors.push(ErrorEntry {
                error: error.unwrap_or("unknown error").to_string(),
                timestamp: Utc::now().to_rfc3339(),
                document_id,
                source: source.map(|s| s.to_string()),
                operation: Some(op_type.to_string()),
            });
        }

        self.operations.push(Operation {
            op_type: op_type.to_string(),
            source: source.map(|s| s.to_string()),
            target: target.map(|s| s.to_string()),
            document_id,
            success,
            timestamp: Utc::now().to_rfc3339(),
            error: error.map(|e| e.to_string()),
        });
    }

    /// Rename/move bookkeeping for copies that also change name or
    /// directory; the copy itself is recorded as its own operation.
    pub fn note_rename(&mut self) {
        self.statistics.files_renamed += 1;
    }

    pub fn note_move(&mut self) {
        self.statistics.files_moved += 1;
    }

    pub fn add_shortcut(
        &mut self,
        shortcut_path: &str,
        target_path: &str,
        original_path: &str,
        shortcut_type: &str,
    ) {
        self.shortcuts.push(ShortcutEntry {
            shortcut_path: shortcut_path.to_string(),
            target_path: target_path.to_string(),
            original_path: original_path.to_string(),
            shortcut_type: shortcut_type.to_string(),
            created_at: Utc::now().to_rfc3339(),
        });
    }

    pub fn build(self) -> Manifest {
        Manifest {
            job_id: self.job_id,
            executed_at: Utc::now().to_rfc3339(),
            source_archive: self.source_archive,
            dry_run: self.dry_run,
            statistics: self.statistics,
            operations: self.operations,
            shortcuts: self.shortcuts,
            errors: self.errors,
        }
    }
}

impl Manifest {
    /// Serialize to the reports area. A failure here is fatal to the job.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| PipelineError::io(format!("cannot write manifest {}: {e}", path.display())))?;
        tracing::info!(
            path = %path.display(),
            operations = self.operations.len(),
            errors = self.errors.len(),
            "manifest written"
        );
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Manifest> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io(format!("cannot read manifest {}: {e}", path.display())))?;
        let manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_statistics_track_operations() {
        let mut builder = ManifestBuilder::new("job-1", Some("a.zip".to_string()), false);
        builder.set_total_files(3);
        builder.add_operation("create_dir", None, Some("/Docs"), None, true, None);
        builder.add_operation("copy_file", Some("a"), Some("b"), Some(1), true, None);
        builder.add_operation("rename", Some("a"), Some("b"), Some(1), true, None);
        builder.add_operation(
            "copy_file",
            Some("c"),
            Some("d"),
            Some(2),
            false,
            Some("io: denied"),
        );

        let manifest = builder.build();
        assert_eq!(manifest.statistics.directories_created, 1);
        assert_eq!(manifest.statistics.files_copied, 1);
        assert_eq!(manifest.statistics.files_renamed, 1);
        assert_eq!(manifest.statistics.errors, 1);
        assert_eq!(manifest.operations.len(), 4);
        assert_eq!(manifest.errors.len(), 1);
        assert_eq!(manifest.errors[0].operation.as_deref(), Some("copy_file"));
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/job_manifest.json");

        let mut builder = ManifestBuilder::new("job-2", None, true);
        builder.add_operation("create_dir", None, Some("/X"), None, true, None);
        builder.add_shortcut("/X/b.url", "/X/a.pdf", "B/a.pdf", "url");
        let manifest = builder.build();
        manifest.write(&path).unwrap();

        let loaded = Manifest::read(&path).unwrap();
        assert_eq!(loaded.job_id, "job-2");
        assert!(loaded.dry_run);
        assert_eq!(loaded.shortcuts.len(), 1);
        assert_eq!(loaded.shortcuts[0].shortcut_type, "url");
    }
}
