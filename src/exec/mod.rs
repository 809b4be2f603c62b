//! Execution phase: materialize the organization plan onto the working
//! tree.
//!
//! The source tree is never written. Ordered steps: validate, create
//! directories, copy files, create shortcuts, archive versions, write the
//! manifest. Individual operation failures are recorded and execution
//! continues; only manifest write failure is fatal.

pub mod manifest;
pub mod sanitize;
pub mod shortcuts;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::config::Config;
use crate::db::{
    ChainStatus, Database, DocumentItem, DuplicateGroup, ExecutionLogEntry, Job, JobStatus,
    PlanArtifacts, ShortcutRecord, VersionChain, VersionChainMember,
};
use crate::error::{PipelineError, Result};
use manifest::{Manifest, ManifestBuilder};
use sanitize::{sanitize_filename, sanitize_relative_path};
use shortcuts::ShortcutStrategy;

#[derive(Debug, Default)]
pub struct ExecOutcome {
    pub files_copied: usize,
    pub files_renamed: usize,
    pub files_moved: usize,
    pub shortcuts_created: usize,
    pub version_archives: usize,
    pub errors: usize,
    pub manifest_path: PathBuf,
}

/// A resolved copy operation: one source file, one working-tree target.
#[derive(Debug, Clone)]
struct PlannedCopy {
    document_id: i64,
    source: PathBuf,
    /// Target directory relative to the working root ('' at root).
    target_dir: String,
    target_name: String,
    renamed: bool,
    moved: bool,
}

impl PlannedCopy {
    fn target_rel(&self) -> String {
        if self.target_dir.is_empty() {
            self.target_name.clone()
        } else {
            format!("{}/{}", self.target_dir, self.target_name)
        }
    }
}

pub struct Executor<'a> {
    config: &'a Config,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        db: &mut Database,
        job_id: &str,
        dry_run: bool,
        cancel: &Arc<AtomicBool>,
    ) -> Result<ExecOutcome> {
        let source_root = self.config.paths.source_dir(job_id);
        let working_root = self.config.paths.working_dir(job_id);
        let manifest_path = self.config.paths.manifest_path(job_id);

        let job = Job::get(db, job_id)?
            .ok_or_else(|| PipelineError::store(format!("job {job_id} not found")))?;

        let items = DocumentItem::execution_set(db, job_id)?;
        let chains = load_chains(db, job_id)?;
        let copies = self.plan_copies(&items, &chains, &source_root)?;

        // Step 1: validate before anything is touched.
        self.validate(&copies, &working_root, dry_run)?;

        let mut builder = ManifestBuilder::new(job_id, job.source_archive.clone(), dry_run);
        builder.set_total_files(copies.len());

        if dry_run {
            return self.project(db, job_id, builder, &copies, &chains, &manifest_path);
        }

        clear_working_tree(&working_root)?;

        // Step 2: directories, shallowest first.
        self.create_directories(db, job_id, &working_root, &mut builder, cancel)?;

        // Step 3: file copies in deterministic target order.
        self.copy_files(db, job_id, &working_root, &copies, &mut builder, cancel)?;

        // Step 4: shortcuts for secondary duplicates.
        self.create_shortcuts(db, job_id, &working_root, &copies, &mut builder, cancel)?;

        // Step 5: version archives.
        self.archive_versions(db, job_id, &source_root, &working_root, &chains, &mut builder, cancel)?;

        // Step 6: the manifest; failure here is fatal.
        let statistics = builder.statistics().clone();
        let manifest = builder.build();
        manifest.write(&manifest_path)?;

        Ok(ExecOutcome {
            files_copied: statistics.files_copied,
            files_renamed: statistics.files_renamed,
            files_moved: statistics.files_moved,
            shortcuts_created: statistics.shortcuts_created,
            version_archives: statistics.version_archives,
            errors: statistics.errors,
            manifest_path,
        })
    }

    /// Resolve every execution-set item to a source path and a working
    /// target. Chain members use their chain proposal; planned items use
    /// the plan; everything else mirrors its source location.
    fn plan_copies(
        &self,
        items: &[DocumentItem],
        chains: &[(VersionChain, Vec<VersionChainMember>)],
        source_root: &Path,
    ) -> Result<Vec<PlannedCopy>> {
        let mut chain_targets: HashMap<i64, (String, String)> = HashMap::new();
        for (_, members) in chains {
            for member in members {
                if member.is_current {
                    let name = member
                        .proposed_version_name
                        .clone()
                        .unwrap_or_default();
                    let dir = member.proposed_version_path.clone().unwrap_or_default();
                    if !name.is_empty() {
                        chain_targets.insert(member.document_id, (dir, name));
                    }
                }
            }
        }

        let mut copies = Vec::with_capacity(items.len());
        for item in items {
            let source = source_root
                .join(&item.current_path)
                .join(&item.current_name);

            let (raw_dir, raw_name) = if let Some((dir, name)) = chain_targets.get(&item.id) {
                (dir.clone(), name.clone())
            } else if item.proposed_path.is_some() || item.proposed_name.is_some() {
                let dir = item
                    .proposed_path
                    .as_deref()
                    .map(|p| p.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| item.current_path.clone());
                let name = item
                    .proposed_name
                    .clone()
                    .unwrap_or_else(|| item.current_name.clone());
                (dir, name)
            } else {
                (item.current_path.clone(), item.current_name.clone())
            };

            let target_dir = sanitize_relative_path(&raw_dir);
            let target_name = sanitize_filename(&raw_name);

            copies.push(PlannedCopy {
                document_id: item.id,
                source,
                renamed: target_name != item.current_name,
                moved: target_dir != item.current_path,
                target_dir,
                target_name,
            });
        }

        copies.sort_by(|a, b| a.target_rel().cmp(&b.target_rel()));
        Ok(copies)
    }

    fn validate(&self, copies: &[PlannedCopy], working_root: &Path, dry_run: bool) -> Result<()> {
        for copy in copies {
            if !copy.source.is_file() {
                return Err(PipelineError::validation(format!(
                    "planned source missing: {}",
                    copy.source.display()
                )));
            }
        }

        let mut targets: HashSet<String> = HashSet::new();
        for copy in copies {
            if !targets.insert(copy.target_rel()) {
                return Err(PipelineError::conflict(format!(
                    "two files target {}",
                    copy.target_rel()
                )));
            }
        }

        if !dry_run {
            std::fs::create_dir_all(working_root).map_err(|e| {
                PipelineError::validation(format!(
                    "working tree not writable at {}: {e}",
                    working_root.display()
                ))
            })?;
            let probe = working_root.join(".write-probe");
            std::fs::write(&probe, b"ok").map_err(|e| {
                PipelineError::validation(format!("working tree not writable: {e}"))
            })?;
            let _ = std::fs::remove_file(&probe);
        }

        Ok(())
    }

    /// Dry run: validated plan projected into a manifest, no mutation.
    fn project(
        &self,
        db: &Database,
        job_id: &str,
        mut builder: ManifestBuilder,
        copies: &[PlannedCopy],
        chains: &[(VersionChain, Vec<VersionChainMember>)],
        manifest_path: &Path,
    ) -> Result<ExecOutcome> {
        for dir in PlanArtifacts::load_directories(db, job_id)? {
            let rel = sanitize_relative_path(dir.path.trim_start_matches('/'));
            builder.add_operation("create_dir", None, Some(&rel), None, true, None);
        }
        for copy in copies {
            builder.add_operation(
                "copy_file",
                Some(&copy.source.display().to_string()),
                Some(&copy.target_rel()),
                Some(copy.document_id),
                true,
                None,
            );
        }
        for (member, _) in DuplicateGroup::shortcut_members(db, job_id)? {
            if let Some(doc) = DocumentItem::get(db, member.document_id)? {
                builder.add_operation(
                    "create_shortcut",
                    None,
                    Some(&doc.relative_path()),
                    Some(member.document_id),
                    true,
                    None,
                );
            }
        }
        for (chain, members) in chains {
            for member in members {
                if member.status == ChainStatus::Superseded {
                    let target = format!(
                        "{}/{}",
                        chain.archive_path.as_deref().unwrap_or(""),
                        member.proposed_version_name.as_deref().unwrap_or("")
                    );
                    builder.add_operation(
                        "archive_version",
                        None,
                        Some(&target),
                        Some(member.document_id),
                        true,
                        None,
                    );
                }
            }
        }

        let statistics = builder.statistics().clone();
        let manifest = builder.build();
        manifest.write(manifest_path)?;

        Ok(ExecOutcome {
            files_copied: statistics.files_copied,
            files_renamed: statistics.files_renamed,
            files_moved: statistics.files_moved,
            shortcuts_created: statistics.shortcuts_created,
            version_archives: statistics.version_archives,
            errors: statistics.errors,
            manifest_path: manifest_path.to_path_buf(),
        })
    }

    fn create_directories(
        &self,
        db: &Database,
        job_id: &str,
        working_root: &Path,
        builder: &mut ManifestBuilder,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        for dir in PlanArtifacts::load_directories(db, job_id)? {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            let rel = sanitize_relative_path(dir.path.trim_start_matches('/'));
            if rel.is_empty() {
                continue;
            }
            let absolute = working_root.join(&rel);
            let started = Instant::now();

            let result = if absolute.is_file() {
                Err(PipelineError::conflict(format!(
                    "directory path occupied by a file: {rel}"
                )))
            } else {
                std::fs::create_dir_all(&absolute).map_err(PipelineError::from)
            };

            let elapsed = started.elapsed().as_millis() as i64;
            match result {
                Ok(()) => {
                    builder.add_operation("create_dir", None, Some(&rel), None, true, None);
                    ExecutionLogEntry::record(
                        db, job_id, "create_dir", None, Some(&rel), None, true, None, Some(elapsed),
                    )?;
                }
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "directory creation failed");
                    builder.add_operation("create_dir", None, Some(&rel), None, false, Some(&e.to_string()));
                    ExecutionLogEntry::record(
                        db, job_id, "create_dir", None, Some(&rel), None, false,
                        Some(&e.to_string()), Some(elapsed),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn copy_files(
        &self,
        db: &Database,
        job_id: &str,
        working_root: &Path,
        copies: &[PlannedCopy],
        builder: &mut ManifestBuilder,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        for copy in copies {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            let target = working_root.join(&copy.target_rel());
            let started = Instant::now();
            let result = copy_preserving_metadata(&copy.source, &target);
            let elapsed = started.elapsed().as_millis() as i64;

            match result {
                Ok(()) => {
                    if copy.renamed {
                        builder.note_rename();
                    }
                    if copy.moved {
                        builder.note_move();
                    }
                    builder.add_operation(
                        "copy_file",
                        Some(&copy.source.display().to_string()),
                        Some(&copy.target_rel()),
                        Some(copy.document_id),
                        true,
                        None,
                    );
                    ExecutionLogEntry::record(
                        db, job_id, "copy_file",
                        Some(&copy.source.display().to_string()),
                        Some(&copy.target_rel()),
                        Some(copy.document_id), true, None, Some(elapsed),
                    )?;
                    DocumentItem::mark_applied(
                        db,
                        copy.document_id,
                        &copy.target_name,
                        &copy.target_dir,
                        copy.renamed || copy.moved,
                    )?;
                }
                Err(e) => {
                    tracing::warn!(source = %copy.source.display(), error = %e, "copy failed");
                    builder.add_operation(
                        "copy_file",
                        Some(&copy.source.display().to_string()),
                        Some(&copy.target_rel()),
                        Some(copy.document_id),
                        false,
                        Some(&e.to_string()),
                    );
                    ExecutionLogEntry::record(
                        db, job_id, "copy_file",
                        Some(&copy.source.display().to_string()),
                        Some(&copy.target_rel()),
                        Some(copy.document_id), false, Some(&e.to_string()), Some(elapsed),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn create_shortcuts(
        &self,
        db: &Database,
        job_id: &str,
        working_root: &Path,
        copies: &[PlannedCopy],
        builder: &mut ManifestBuilder,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        let applied_targets: HashMap<i64, String> = copies
            .iter()
            .map(|c| (c.document_id, c.target_rel()))
            .collect();

        for (member, primary_id) in DuplicateGroup::shortcut_members(db, job_id)? {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            let Some(duplicate) = DocumentItem::get(db, member.document_id)? else {
                continue;
            };

            // The primary's working-tree location; planned target when it
            // was copied this run, recorded final location otherwise.
            let primary_rel = match applied_targets.get(&primary_id) {
                Some(rel) => rel.clone(),
                None => match DocumentItem::get(db, primary_id)? {
                    Some(primary) => match (&primary.final_path, &primary.final_name) {
                        (Some(path), Some(name)) if path.is_empty() => name.clone(),
                        (Some(path), Some(name)) => format!("{path}/{name}"),
                        _ => primary.relative_path(),
                    },
                    None => continue,
                },
            };
            let target = working_root.join(&primary_rel);
            let link_rel = sanitize_relative_path(&duplicate.relative_path());
            let link_path = working_root.join(&link_rel);

            let started = Instant::now();
            let result = shortcuts::create_shortcut(&target, &link_path, ShortcutStrategy::Auto);
            let elapsed = started.elapsed().as_millis() as i64;

            match result {
                Ok((kind, created_path)) => {
                    let created_rel = created_path
                        .strip_prefix(working_root)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|_| created_path.display().to_string());

                    builder.add_operation(
                        "create_shortcut",
                        Some(&primary_rel),
                        Some(&created_rel),
                        Some(member.document_id),
                        true,
                        None,
                    );
                    builder.add_shortcut(&created_rel, &primary_rel, &duplicate.relative_path(), kind.as_str());
                    ExecutionLogEntry::record(
                        db, job_id, "create_shortcut", Some(&primary_rel), Some(&created_rel),
                        Some(member.document_id), true, None, Some(elapsed),
                    )?;
                    ShortcutRecord::insert(
                        db,
                        job_id,
                        &ShortcutRecord {
                            document_id: member.document_id,
                            shortcut_path: created_rel,
                            target_path: primary_rel.clone(),
                            shortcut_type: kind.as_str().to_string(),
                            original_path: duplicate.relative_path(),
                            original_hash: duplicate.content_hash.clone(),
                            created_at: Utc::now().to_rfc3339(),
                        },
                    )?;
                    DuplicateGroup::set_shortcut_target(db, member.id, &primary_rel)?;
                }
                Err(e) => {
                    tracing::warn!(link = %link_rel, error = %e, "shortcut creation failed");
                    builder.add_operation(
                        "create_shortcut",
                        Some(&primary_rel),
                        Some(&link_rel),
                        Some(member.document_id),
                        false,
                        Some(&e.to_string()),
                    );
                    ExecutionLogEntry::record(
                        db, job_id, "create_shortcut", Some(&primary_rel), Some(&link_rel),
                        Some(member.document_id), false, Some(&e.to_string()), Some(elapsed),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn archive_versions(
        &self,
        db: &Database,
        job_id: &str,
        source_root: &Path,
        working_root: &Path,
        chains: &[(VersionChain, Vec<VersionChainMember>)],
        builder: &mut ManifestBuilder,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        for (chain, members) in chains {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            let archive_rel = sanitize_relative_path(
                chain
                    .archive_path
                    .as_deref()
                    .unwrap_or("")
                    .trim_start_matches('/'),
            );
            let archive_dir = working_root.join(&archive_rel);
            if let Err(e) = std::fs::create_dir_all(&archive_dir) {
                tracing::warn!(chain = %chain.chain_name, error = %e, "archive directory failed");
                builder.add_operation(
                    "archive_version", None, Some(&archive_rel), None, false, Some(&e.to_string()),
                );
                continue;
            }

            let mut current_rel: Option<String> = None;
            let mut current_version: Option<i64> = None;
            let mut current_date: Option<String> = None;
            let mut history = Vec::new();

            for member in members {
                let Some(doc) = DocumentItem::get(db, member.document_id)? else {
                    continue;
                };
                let file_name = member
                    .proposed_version_name
                    .clone()
                    .unwrap_or_else(|| doc.current_name.clone());

                if member.is_current {
                    let rel = match (&doc.final_path, &doc.final_name) {
                        (Some(path), Some(name)) if path.is_empty() => name.clone(),
                        (Some(path), Some(name)) => format!("{path}/{name}"),
                        _ => {
                            // Not copied in step 3 (e.g. an error path);
                            // ensure the main location exists anyway.
                            let fallback = member
                                .proposed_version_path
                                .clone()
                                .unwrap_or_else(|| doc.current_path.clone());
                            let rel = if fallback.is_empty() {
                                file_name.clone()
                            } else {
                                format!("{fallback}/{file_name}")
                            };
                            let target = working_root.join(&rel);
                            if !target.exists() {
                                let source =
                                    source_root.join(&doc.current_path).join(&doc.current_name);
                                let _ = copy_preserving_metadata(&source, &target);
                            }
                            rel
                        }
                    };
                    current_version = Some(member.version_number);
                    current_date = member.version_date.clone();
                    current_rel = Some(rel);
                    continue;
                }

                // Superseded members come straight from the untouched
                // source, so the archived bytes match the recorded hash.
                let source = source_root.join(&doc.current_path).join(&doc.current_name);
                let archived_name = sanitize_filename(&file_name);
                let target = archive_dir.join(&archived_name);
                let target_rel = format!("{archive_rel}/{archived_name}");

                let started = Instant::now();
                let result = copy_preserving_metadata(&source, &target);
                let elapsed = started.elapsed().as_millis() as i64;

                match result {
                    Ok(()) => {
                        builder.add_operation(
                            "archive_version",
                            Some(&source.display().to_string()),
                            Some(&target_rel),
                            Some(member.document_id),
                            true,
                            None,
                        );
                        ExecutionLogEntry::record(
                            db, job_id, "archive_version",
                            Some(&source.display().to_string()), Some(&target_rel),
                            Some(member.document_id), true, None, Some(elapsed),
                        )?;
                        DocumentItem::mark_applied(
                            db, member.document_id, &archived_name, &archive_rel, true,
                        )?;
                        history.push((
                            member.version_number,
                            version_entry(member, &archived_name),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(source = %source.display(), error = %e, "version archive failed");
                        builder.add_operation(
                            "archive_version",
                            Some(&source.display().to_string()),
                            Some(&target_rel),
                            Some(member.document_id),
                            false,
                            Some(&e.to_string()),
                        );
                        ExecutionLogEntry::record(
                            db, job_id, "archive_version",
                            Some(&source.display().to_string()), Some(&target_rel),
                            Some(member.document_id), false, Some(&e.to_string()), Some(elapsed),
                        )?;
                    }
                }
            }

            let current_file = current_rel
                .as_deref()
                .map(|rel| relative_from_dir(&archive_rel, rel))
                .unwrap_or_default();
            if let Some(version) = current_version {
                history.push((
                    version,
                    json!({
                        "version": version,
                        "file": current_file.clone(),
                        "date": current_date,
                        "status": "active",
                    }),
                ));
            }
            history.sort_by_key(|(version, _)| *version);
            let history: Vec<serde_json::Value> =
                history.into_iter().map(|(_, entry)| entry).collect();
            let chain_manifest = json!({
                "document_name": chain.chain_name,
                "current_version": chain.current_version_number,
                "current_file": current_file,
                "archive_path": archive_rel,
                "archive_strategy": chain.archive_strategy,
                "versions": history,
                "generated_at": Utc::now().to_rfc3339(),
            });
            let history_path = archive_dir.join("version_history.json");
            std::fs::write(
                &history_path,
                serde_json::to_string_pretty(&chain_manifest)?,
            )
            .map_err(|e| PipelineError::io(format!("cannot write {}: {e}", history_path.display())))?;
        }
        Ok(())
    }

    /// Discard the working tree and reset plan rows; the untouched source
    /// makes this safe to repeat.
    pub fn rollback(&self, db: &mut Database, manifest_path: &Path) -> Result<()> {
        let manifest = Manifest::read(manifest_path)?;
        let job_id = manifest.job_id.clone();

        let working_root = self.config.paths.working_dir(&job_id);
        clear_working_tree(&working_root)?;

        DocumentItem::reset_to_organized(db, &job_id)?;
        DuplicateGroup::clear_shortcut_targets(db, &job_id)?;
        ShortcutRecord::clear_for_job(db, &job_id)?;
        ExecutionLogEntry::clear_for_job(db, &job_id)?;
        Job::enter_phase(db, &job_id, JobStatus::Organizing)?;

        tracing::info!(job_id, "rollback complete, plan rows reset");
        Ok(())
    }
}

fn version_entry(member: &VersionChainMember, file: &str) -> serde_json::Value {
    json!({
        "version": member.version_number,
        "file": file,
        "date": member.version_date,
        "status": member.status.as_str(),
    })
}

fn load_chains(db: &Database, job_id: &str) -> Result<Vec<(VersionChain, Vec<VersionChainMember>)>> {
    let mut out = Vec::new();
    for chain in VersionChain::list_for_job(db, job_id)? {
        let members = VersionChain::members(db, chain.id)?;
        out.push((chain, members));
    }
    Ok(out)
}

/// Copy a file, creating parent directories and carrying over the
/// modification time and permissions where the platform allows.
fn copy_preserving_metadata(source: &Path, target: &Path) -> Result<()> {
    if !source.is_file() {
        return Err(PipelineError::io(format!(
            "source file missing: {}",
            source.display()
        )));
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::copy(source, target)
        .map_err(|e| PipelineError::io(format!("copy to {} failed: {e}", target.display())))?;

    let metadata = std::fs::metadata(source)?;
    if let Ok(mtime) = metadata.modified() {
        if let Ok(file) = std::fs::File::options().write(true).open(target) {
            let _ = file.set_modified(mtime);
        }
    }
    let _ = std::fs::set_permissions(target, metadata.permissions());
    Ok(())
}

fn clear_working_tree(working_root: &Path) -> Result<()> {
    if working_root.exists() {
        for entry in std::fs::read_dir(working_root)? {
            let entry = entry?;
            let path = entry.path();
            let result = if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "failed to clear working entry");
            }
        }
    } else {
        std::fs::create_dir_all(working_root)?;
    }
    Ok(())
}

/// Relative path from a working-relative directory to a working-relative
/// file.
fn relative_from_dir(from_dir: &str, to_file: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to_file.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for segment in &to[common..] {
        parts.push(segment.to_string());
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DuplicateDecision, MemberAction, NewChain, NewChainMember, NewDocument};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        db: Database,
        job_id: String,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db_path = dir.path().join("test.db");
        config.paths.source_root = dir.path().join("source");
        config.paths.working_root = dir.path().join("working");
        config.paths.reports_root = dir.path().join("reports");
        config.paths.output_root = dir.path().join("output");

        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();
        let source = config.paths.source_dir(&job.id);
        std::fs::create_dir_all(&source).unwrap();

        Fixture {
            _dir: dir,
            config,
            db,
            job_id: job.id,
            source,
        }
    }

    fn add_file(fx: &Fixture, dir: &str, name: &str, content: &[u8], hash: &str) -> i64 {
        let full_dir = fx.source.join(dir);
        std::fs::create_dir_all(&full_dir).unwrap();
        std::fs::write(full_dir.join(name), content).unwrap();

        let file_id = format!("fid-{dir}-{name}");
        let id = DocumentItem::insert_discovered(
            &fx.db, &fx.job_id, &file_id, name, dir, "dat", content.len() as i64,
            "application/octet-stream",
        )
        .unwrap();
        DocumentItem::apply_index_result(
            &fx.db,
            &fx.job_id,
            &NewDocument {
                file_id,
                current_name: name.to_string(),
                current_path: dir.to_string(),
                extension: name.rsplit_once('.').map(|(_, e)| e).unwrap_or("").to_string(),
                file_size: content.len() as i64,
                mime_type: "application/octet-stream".to_string(),
                content_hash: hash.to_string(),
                source_mtime: None,
                content_summary: None,
                document_type: None,
                key_topics: vec![],
            },
        )
        .unwrap();
        id
    }

    fn organize_unchanged(fx: &Fixture, doc_id: i64) {
        DocumentItem::set_proposal(&fx.db, doc_id, None, None, &[], None, "batch").unwrap();
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_mirror_copy_of_unchanged_items() {
        let mut fx = fixture();
        let doc = add_file(&fx, "docs", "a.txt", b"alpha", "h1");
        organize_unchanged(&fx, doc);

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();

        assert_eq!(outcome.files_copied, 1);
        assert_eq!(outcome.errors, 0);
        let working = fx.config.paths.working_dir(&fx.job_id);
        assert_eq!(std::fs::read(working.join("docs/a.txt")).unwrap(), b"alpha");

        let item = DocumentItem::get(&fx.db, doc).unwrap().unwrap();
        assert_eq!(item.status, crate::db::DocumentStatus::Applied);
        assert_eq!(item.final_path.as_deref(), Some("docs"));
    }

    #[test]
    fn test_planned_rename_and_move() {
        let mut fx = fixture();
        let doc = add_file(&fx, "misc", "untitled(3).txt", b"body", "h1");
        DocumentItem::set_proposal(
            &fx.db, doc,
            Some("meeting-notes.txt"),
            Some("/Notes/2024"),
            &[],
            None,
            "batch",
        )
        .unwrap();

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();

        assert_eq!(outcome.files_copied, 1);
        assert_eq!(outcome.files_renamed, 1);
        assert_eq!(outcome.files_moved, 1);
        let working = fx.config.paths.working_dir(&fx.job_id);
        assert!(working.join("Notes/2024/meeting-notes.txt").is_file());

        // Manifest written with the operation trail.
        let manifest = Manifest::read(&outcome.manifest_path).unwrap();
        assert_eq!(manifest.statistics.files_copied, 1);
        assert!(manifest
            .operations
            .iter()
            .any(|op| op.op_type == "copy_file"
                && op.target.as_deref() == Some("Notes/2024/meeting-notes.txt")));
    }

    #[test]
    fn test_reserved_characters_sanitized_on_write() {
        let mut fx = fixture();
        let doc = add_file(&fx, "", "plain.txt", b"x", "h1");
        DocumentItem::set_proposal(
            &fx.db, doc,
            Some("bad:name|really?.txt"),
            Some("/Out"),
            &[],
            None,
            "batch",
        )
        .unwrap();

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();
        assert_eq!(outcome.errors, 0);

        let working = fx.config.paths.working_dir(&fx.job_id);
        assert!(working.join("Out/bad_name_really_.txt").is_file());

        let manifest = Manifest::read(&outcome.manifest_path).unwrap();
        assert!(manifest.operations.iter().any(|op| {
            op.target.as_deref() == Some("Out/bad_name_really_.txt")
        }));
    }

    #[test]
    fn test_duplicate_becomes_shortcut() {
        let mut fx = fixture();
        let primary = add_file(&fx, "A", "report.pdf", b"same-bytes", "dup-hash");
        let secondary = add_file(&fx, "B", "report.pdf", b"same-bytes", "dup-hash");
        organize_unchanged(&fx, primary);

        DuplicateGroup::store_decision(
            &mut fx.db,
            &fx.job_id,
            &DuplicateDecision {
                content_hash: "dup-hash".to_string(),
                total_size: 20,
                primary_document_id: primary,
                decided_by: "auto",
                reasoning: None,
                members: vec![
                    (primary, MemberAction::KeepPrimary, None),
                    (secondary, MemberAction::Shortcut, None),
                ],
            },
        )
        .unwrap();

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();

        assert_eq!(outcome.files_copied, 1);
        assert_eq!(outcome.shortcuts_created, 1);

        let working = fx.config.paths.working_dir(&fx.job_id);
        assert!(working.join("A/report.pdf").is_file());
        // Shortcut landed at the duplicate's original location (symlink
        // on unix, .url fallback elsewhere).
        let link = working.join("B/report.pdf");
        let url = working.join("B/report.pdf.url");
        assert!(link.symlink_metadata().is_ok() || url.is_file());

        let records = ShortcutRecord::list_for_job(&fx.db, &fx.job_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_path, "A/report.pdf");
        assert_eq!(records[0].original_path, "B/report.pdf");
    }

    #[test]
    fn test_version_chain_archives_superseded() {
        let mut fx = fixture();
        let v1 = add_file(&fx, "plans", "budget_v1.xlsx", b"one", "h1");
        let v2 = add_file(&fx, "plans", "budget_v2.xlsx", b"two", "h2");
        // Current member organized; superseded stays out of the plan.
        organize_unchanged(&fx, v2);

        VersionChain::store(
            &mut fx.db,
            &fx.job_id,
            &NewChain {
                chain_name: "budget".to_string(),
                base_path: "plans".to_string(),
                current_document_id: v2,
                current_version_number: 2,
                detection_method: "explicit_marker",
                detection_confidence: 0.95,
                llm_reasoning: None,
                version_order_confirmed: false,
                archive_strategy: "subfolder",
                archive_path: "plans/_versions/budget".to_string(),
            },
            &[
                NewChainMember {
                    document_id: v1,
                    version_number: 1,
                    version_label: Some("v1".to_string()),
                    version_date: Some("2024-01-01".to_string()),
                    is_current: false,
                    status: ChainStatus::Superseded,
                    proposed_version_name: "budget_v1_2024-01-01.xlsx".to_string(),
                    proposed_version_path: "plans/_versions/budget".to_string(),
                },
                NewChainMember {
                    document_id: v2,
                    version_number: 2,
                    version_label: Some("v2".to_string()),
                    version_date: None,
                    is_current: true,
                    status: ChainStatus::Active,
                    proposed_version_name: "budget.xlsx".to_string(),
                    proposed_version_path: "plans".to_string(),
                },
            ],
        )
        .unwrap();

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();

        assert_eq!(outcome.version_archives, 1);
        let working = fx.config.paths.working_dir(&fx.job_id);
        // Current at the clean main location with v2's content.
        assert_eq!(std::fs::read(working.join("plans/budget.xlsx")).unwrap(), b"two");
        // Superseded archived under the subfolder.
        assert_eq!(
            std::fs::read(working.join("plans/_versions/budget/budget_v1_2024-01-01.xlsx")).unwrap(),
            b"one"
        );

        let history: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(working.join("plans/_versions/budget/version_history.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(history["document_name"], "budget");
        assert_eq!(history["current_version"], 2);
        assert_eq!(history["versions"].as_array().unwrap().len(), 2);
        assert_eq!(history["current_file"], "../../budget.xlsx");
    }

    #[test]
    fn test_conflict_detected_before_any_write() {
        let mut fx = fixture();
        let a = add_file(&fx, "x", "a.txt", b"1", "h1");
        let b = add_file(&fx, "y", "b.txt", b"2", "h2");
        for doc in [a, b] {
            DocumentItem::set_proposal(
                &fx.db, doc,
                Some("same.txt"),
                Some("/Collide"),
                &[],
                None,
                "batch",
            )
            .unwrap();
        }

        let executor = Executor::new(&fx.config);
        let err = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
        // Working tree untouched.
        assert!(!fx.config.paths.working_dir(&fx.job_id).join("Collide").exists());
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let mut fx = fixture();
        let doc = add_file(&fx, "docs", "a.txt", b"alpha", "h1");
        organize_unchanged(&fx, doc);

        let executor = Executor::new(&fx.config);
        let outcome = executor
            .run(&mut fx.db, &fx.job_id, true, &no_cancel())
            .unwrap();

        // Projection recorded, no filesystem writes under working.
        assert_eq!(outcome.files_copied, 1);
        assert!(!fx.config.paths.working_dir(&fx.job_id).exists());
        let manifest = Manifest::read(&outcome.manifest_path).unwrap();
        assert!(manifest.dry_run);

        // Items stay organized for the real run.
        let item = DocumentItem::get(&fx.db, doc).unwrap().unwrap();
        assert_eq!(item.status, crate::db::DocumentStatus::Organized);
    }

    #[test]
    fn test_rerun_after_clear_is_identical() {
        let mut fx = fixture();
        let doc = add_file(&fx, "docs", "a.txt", b"alpha", "h1");
        organize_unchanged(&fx, doc);

        let executor = Executor::new(&fx.config);
        let first = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();
        let first_manifest = Manifest::read(&first.manifest_path).unwrap();

        // Roll back, then run again.
        executor.rollback(&mut fx.db, &first.manifest_path).unwrap();
        assert!(ShortcutRecord::list_for_job(&fx.db, &fx.job_id).unwrap().is_empty());

        let second = executor
            .run(&mut fx.db, &fx.job_id, false, &no_cancel())
            .unwrap();
        let second_manifest = Manifest::read(&second.manifest_path).unwrap();

        let ops = |m: &Manifest| {
            let mut v: Vec<(String, Option<String>)> = m
                .operations
                .iter()
                .map(|op| (op.op_type.clone(), op.target.clone()))
                .collect();
            v.sort();
            v
        };
        assert_eq!(ops(&first_manifest), ops(&second_manifest));

        let working = fx.config.paths.working_dir(&fx.job_id);
        assert_eq!(std::fs::read(working.join("docs/a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_source_tree_untouched() {
        let mut fx = fixture();
        let doc = add_file(&fx, "docs", "a.txt", b"alpha", "h1");
        organize_unchanged(&fx, doc);

        let before: Vec<_> = walkdir::WalkDir::new(&fx.source)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| std::fs::read(e.path()).unwrap())
            .collect();

        let executor = Executor::new(&fx.config);
        executor.run(&mut fx.db, &fx.job_id, false, &no_cancel()).unwrap();

        let after: Vec<_> = walkdir::WalkDir::new(&fx.source)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| std::fs::read(e.path()).unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_relative_from_dir() {
        assert_eq!(
            relative_from_dir("plans/_versions/budget", "plans/budget.xlsx"),
            "../../budget.xlsx"
        );
        assert_eq!(relative_from_dir("", "a.txt"), "a.txt");
        assert_eq!(
            relative_from_dir("Archive/Versions/x", "plans/x.docx"),
            "../../../plans/x.docx"
        );
    }
}
