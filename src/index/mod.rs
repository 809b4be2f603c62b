//! Indexing phase: walk the source tree and produce one processed
//! DocumentItem per file.
//!
//! Two worker pools connected by a bounded channel: CPU workers hash,
//! read metadata and extract text; network workers summarize extracted
//! text with the local model. Per-file failures land on the item row and
//! never stop the phase.

pub mod hashing;
pub mod mime;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::{Database, DocumentItem, DocumentStatus, Job, NewDocument};
use crate::error::{PipelineError, Result};
use crate::extract::{extractor_for, FileCategory};
use crate::llm::json::extract_json;
use crate::llm::LocalLlm;

/// After this many back-to-back summary failures the local model is
/// considered down and the remaining files index without summaries.
const MAX_CONSECUTIVE_LLM_FAILURES: usize = 3;

/// Minimum extracted text length worth summarizing.
const MIN_SUMMARY_TEXT_LEN: usize = 50;

#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub files_indexed: usize,
    pub files_errored: usize,
    pub files_skipped: usize,
    pub summaries_written: usize,
}

struct SummaryTask {
    file_id: String,
    file_name: String,
    relative_path: String,
    text: String,
}

pub struct Indexer<'a> {
    config: &'a Config,
    db_path: PathBuf,
}

impl<'a> Indexer<'a> {
    pub fn new(config: &'a Config, db_path: PathBuf) -> Self {
        Self { config, db_path }
    }

    pub fn run(
        &self,
        job_id: &str,
        source_root: &Path,
        llm: &LocalLlm,
        cancel: &Arc<AtomicBool>,
    ) -> Result<IndexOutcome> {
        if !source_root.is_dir() {
            return Err(PipelineError::io(format!(
                "source root missing: {}",
                source_root.display()
            )));
        }

        let files = self.discover(source_root);
        let total = files.len();
        tracing::info!(job_id, total, "indexing source tree");

        if total == 0 {
            return Ok(IndexOutcome::default());
        }

        let work: Arc<Mutex<VecDeque<PathBuf>>> = Arc::new(Mutex::new(files.into()));
        let (task_tx, task_rx) = mpsc::sync_channel::<SummaryTask>(self.config.processing.batch_size);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let indexed = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let summarized = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let llm_failures = Arc::new(AtomicUsize::new(0));
        let llm_down = Arc::new(AtomicBool::new(false));

        let batch_size = self.config.processing.batch_size.max(1);

        std::thread::scope(|scope| {
            for _ in 0..self.config.processing.cpu_workers.max(1) {
                let work = work.clone();
                let task_tx = task_tx.clone();
                let cancel = cancel.clone();
                let indexed = indexed.clone();
                let errored = errored.clone();
                let skipped = skipped.clone();
                let done = done.clone();
                let db_path = self.db_path.clone();
                let config = self.config;
                let source_root = source_root.to_path_buf();
                let job_id = job_id.to_string();

                scope.spawn(move || {
                    let db = match Database::open(&db_path) {
                        Ok(db) => db,
                        Err(e) => {
                            tracing::error!(error = %e, "index worker failed to open store");
                            return;
                        }
                    };

                    loop {
                        if cancel.load(Ordering::SeqCst) {
                            break;
                        }

                        let path = {
                            let mut queue = work.lock().unwrap();
                            queue.pop_front()
                        };
                        let Some(path) = path else { break };

                        match process_file(&db, config, &job_id, &source_root, &path, &task_tx) {
                            Ok(FileOutcome::Indexed) => {
                                indexed.fetch_add(1, Ordering::SeqCst);
                            }
                            Ok(FileOutcome::Skipped) => {
                                skipped.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => {
                                errored.fetch_add(1, Ordering::SeqCst);
                                tracing::warn!(path = %path.display(), error = %e, "file indexing failed");
                            }
                        }

                        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                        if finished % batch_size == 0 || finished == total {
                            let progress = ((finished * 100) / total) as u8;
                            let _ = Job::set_progress(&db, &job_id, progress);
                        }
                    }
                });
            }
            // Workers hold their own clones.
            drop(task_tx);

            for _ in 0..self.config.processing.net_workers.max(1) {
                let task_rx = task_rx.clone();
                let cancel = cancel.clone();
                let summarized = summarized.clone();
                let errored = errored.clone();
                let llm_failures = llm_failures.clone();
                let llm_down = llm_down.clone();
                let db_path = self.db_path.clone();
                let job_id = job_id.to_string();
                let llm = llm.clone();

                scope.spawn(move || {
                    let db = match Database::open(&db_path) {
                        Ok(db) => db,
                        Err(e) => {
                            tracing::error!(error = %e, "summary worker failed to open store");
                            return;
                        }
                    };

                    loop {
                        let task = {
                            let rx = task_rx.lock().unwrap();
                            rx.recv()
                        };
                        let Ok(task) = task else { break };

                        if cancel.load(Ordering::SeqCst) || llm_down.load(Ordering::SeqCst) {
                            continue; // drain without calling out
                        }

                        match summarize_file(&db, &llm, &job_id, &task, &cancel) {
                            Ok(true) => {
                                summarized.fetch_add(1, Ordering::SeqCst);
                                llm_failures.store(0, Ordering::SeqCst);
                            }
                            Ok(false) => {}
                            Err(e) if e.kind == crate::error::ErrorKind::Malformed => {
                                // Unparseable model output is a per-item error.
                                errored.fetch_add(1, Ordering::SeqCst);
                                let _ = DocumentItem::mark_error(&db, &job_id, &task.file_id, &e.to_string());
                            }
                            Err(e) => {
                                let failures = llm_failures.fetch_add(1, Ordering::SeqCst) + 1;
                                tracing::warn!(file = %task.relative_path, error = %e, "summarization failed");
                                if failures >= MAX_CONSECUTIVE_LLM_FAILURES {
                                    tracing::error!(
                                        consecutive_failures = failures,
                                        "local model unavailable, indexing continues without summaries"
                                    );
                                    llm_down.store(true, Ordering::SeqCst);
                                }
                            }
                        }
                    }
                });
            }
        });

        let outcome = IndexOutcome {
            files_indexed: indexed.load(Ordering::SeqCst),
            files_errored: errored.load(Ordering::SeqCst),
            files_skipped: skipped.load(Ordering::SeqCst),
            summaries_written: summarized.load(Ordering::SeqCst),
        };

        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::cancelled());
        }

        tracing::info!(
            job_id,
            indexed = outcome.files_indexed,
            errors = outcome.files_errored,
            summaries = outcome.summaries_written,
            "indexing finished"
        );
        Ok(outcome)
    }

    /// Files under the source root, sorted for deterministic ordering.
    fn discover(&self, source_root: &Path) -> Vec<PathBuf> {
        let skip_hidden = self.config.processing.skip_hidden;
        let mut files: Vec<PathBuf> = WalkDir::new(source_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| {
                if !skip_hidden || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !(name.starts_with('.') || name.starts_with('~'))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}

enum FileOutcome {
    Indexed,
    Skipped,
}

fn process_file(
    db: &Database,
    config: &Config,
    job_id: &str,
    source_root: &Path,
    path: &Path,
    task_tx: &mpsc::SyncSender<SummaryTask>,
) -> Result<FileOutcome> {
    let rel = path
        .strip_prefix(source_root)
        .map_err(|e| PipelineError::fatal(format!("file outside source root: {e}")))?;
    let rel_str = rel.to_string_lossy().replace('\\', "/");
    let file_id = hashing::file_id(&rel_str);

    // Re-entering the phase skips files already processed.
    if let Some(status) = DocumentItem::status_for(db, job_id, &file_id)? {
        if status >= DocumentStatus::Processed && status != DocumentStatus::Error {
            return Ok(FileOutcome::Skipped);
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_str.clone());
    let directory = rel
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            DocumentItem::insert_discovered(db, job_id, &file_id, &name, &directory, &extension, 0, "application/octet-stream")?;
            let err = PipelineError::io(format!("cannot stat {}: {e}", path.display()));
            DocumentItem::mark_error(db, job_id, &file_id, &err.to_string())?;
            return Err(err);
        }
    };

    let file_size = metadata.len() as i64;
    let mime_type = mime::mime_for_extension(&extension);
    DocumentItem::insert_discovered(
        db, job_id, &file_id, &name, &directory, &extension, file_size, &mime_type,
    )?;

    let content_hash = match hashing::content_fingerprint(path) {
        Ok(hash) => hash,
        Err(e) => {
            DocumentItem::mark_error(db, job_id, &file_id, &e.to_string())?;
            return Err(e);
        }
    };

    let source_mtime = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    let category = FileCategory::from_extension(&extension);
    let oversized = metadata.len() > config.processing.max_file_size_bytes();
    let text = if category.is_binary() || oversized {
        String::new()
    } else {
        match extractor_for(&extension).extract(path, config.processing.text_extraction_budget_bytes)
        {
            Ok(text) => text,
            Err(e) => {
                // Extraction failures degrade to filename-only planning;
                // the item still indexes.
                tracing::debug!(path = %path.display(), error = %e, "text extraction failed");
                String::new()
            }
        }
    };

    DocumentItem::apply_index_result(
        db,
        job_id,
        &NewDocument {
            file_id: file_id.clone(),
            current_name: name.clone(),
            current_path: directory,
            extension,
            file_size,
            mime_type,
            content_hash,
            source_mtime,
            content_summary: None,
            document_type: None,
            key_topics: vec![],
        },
    )?;

    if text.trim().len() >= MIN_SUMMARY_TEXT_LEN {
        // Blocks when the summary queue is full; that is the backpressure.
        let _ = task_tx.send(SummaryTask {
            file_id,
            file_name: name,
            relative_path: rel_str,
            text,
        });
    }

    Ok(FileOutcome::Indexed)
}

fn summary_prompt(task: &SummaryTask) -> String {
    let content: String = task.text.chars().take(10_000).collect();
    format!(
        "Analyze this document for organization purposes.\n\n\
         DOCUMENT:\n\
         Filename: {}\n\
         Path: {}\n\n\
         Content (truncated):\n{}\n\n\
         Provide analysis in this exact JSON format:\n\
         {{\n\
           \"summary\": \"2-3 sentence summary of the document content and purpose\",\n\
           \"document_type\": \"one of: meeting_notes, policy, report, template, correspondence, presentation, data, reference, draft, archive, other\",\n\
           \"key_topics\": [\"topic1\", \"topic2\", \"topic3\"]\n\
         }}\n\n\
         Respond ONLY with the JSON, no other text.",
        task.file_name, task.relative_path, content
    )
}

/// Returns Ok(true) when a summary landed, Ok(false) when the response was
/// usable but empty.
fn summarize_file(
    db: &Database,
    llm: &LocalLlm,
    job_id: &str,
    task: &SummaryTask,
    cancel: &Arc<AtomicBool>,
) -> Result<bool> {
    let response = llm.summarize(&summary_prompt(task), None, cancel)?;
    let value = extract_json(&response)?;

    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if summary.is_empty() {
        return Ok(false);
    }

    let document_type = value.get("document_type").and_then(|v| v.as_str());
    let key_topics: Vec<String> = value
        .get("key_topics")
        .and_then(|v| v.as_array())
        .map(|topics| {
            topics
                .iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default();

    DocumentItem::apply_summary(db, job_id, &task.file_id, summary, document_type, &key_topics)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(db_dir: &Path) -> Config {
        let mut config = Config::default();
        config.db_path = db_dir.join("test.db");
        config.processing.cpu_workers = 2;
        config.processing.net_workers = 1;
        config
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    /// LLM pointed at a closed port: summaries fail fast and indexing
    /// proceeds without them.
    fn dead_llm() -> LocalLlm {
        let config = crate::config::LocalLlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            max_retries: 1,
            ..crate::config::LocalLlmConfig::default()
        };
        LocalLlm::from_config(&config)
    }

    #[test]
    fn test_indexes_tree_without_llm() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("docs")).unwrap();
        std::fs::write(source.join("docs/a.txt"), "short").unwrap();
        std::fs::write(source.join("image.jpg"), [0xFFu8, 0xD8, 0xFF]).unwrap();

        let config = test_config(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();

        let indexer = Indexer::new(&config, config.db_path.clone());
        let outcome = indexer
            .run(&job.id, &source, &dead_llm(), &no_cancel())
            .unwrap();

        assert_eq!(outcome.files_indexed, 2);
        assert_eq!(outcome.files_errored, 0);

        let items = DocumentItem::list_for_job(&db, &job.id).unwrap();
        assert_eq!(items.len(), 2);
        for item in &items {
            assert_eq!(item.status, DocumentStatus::Processed);
            assert!(item.content_hash.is_some());
        }
        let jpeg = items.iter().find(|i| i.extension == "jpg").unwrap();
        assert!(jpeg.content_summary.is_none());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), "alpha").unwrap();

        let config = test_config(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();

        let indexer = Indexer::new(&config, config.db_path.clone());
        indexer.run(&job.id, &source, &dead_llm(), &no_cancel()).unwrap();
        let second = indexer.run(&job.id, &source, &dead_llm(), &no_cancel()).unwrap();

        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_skipped, 1);
        assert_eq!(DocumentItem::list_for_job(&db, &job.id).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_source_root_fails_phase() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();

        let indexer = Indexer::new(&config, config.db_path.clone());
        let err = indexer
            .run(&job.id, &dir.path().join("nope"), &dead_llm(), &no_cancel())
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_empty_source_completes() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty");
        std::fs::create_dir_all(&source).unwrap();

        let config = test_config(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();

        let indexer = Indexer::new(&config, config.db_path.clone());
        let outcome = indexer.run(&job.id, &source, &dead_llm(), &no_cancel()).unwrap();
        assert_eq!(outcome.files_indexed, 0);
    }

    #[test]
    fn test_hidden_files_skipped_when_configured() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join(".git")).unwrap();
        std::fs::write(source.join(".git/config"), "secret").unwrap();
        std::fs::write(source.join(".hidden"), "secret").unwrap();
        std::fs::write(source.join("visible.txt"), "hello").unwrap();

        let config = test_config(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "test.zip").unwrap();

        let indexer = Indexer::new(&config, config.db_path.clone());
        let outcome = indexer.run(&job.id, &source, &dead_llm(), &no_cancel()).unwrap();
        assert_eq!(outcome.files_indexed, 1);
    }
}
