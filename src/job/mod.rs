//! Job controller: drives the phase state machine for one job.
//!
//! `pending → extracting → indexing → deduplicating → versioning →
//! organizing → [review_required →] executing → completed`, with
//! `failed` and `cancelled` reachable from any non-terminal state. Every
//! transition is persisted before its phase begins, which is what makes
//! a crashed or cancelled job resumable: each phase re-enters
//! idempotently and skips already-finished items.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive;
use crate::config::Config;
use crate::db::{Database, DocumentItem, DocumentStatus, DuplicateGroup, Job, JobStatus, VersionChain};
use crate::dedup::DuplicateResolver;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::exec::Executor;
use crate::index::Indexer;
use crate::llm::{LocalLlm, RemoteLlm};
use crate::plan::Planner;
use crate::versions::VersionResolver;

pub type CancelToken = Arc<AtomicBool>;

pub struct JobController {
    config: Config,
    db_path: PathBuf,
}

impl JobController {
    pub fn new(config: Config) -> Self {
        let db_path = config.db_path.clone();
        Self { config, db_path }
    }

    fn open_db(&self) -> Result<Database> {
        let db = Database::open(&self.db_path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Register a new job for a deposited source archive.
    pub fn submit(&self, source_archive: &Path) -> Result<String> {
        if !source_archive.is_file() {
            return Err(PipelineError::io(format!(
                "source archive missing: {}",
                source_archive.display()
            )));
        }
        let db = self.open_db()?;
        let job = Job::create(&db, &source_archive.display().to_string())?;
        tracing::info!(job_id = %job.id, archive = %source_archive.display(), "job created");
        Ok(job.id)
    }

    pub fn status(&self, job_id: &str) -> Result<Option<Job>> {
        let db = self.open_db()?;
        Job::get(&db, job_id)
    }

    /// Run the pipeline from wherever the job currently stands. Returns
    /// the terminal (or review-gated) status.
    pub fn run(&self, job_id: &str, cancel: &CancelToken) -> Result<JobStatus> {
        let mut db = self.open_db()?;
        let job = Job::get(&db, job_id)?
            .ok_or_else(|| PipelineError::store(format!("job {job_id} not found")))?;

        if job.status.is_terminal() {
            return Ok(job.status);
        }

        match self.drive(&mut db, &job, cancel) {
            Ok(status) => Ok(status),
            Err(e) if e.kind == ErrorKind::Cancelled => {
                Job::mark_cancelled(&db, job_id)?;
                tracing::warn!(job_id, "job cancelled");
                Ok(JobStatus::Cancelled)
            }
            Err(e) => {
                Job::mark_failed(&db, job_id, &e.to_string())?;
                tracing::error!(job_id, error = %e, "job failed");
                Err(e)
            }
        }
    }

    /// Release a job waiting at the review gate.
    pub fn approve(&self, job_id: &str, cancel: &CancelToken) -> Result<JobStatus> {
        let mut db = self.open_db()?;
        let job = Job::get(&db, job_id)?
            .ok_or_else(|| PipelineError::store(format!("job {job_id} not found")))?;

        if job.status != JobStatus::ReviewRequired {
            return Err(PipelineError::validation(format!(
                "job {job_id} is {} and cannot be approved",
                job.status.as_str()
            )));
        }

        match self.execute_and_finish(&mut db, job_id, cancel) {
            Ok(status) => Ok(status),
            Err(e) if e.kind == ErrorKind::Cancelled => {
                Job::mark_cancelled(&db, job_id)?;
                Ok(JobStatus::Cancelled)
            }
            Err(e) => {
                Job::mark_failed(&db, job_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    pub fn rollback(&self, manifest_path: &Path) -> Result<()> {
        let mut db = self.open_db()?;
        Executor::new(&self.config).rollback(&mut db, manifest_path)
    }

    fn drive(&self, db: &mut Database, job: &Job, cancel: &CancelToken) -> Result<JobStatus> {
        let job_id = job.id.clone();
        let resume_at = phase_rank(job.status);

        if resume_at <= phase_rank(JobStatus::Extracting) {
            self.check_cancel(cancel)?;
            Job::enter_phase(db, &job_id, JobStatus::Extracting)?;
            self.extract(db, &job_id)?;
        }

        if resume_at <= phase_rank(JobStatus::Indexing) {
            self.check_cancel(cancel)?;
            Job::enter_phase(db, &job_id, JobStatus::Indexing)?;
            let local = LocalLlm::from_config(&self.config.local_llm);
            let indexer = Indexer::new(&self.config, self.db_path.clone());
            indexer.run(&job_id, &self.config.paths.source_dir(&job_id), &local, cancel)?;
        }

        if resume_at <= phase_rank(JobStatus::Deduplicating) {
            self.check_cancel(cancel)?;
            Job::enter_phase(db, &job_id, JobStatus::Deduplicating)?;
            let local = LocalLlm::from_config(&self.config.local_llm);
            DuplicateResolver::new(&self.config).run(db, &job_id, &local, cancel)?;
        }

        if resume_at <= phase_rank(JobStatus::Versioning) {
            self.check_cancel(cancel)?;
            Job::enter_phase(db, &job_id, JobStatus::Versioning)?;
            let local = LocalLlm::from_config(&self.config.local_llm);
            VersionResolver::new(&self.config).run(db, &job_id, &local, cancel)?;
        }

        if resume_at <= phase_rank(JobStatus::Organizing) {
            self.check_cancel(cancel)?;
            Job::enter_phase(db, &job_id, JobStatus::Organizing)?;
            let remote = RemoteLlm::from_config(&self.config.remote_llm)?;
            Planner::run(db, &job_id, &remote, cancel)?;
        }

        // A job already past the gate (resumed mid-execution) goes
        // straight back to executing.
        if self.config.review.review_required && resume_at < phase_rank(JobStatus::Executing) {
            Job::enter_phase(db, &job_id, JobStatus::ReviewRequired)?;
            tracing::info!(job_id, "review required, pausing before execution");
            return Ok(JobStatus::ReviewRequired);
        }

        self.execute_and_finish(db, &job_id, cancel)
    }

    fn execute_and_finish(
        &self,
        db: &mut Database,
        job_id: &str,
        cancel: &CancelToken,
    ) -> Result<JobStatus> {
        self.check_cancel(cancel)?;
        Job::enter_phase(db, job_id, JobStatus::Executing)?;

        let dry_run = self.config.review.dry_run;
        let outcome = Executor::new(&self.config).run(db, job_id, dry_run, cancel)?;

        let files_processed = DocumentItem::count_by_status(db, job_id, DocumentStatus::Applied)?;
        let duplicates = DuplicateGroup::count_for_job(db, job_id)?;
        let chains = VersionChain::count_for_job(db, job_id)?;
        Job::update_counters(
            db,
            job_id,
            files_processed,
            duplicates,
            outcome.shortcuts_created as i64,
            chains,
            outcome.files_renamed as i64,
            outcome.files_moved as i64,
        )?;

        if !dry_run {
            let working = self.config.paths.working_dir(job_id);
            let output = self.config.paths.output_archive(job_id);
            archive::package_tree(&working, &output)?;
            Job::set_output_archive(db, job_id, &output.display().to_string())?;
        }

        Job::mark_completed(db, job_id)?;
        tracing::info!(
            job_id,
            files = files_processed,
            shortcuts = outcome.shortcuts_created,
            errors = outcome.errors,
            dry_run,
            "job completed"
        );
        Ok(JobStatus::Completed)
    }

    /// Unpack the source archive into the job's read-only source tree.
    /// A tree that already has content is a resumed job; leave it alone.
    fn extract(&self, db: &Database, job_id: &str) -> Result<()> {
        let job = Job::get(db, job_id)?
            .ok_or_else(|| PipelineError::store(format!("job {job_id} not found")))?;
        let archive_path = job
            .source_archive
            .as_deref()
            .ok_or_else(|| PipelineError::validation("job has no source archive"))?;
        let source_dir = self.config.paths.source_dir(job_id);

        if source_dir.is_dir() && source_dir.read_dir()?.next().is_some() {
            tracing::info!(job_id, "source tree already extracted, skipping");
            return Ok(());
        }

        archive::extract_archive(Path::new(archive_path), &source_dir)?;
        Ok(())
    }

    fn check_cancel(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::cancelled());
        }
        Ok(())
    }
}

/// Position of a status in the phase sequence; used to re-enter the
/// pipeline at the right phase on resume.
fn phase_rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::Extracting => 1,
        JobStatus::Indexing => 2,
        JobStatus::Deduplicating => 3,
        JobStatus::Versioning => 4,
        JobStatus::Organizing => 5,
        JobStatus::ReviewRequired => 6,
        JobStatus::Executing => 7,
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 8,
    }
}
