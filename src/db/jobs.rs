//! Job rows and phase transitions.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::Database;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Extracting,
    Indexing,
    Deduplicating,
    Versioning,
    Organizing,
    ReviewRequired,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Extracting => "extracting",
            JobStatus::Indexing => "indexing",
            JobStatus::Deduplicating => "deduplicating",
            JobStatus::Versioning => "versioning",
            JobStatus::Organizing => "organizing",
            JobStatus::ReviewRequired => "review_required",
            JobStatus::Executing => "executing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "extracting" => JobStatus::Extracting,
            "indexing" => JobStatus::Indexing,
            "deduplicating" => JobStatus::Deduplicating,
            "versioning" => JobStatus::Versioning,
            "organizing" => JobStatus::Organizing,
            "review_required" => JobStatus::ReviewRequired,
            "executing" => JobStatus::Executing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Alias used where a status names the phase being executed rather than
/// the job's lifecycle state.
pub type JobPhase = JobStatus;

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub current_phase: String,
    pub progress: u8,
    pub source_archive: Option<String>,
    pub output_archive: Option<String>,
    pub files_processed: i64,
    pub duplicates_found: i64,
    pub shortcuts_created: i64,
    pub version_chains_found: i64,
    pub files_renamed: i64,
    pub files_moved: i64,
    pub error_message: Option<String>,
}

impl Job {
    pub fn create(db: &Database, source_archive: &str) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        db.conn().execute(
            "INSERT INTO jobs (id, status, current_phase, source_archive) \
             VALUES (?1, 'pending', 'pending', ?2)",
            params![id, source_archive],
        )?;
        Job::get(db, &id)?.ok_or_else(|| PipelineError::store("job row missing after insert"))
    }

    pub fn get(db: &Database, job_id: &str) -> Result<Option<Job>> {
        let job = db
            .conn()
            .query_row(
                "SELECT id, status, current_phase, progress, source_archive, output_archive, \
                 files_processed, duplicates_found, shortcuts_created, version_chains_found, \
                 files_renamed, files_moved, error_message \
                 FROM jobs WHERE id = ?1",
                [job_id],
                |row| {
                    let status_str: String = row.get(1)?;
                    Ok(Job {
                        id: row.get(0)?,
                        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
                        current_phase: row.get(2)?,
                        progress: row.get::<_, i64>(3)? as u8,
                        source_archive: row.get(4)?,
                        output_archive: row.get(5)?,
                        files_processed: row.get(6)?,
                        duplicates_found: row.get(7)?,
                        shortcuts_created: row.get(8)?,
                        version_chains_found: row.get(9)?,
                        files_renamed: row.get(10)?,
                        files_moved: row.get(11)?,
                        error_message: row.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(job)
    }

    /// Persist a phase transition before the phase begins.
    pub fn enter_phase(db: &Database, job_id: &str, phase: JobStatus) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET status = ?1, current_phase = ?1, progress = 0, \
             started_at = COALESCE(started_at, ?2) WHERE id = ?3",
            params![phase.as_str(), Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn set_progress(db: &Database, job_id: &str, progress: u8) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET progress = ?1 WHERE id = ?2",
            params![progress.min(100) as i64, job_id],
        )?;
        Ok(())
    }

    pub fn mark_completed(db: &Database, job_id: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET status = 'completed', current_phase = 'completed', \
             progress = 100, completed_at = ?1, error_message = NULL WHERE id = ?2",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn mark_failed(db: &Database, job_id: &str, error: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET status = 'failed', completed_at = ?1, error_message = ?2 \
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), error, job_id],
        )?;
        Ok(())
    }

    pub fn mark_cancelled(db: &Database, job_id: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn set_output_archive(db: &Database, job_id: &str, path: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET output_archive = ?1 WHERE id = ?2",
            params![path, job_id],
        )?;
        Ok(())
    }

    pub fn update_counters(
        db: &Database,
        job_id: &str,
        files_processed: i64,
        duplicates_found: i64,
        shortcuts_created: i64,
        version_chains_found: i64,
        files_renamed: i64,
        files_moved: i64,
    ) -> Result<()> {
        db.conn().execute(
            "UPDATE jobs SET files_processed = ?1, duplicates_found = ?2, \
             shortcuts_created = ?3, version_chains_found = ?4, files_renamed = ?5, \
             files_moved = ?6 WHERE id = ?7",
            params![
                files_processed,
                duplicates_found,
                shortcuts_created,
                version_chains_found,
                files_renamed,
                files_moved,
                job_id
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_transition() {
        let db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "/data/input/a.zip").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.source_archive.as_deref(), Some("/data/input/a.zip"));

        Job::enter_phase(&db, &job.id, JobStatus::Indexing).unwrap();
        let job = Job::get(&db, &job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Indexing);
        assert_eq!(job.progress, 0);

        Job::mark_completed(&db, &job.id).unwrap();
        let job = Job::get(&db, &job.id).unwrap().unwrap();
        assert!(job.status.is_terminal());
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_failed_keeps_error_message() {
        let db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "x.zip").unwrap();
        Job::mark_failed(&db, &job.id, "planning_incomplete: 12 unassigned").unwrap();
        let job = Job::get(&db, &job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("planning_incomplete"));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "pending",
            "extracting",
            "indexing",
            "deduplicating",
            "versioning",
            "organizing",
            "review_required",
            "executing",
            "completed",
            "failed",
            "cancelled",
        ] {
            assert_eq!(JobStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(JobStatus::parse("bogus").is_none());
    }
}
