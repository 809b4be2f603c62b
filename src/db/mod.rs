//! Relational store gateway.
//!
//! Each worker thread opens its own connection (SQLite connections are not
//! Sync); WAL mode keeps concurrent readers and the single writer happy.
//! Multi-row mutations for one entity always go through a transaction.

mod documents;
mod duplicates;
mod execution;
mod jobs;
mod plan;
mod schema;
mod versions;

use rusqlite::Connection;
use std::path::Path;

use crate::error::Result;

pub use documents::{DocumentItem, DocumentStatus, NewDocument};
pub use duplicates::{DuplicateDecision, DuplicateGroup, DuplicateMember, MemberAction};
pub use execution::{ExecutionLogEntry, ShortcutRecord};
pub use jobs::{Job, JobPhase, JobStatus};
pub use plan::{DirectoryEntry, NamingSchemaRow, PlanArtifacts, TagRow};
pub use schema::SCHEMA;
pub use versions::{ChainStatus, NewChain, NewChainMember, VersionChain, VersionChainMember};

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Delete every row owned by a job, the job row last.
    pub fn purge_job(&mut self, job_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM duplicate_members WHERE group_id IN \
             (SELECT id FROM duplicate_groups WHERE job_id = ?1)",
            [job_id],
        )?;
        tx.execute("DELETE FROM duplicate_groups WHERE job_id = ?1", [job_id])?;
        tx.execute(
            "DELETE FROM version_chain_members WHERE chain_id IN \
             (SELECT id FROM version_chains WHERE job_id = ?1)",
            [job_id],
        )?;
        tx.execute("DELETE FROM version_chains WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM naming_schemas WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM tag_taxonomy WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM directory_structure WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM shortcut_records WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM execution_log WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM document_items WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", [job_id])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes() {
        let db = Database::open_in_memory().unwrap();
        // Running twice must be harmless.
        db.initialize().unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_purge_job_removes_owned_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "/data/input/test.zip").unwrap();
        db.conn()
            .execute(
                "INSERT INTO document_items (job_id, file_id, current_name, current_path, \
                 extension, file_size, mime_type) VALUES (?1, 'f1', 'a.txt', '', 'txt', 1, 'text/plain')",
                [&job.id],
            )
            .unwrap();

        db.purge_job(&job.id).unwrap();

        let docs: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM document_items", [], |row| row.get(0))
            .unwrap();
        let jobs: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(docs, 0);
        assert_eq!(jobs, 0);
    }
}
