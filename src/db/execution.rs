//! Execution trail: shortcut records and the append-only operation log.

use chrono::Utc;
use rusqlite::params;

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ShortcutRecord {
    pub document_id: i64,
    pub shortcut_path: String,
    pub target_path: String,
    pub shortcut_type: String,
    pub original_path: String,
    pub original_hash: Option<String>,
    pub created_at: String,
}

impl ShortcutRecord {
    pub fn insert(db: &Database, job_id: &str, record: &ShortcutRecord) -> Result<()> {
        db.conn().execute(
            "INSERT INTO shortcut_records \
             (job_id, document_id, shortcut_path, target_path, shortcut_type, \
              original_path, original_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job_id,
                record.document_id,
                record.shortcut_path,
                record.target_path,
                record.shortcut_type,
                record.original_path,
                record.original_hash,
                record.created_at
            ],
        )?;
        Ok(())
    }

    pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ShortcutRecord>> {
        let mut stmt = db.conn().prepare(
            "SELECT document_id, shortcut_path, target_path, shortcut_type, original_path, \
             original_hash, created_at FROM shortcut_records WHERE job_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map([job_id], |row| {
                Ok(ShortcutRecord {
                    document_id: row.get(0)?,
                    shortcut_path: row.get(1)?,
                    target_path: row.get(2)?,
                    shortcut_type: row.get(3)?,
                    original_path: row.get(4)?,
                    original_hash: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn clear_for_job(db: &Database, job_id: &str) -> Result<()> {
        db.conn()
            .execute("DELETE FROM shortcut_records WHERE job_id = ?1", [job_id])?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionLogEntry {
    pub operation: String,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub document_id: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub executed_at: String,
}

impl ExecutionLogEntry {
    pub fn record(
        db: &Database,
        job_id: &str,
        operation: &str,
        source_path: Option<&str>,
        target_path: Option<&str>,
        document_id: Option<i64>,
        success: bool,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        db.conn().execute(
            "INSERT INTO execution_log \
             (job_id, operation, source_path, target_path, document_id, success, \
              error_message, duration_ms, executed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job_id,
                operation,
                source_path,
                target_path,
                document_id,
                success as i64,
                error_message,
                duration_ms,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let mut stmt = db.conn().prepare(
            "SELECT operation, source_path, target_path, document_id, success, error_message, \
             duration_ms, executed_at FROM execution_log WHERE job_id = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map([job_id], |row| {
                Ok(ExecutionLogEntry {
                    operation: row.get(0)?,
                    source_path: row.get(1)?,
                    target_path: row.get(2)?,
                    document_id: row.get(3)?,
                    success: row.get::<_, i64>(4)? != 0,
                    error_message: row.get(5)?,
                    duration_ms: row.get(6)?,
                    executed_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn clear_for_job(db: &Database, job_id: &str) -> Result<()> {
        db.conn()
            .execute("DELETE FROM execution_log WHERE job_id = ?1", [job_id])?;
        Ok(())
    }
}
