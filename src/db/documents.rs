//! Document inventory rows.

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::Result;

/// Item lifecycle. Transitions are monotonic in this order; `Error` is
/// terminal for the item and `Skipped` marks intentionally untouched files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentStatus {
    Discovered,
    Processing,
    Processed,
    Organizing,
    Organized,
    PendingApply,
    Applying,
    Applied,
    Error,
    Skipped,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Discovered => "discovered",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Organizing => "organizing",
            DocumentStatus::Organized => "organized",
            DocumentStatus::PendingApply => "pending_apply",
            DocumentStatus::Applying => "applying",
            DocumentStatus::Applied => "applied",
            DocumentStatus::Error => "error",
            DocumentStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "discovered" => DocumentStatus::Discovered,
            "processing" => DocumentStatus::Processing,
            "processed" => DocumentStatus::Processed,
            "organizing" => DocumentStatus::Organizing,
            "organized" => DocumentStatus::Organized,
            "pending_apply" => DocumentStatus::PendingApply,
            "applying" => DocumentStatus::Applying,
            "applied" => DocumentStatus::Applied,
            "error" => DocumentStatus::Error,
            "skipped" => DocumentStatus::Skipped,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DocumentItem {
    pub id: i64,
    pub job_id: String,
    pub file_id: String,
    pub current_name: String,
    pub current_path: String,
    pub extension: String,
    pub file_size: i64,
    pub mime_type: String,
    pub content_hash: Option<String>,
    pub source_mtime: Option<String>,
    pub content_summary: Option<String>,
    pub document_type: Option<String>,
    pub key_topics: Vec<String>,
    pub proposed_name: Option<String>,
    pub proposed_path: Option<String>,
    pub proposed_tags: Vec<String>,
    pub organization_reasoning: Option<String>,
    pub final_name: Option<String>,
    pub final_path: Option<String>,
    pub status: DocumentStatus,
    pub changes_applied: bool,
    pub is_deleted: bool,
    pub error_message: Option<String>,
}

impl DocumentItem {
    /// Relative path of the source file, directory + name.
    pub fn relative_path(&self) -> String {
        if self.current_path.is_empty() {
            self.current_name.clone()
        } else {
            format!("{}/{}", self.current_path, self.current_name)
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<DocumentItem> {
        let status_str: String = row.get(18)?;
        let topics_json: Option<String> = row.get(12)?;
        let tags_json: Option<String> = row.get(15)?;
        Ok(DocumentItem {
            id: row.get(0)?,
            job_id: row.get(1)?,
            file_id: row.get(2)?,
            current_name: row.get(3)?,
            current_path: row.get(4)?,
            extension: row.get(5)?,
            file_size: row.get(6)?,
            mime_type: row.get(7)?,
            content_hash: row.get(8)?,
            source_mtime: row.get(9)?,
            content_summary: row.get(10)?,
            document_type: row.get(11)?,
            key_topics: parse_json_list(topics_json),
            proposed_name: row.get(13)?,
            proposed_path: row.get(14)?,
            proposed_tags: parse_json_list(tags_json),
            organization_reasoning: row.get(16)?,
            final_name: row.get(19)?,
            final_path: row.get(20)?,
            status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Error),
            changes_applied: row.get::<_, i64>(21)? != 0,
            is_deleted: row.get::<_, i64>(17)? != 0,
            error_message: row.get(22)?,
        })
    }
}

fn parse_json_list(json: Option<String>) -> Vec<String> {
    json.and_then(|j| serde_json::from_str(&j).ok())
        .unwrap_or_default()
}

const SELECT_COLUMNS: &str = "id, job_id, file_id, current_name, current_path, extension, \
     file_size, mime_type, content_hash, source_mtime, content_summary, document_type, \
     key_topics, proposed_name, proposed_path, proposed_tags, organization_reasoning, \
     is_deleted, status, final_name, final_path, changes_applied, error_message";

/// Everything the indexer knows about a file after hashing, extraction and
/// summarization.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_id: String,
    pub current_name: String,
    pub current_path: String,
    pub extension: String,
    pub file_size: i64,
    pub mime_type: String,
    pub content_hash: String,
    pub source_mtime: Option<String>,
    pub content_summary: Option<String>,
    pub document_type: Option<String>,
    pub key_topics: Vec<String>,
}

impl DocumentItem {
    pub fn get(db: &Database, id: i64) -> Result<Option<DocumentItem>> {
        let item = db
            .conn()
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM document_items WHERE id = ?1"),
                [id],
                DocumentItem::from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<DocumentItem>> {
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM document_items WHERE job_id = ?1 \
             ORDER BY current_path, current_name"
        ))?;
        let items = stmt
            .query_map([job_id], DocumentItem::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Insert a placeholder row so a crash mid-index leaves a trace.
    /// Idempotent on (job, file_id).
    pub fn insert_discovered(
        db: &Database,
        job_id: &str,
        file_id: &str,
        name: &str,
        path: &str,
        extension: &str,
        file_size: i64,
        mime_type: &str,
    ) -> Result<i64> {
        db.conn().execute(
            "INSERT INTO document_items \
             (job_id, file_id, current_name, current_path, extension, file_size, mime_type, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'discovered') \
             ON CONFLICT (job_id, file_id) DO UPDATE SET \
                 current_name = excluded.current_name, \
                 current_path = excluded.current_path, \
                 file_size = excluded.file_size",
            params![job_id, file_id, name, path, extension, file_size, mime_type],
        )?;
        let id: i64 = db.conn().query_row(
            "SELECT id FROM document_items WHERE job_id = ?1 AND file_id = ?2",
            params![job_id, file_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Record the full index result and move the item to `processed`.
    pub fn apply_index_result(db: &Database, job_id: &str, doc: &NewDocument) -> Result<()> {
        let topics = serde_json::to_string(&doc.key_topics)?;
        db.conn().execute(
            "UPDATE document_items SET \
                 content_hash = ?1, source_mtime = ?2, content_summary = ?3, \
                 document_type = ?4, key_topics = ?5, file_size = ?6, mime_type = ?7, \
                 status = 'processed', error_message = NULL \
             WHERE job_id = ?8 AND file_id = ?9",
            params![
                doc.content_hash,
                doc.source_mtime,
                doc.content_summary,
                doc.document_type,
                topics,
                doc.file_size,
                doc.mime_type,
                job_id,
                doc.file_id
            ],
        )?;
        Ok(())
    }

    /// Attach the local model's summary to an already-processed item.
    pub fn apply_summary(
        db: &Database,
        job_id: &str,
        file_id: &str,
        summary: &str,
        document_type: Option<&str>,
        key_topics: &[String],
    ) -> Result<()> {
        let topics = serde_json::to_string(key_topics)?;
        db.conn().execute(
            "UPDATE document_items SET content_summary = ?1, document_type = ?2, \
             key_topics = ?3 WHERE job_id = ?4 AND file_id = ?5",
            params![summary, document_type, topics, job_id, file_id],
        )?;
        Ok(())
    }

    pub fn status_for(db: &Database, job_id: &str, file_id: &str) -> Result<Option<DocumentStatus>> {
        let status: Option<String> = db
            .conn()
            .query_row(
                "SELECT status FROM document_items WHERE job_id = ?1 AND file_id = ?2",
                params![job_id, file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| DocumentStatus::parse(&s)))
    }

    pub fn mark_error(db: &Database, job_id: &str, file_id: &str, message: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE document_items SET status = 'error', error_message = ?1 \
             WHERE job_id = ?2 AND file_id = ?3",
            params![message, job_id, file_id],
        )?;
        Ok(())
    }

    /// Items eligible for duplicate and version analysis: hashed, live, and
    /// not already claimed as a shortcut duplicate or chain member.
    pub fn list_unclaimed(db: &Database, job_id: &str) -> Result<Vec<DocumentItem>> {
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM document_items d \
             WHERE d.job_id = ?1 \
               AND d.content_hash IS NOT NULL \
               AND d.is_deleted = 0 \
               AND NOT EXISTS (SELECT 1 FROM duplicate_members dm \
                               WHERE dm.document_id = d.id AND dm.action = 'shortcut') \
               AND NOT EXISTS (SELECT 1 FROM version_chain_members vcm \
                               WHERE vcm.document_id = d.id) \
             ORDER BY d.current_path, d.current_name"
        ))?;
        let items = stmt
            .query_map([job_id], DocumentItem::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// The planning set: processed, live, not a shortcut duplicate, not a
    /// superseded version.
    pub fn planning_set(db: &Database, job_id: &str) -> Result<Vec<DocumentItem>> {
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM document_items d \
             WHERE d.job_id = ?1 \
               AND d.status IN ('processed', 'organized') \
               AND d.is_deleted = 0 \
               AND NOT EXISTS (SELECT 1 FROM duplicate_members dm \
                               WHERE dm.document_id = d.id AND dm.action = 'shortcut') \
               AND NOT EXISTS (SELECT 1 FROM version_chain_members vcm \
                               WHERE vcm.document_id = d.id AND vcm.status = 'superseded') \
             ORDER BY d.current_path, d.current_name"
        ))?;
        let items = stmt
            .query_map([job_id], DocumentItem::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Items the executor materializes: everything organized plus shortcut
    /// duplicates are excluded (they become shortcuts, not copies).
    pub fn execution_set(db: &Database, job_id: &str) -> Result<Vec<DocumentItem>> {
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM document_items d \
             WHERE d.job_id = ?1 \
               AND d.status IN ('organized', 'pending_apply') \
               AND d.is_deleted = 0 \
               AND NOT EXISTS (SELECT 1 FROM duplicate_members dm \
                               WHERE dm.document_id = d.id AND dm.action = 'shortcut') \
             ORDER BY d.current_path, d.current_name"
        ))?;
        let items = stmt
            .query_map([job_id], DocumentItem::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn set_proposal(
        db: &Database,
        doc_id: i64,
        proposed_name: Option<&str>,
        proposed_path: Option<&str>,
        proposed_tags: &[String],
        reasoning: Option<&str>,
        batch_id: &str,
    ) -> Result<()> {
        let tags = serde_json::to_string(proposed_tags)?;
        db.conn().execute(
            "UPDATE document_items SET \
                 proposed_name = ?1, proposed_path = ?2, proposed_tags = ?3, \
                 organization_reasoning = ?4, organization_batch_id = ?5, \
                 status = 'organized' \
             WHERE id = ?6",
            params![proposed_name, proposed_path, tags, reasoning, batch_id, doc_id],
        )?;
        Ok(())
    }

    pub fn mark_applied(
        db: &Database,
        doc_id: i64,
        final_name: &str,
        final_path: &str,
        changed: bool,
    ) -> Result<()> {
        db.conn().execute(
            "UPDATE document_items SET final_name = ?1, final_path = ?2, \
             changes_applied = ?3, status = 'applied' WHERE id = ?4",
            params![final_name, final_path, changed as i64, doc_id],
        )?;
        Ok(())
    }

    /// Reset execution outcome for rollback; plan rows stay intact.
    /// Superseded chain members go back to `processed` (they are archived
    /// by the executor, never planned).
    pub fn reset_to_organized(db: &Database, job_id: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE document_items SET status = 'organized', changes_applied = 0, \
             final_name = NULL, final_path = NULL \
             WHERE job_id = ?1 AND status IN ('pending_apply', 'applying', 'applied')",
            [job_id],
        )?;
        db.conn().execute(
            "UPDATE document_items SET status = 'processed' \
             WHERE job_id = ?1 AND status = 'organized' \
               AND EXISTS (SELECT 1 FROM version_chain_members vcm \
                           WHERE vcm.document_id = document_items.id \
                             AND vcm.status = 'superseded')",
            [job_id],
        )?;
        Ok(())
    }

    pub fn count_by_status(db: &Database, job_id: &str, status: DocumentStatus) -> Result<i64> {
        let count = db.conn().query_row(
            "SELECT COUNT(*) FROM document_items WHERE job_id = ?1 AND status = ?2",
            params![job_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
