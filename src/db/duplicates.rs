//! Duplicate groups and their member decisions.

use rusqlite::{params, Row};

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction {
    KeepPrimary,
    Shortcut,
    KeepBoth,
    Delete,
}

impl MemberAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberAction::KeepPrimary => "keep_primary",
            MemberAction::Shortcut => "shortcut",
            MemberAction::KeepBoth => "keep_both",
            MemberAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "keep_primary" => MemberAction::KeepPrimary,
            "shortcut" => MemberAction::Shortcut,
            "keep_both" => MemberAction::KeepBoth,
            "delete" => MemberAction::Delete,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub id: i64,
    pub job_id: String,
    pub content_hash: String,
    pub file_count: i64,
    pub total_size: i64,
    pub primary_document_id: i64,
    pub decision_reasoning: Option<String>,
    pub decided_by: String,
}

#[derive(Debug, Clone)]
pub struct DuplicateMember {
    pub id: i64,
    pub group_id: i64,
    pub document_id: i64,
    pub is_primary: bool,
    pub action: MemberAction,
    pub action_reasoning: Option<String>,
    pub shortcut_target_path: Option<String>,
}

impl DuplicateMember {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<DuplicateMember> {
        let action_str: String = row.get(4)?;
        Ok(DuplicateMember {
            id: row.get(0)?,
            group_id: row.get(1)?,
            document_id: row.get(2)?,
            is_primary: row.get::<_, i64>(3)? != 0,
            action: MemberAction::parse(&action_str).unwrap_or(MemberAction::KeepBoth),
            action_reasoning: row.get(5)?,
            shortcut_target_path: row.get(6)?,
        })
    }
}

/// A resolved decision for one group, ready to persist.
#[derive(Debug, Clone)]
pub struct DuplicateDecision {
    pub content_hash: String,
    pub total_size: i64,
    pub primary_document_id: i64,
    pub decided_by: &'static str,
    pub reasoning: Option<String>,
    /// (document_id, action, reasoning); must include the primary.
    pub members: Vec<(i64, MemberAction, Option<String>)>,
}

impl DuplicateGroup {
    /// Persist a group and all its members atomically. Upserts so a
    /// restarted phase overwrites its previous decision.
    pub fn store_decision(db: &mut Database, job_id: &str, decision: &DuplicateDecision) -> Result<i64> {
        let tx = db.conn.transaction()?;

        tx.execute(
            "INSERT INTO duplicate_groups \
             (job_id, content_hash, file_count, total_size, primary_document_id, \
              decision_reasoning, decided_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (job_id, content_hash) DO UPDATE SET \
                 file_count = excluded.file_count, \
                 total_size = excluded.total_size, \
                 primary_document_id = excluded.primary_document_id, \
                 decision_reasoning = excluded.decision_reasoning, \
                 decided_by = excluded.decided_by",
            params![
                job_id,
                decision.content_hash,
                decision.members.len() as i64,
                decision.total_size,
                decision.primary_document_id,
                decision.reasoning,
                decision.decided_by
            ],
        )?;

        let group_id: i64 = tx.query_row(
            "SELECT id FROM duplicate_groups WHERE job_id = ?1 AND content_hash = ?2",
            params![job_id, decision.content_hash],
            |row| row.get(0),
        )?;

        for (doc_id, action, reasoning) in &decision.members {
            let is_primary = *doc_id == decision.primary_document_id;
            tx.execute(
                "INSERT INTO duplicate_members \
                 (group_id, document_id, is_primary, action, action_reasoning) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (group_id, document_id) DO UPDATE SET \
                     is_primary = excluded.is_primary, \
                     action = excluded.action, \
                     action_reasoning = excluded.action_reasoning",
                params![group_id, doc_id, is_primary as i64, action.as_str(), reasoning],
            )?;
        }

        tx.commit()?;
        Ok(group_id)
    }

    pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = db.conn().prepare(
            "SELECT id, job_id, content_hash, file_count, total_size, primary_document_id, \
             decision_reasoning, decided_by FROM duplicate_groups WHERE job_id = ?1 ORDER BY id",
        )?;
        let groups = stmt
            .query_map([job_id], |row| {
                Ok(DuplicateGroup {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    content_hash: row.get(2)?,
                    file_count: row.get(3)?,
                    total_size: row.get(4)?,
                    primary_document_id: row.get(5)?,
                    decision_reasoning: row.get(6)?,
                    decided_by: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn members(db: &Database, group_id: i64) -> Result<Vec<DuplicateMember>> {
        let mut stmt = db.conn().prepare(
            "SELECT id, group_id, document_id, is_primary, action, action_reasoning, \
             shortcut_target_path FROM duplicate_members WHERE group_id = ?1 ORDER BY id",
        )?;
        let members = stmt
            .query_map([group_id], DuplicateMember::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    /// All shortcut members for a job joined with their group's primary.
    pub fn shortcut_members(db: &Database, job_id: &str) -> Result<Vec<(DuplicateMember, i64)>> {
        let mut stmt = db.conn().prepare(
            "SELECT dm.id, dm.group_id, dm.document_id, dm.is_primary, dm.action, \
             dm.action_reasoning, dm.shortcut_target_path, dg.primary_document_id \
             FROM duplicate_members dm \
             JOIN duplicate_groups dg ON dm.group_id = dg.id \
             WHERE dg.job_id = ?1 AND dm.action = 'shortcut' \
             ORDER BY dm.id",
        )?;
        let members = stmt
            .query_map([job_id], |row| {
                let member = DuplicateMember::from_row(row)?;
                let primary_id: i64 = row.get(7)?;
                Ok((member, primary_id))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    pub fn set_shortcut_target(db: &Database, member_id: i64, target: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE duplicate_members SET shortcut_target_path = ?1 WHERE id = ?2",
            params![target, member_id],
        )?;
        Ok(())
    }

    pub fn clear_shortcut_targets(db: &Database, job_id: &str) -> Result<()> {
        db.conn().execute(
            "UPDATE duplicate_members SET shortcut_target_path = NULL \
             WHERE group_id IN (SELECT id FROM duplicate_groups WHERE job_id = ?1)",
            [job_id],
        )?;
        Ok(())
    }

    pub fn count_for_job(db: &Database, job_id: &str) -> Result<i64> {
        let count = db.conn().query_row(
            "SELECT COUNT(*) FROM duplicate_groups WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
