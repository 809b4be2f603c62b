//! Version chains and their members.

use rusqlite::{params, Row};

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Active,
    Superseded,
    Archived,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Active => "active",
            ChainStatus::Superseded => "superseded",
            ChainStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => ChainStatus::Active,
            "superseded" => ChainStatus::Superseded,
            "archived" => ChainStatus::Archived,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VersionChain {
    pub id: i64,
    pub job_id: String,
    pub chain_name: String,
    pub base_path: String,
    pub current_document_id: i64,
    pub current_version_number: i64,
    pub detection_method: String,
    pub detection_confidence: f64,
    pub llm_reasoning: Option<String>,
    pub version_order_confirmed: bool,
    pub archive_strategy: String,
    pub archive_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VersionChainMember {
    pub id: i64,
    pub chain_id: i64,
    pub document_id: i64,
    pub version_number: i64,
    pub version_label: Option<String>,
    pub version_date: Option<String>,
    pub is_current: bool,
    pub status: ChainStatus,
    pub proposed_version_name: Option<String>,
    pub proposed_version_path: Option<String>,
}

impl VersionChainMember {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<VersionChainMember> {
        let status_str: String = row.get(7)?;
        Ok(VersionChainMember {
            id: row.get(0)?,
            chain_id: row.get(1)?,
            document_id: row.get(2)?,
            version_number: row.get(3)?,
            version_label: row.get(4)?,
            version_date: row.get(5)?,
            is_current: row.get::<_, i64>(6)? != 0,
            status: ChainStatus::parse(&status_str).unwrap_or(ChainStatus::Superseded),
            proposed_version_name: row.get(8)?,
            proposed_version_path: row.get(9)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewChain {
    pub chain_name: String,
    pub base_path: String,
    pub current_document_id: i64,
    pub current_version_number: i64,
    pub detection_method: &'static str,
    pub detection_confidence: f64,
    pub llm_reasoning: Option<String>,
    pub version_order_confirmed: bool,
    pub archive_strategy: &'static str,
    pub archive_path: String,
}

#[derive(Debug, Clone)]
pub struct NewChainMember {
    pub document_id: i64,
    pub version_number: i64,
    pub version_label: Option<String>,
    pub version_date: Option<String>,
    pub is_current: bool,
    pub status: ChainStatus,
    pub proposed_version_name: String,
    pub proposed_version_path: String,
}

impl VersionChain {
    /// Persist a chain with all members in one transaction.
    pub fn store(
        db: &mut Database,
        job_id: &str,
        chain: &NewChain,
        members: &[NewChainMember],
    ) -> Result<i64> {
        let tx = db.conn.transaction()?;

        tx.execute(
            "INSERT INTO version_chains \
             (job_id, chain_name, base_path, current_document_id, current_version_number, \
              detection_method, detection_confidence, llm_reasoning, version_order_confirmed, \
              archive_strategy, archive_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job_id,
                chain.chain_name,
                chain.base_path,
                chain.current_document_id,
                chain.current_version_number,
                chain.detection_method,
                chain.detection_confidence,
                chain.llm_reasoning,
                chain.version_order_confirmed as i64,
                chain.archive_strategy,
                chain.archive_path
            ],
        )?;
        let chain_id = tx.last_insert_rowid();

        for member in members {
            tx.execute(
                "INSERT INTO version_chain_members \
                 (chain_id, document_id, version_number, version_label, version_date, \
                  is_current, status, proposed_version_name, proposed_version_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    chain_id,
                    member.document_id,
                    member.version_number,
                    member.version_label,
                    member.version_date,
                    member.is_current as i64,
                    member.status.as_str(),
                    member.proposed_version_name,
                    member.proposed_version_path
                ],
            )?;
        }

        tx.commit()?;
        Ok(chain_id)
    }

    pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<VersionChain>> {
        let mut stmt = db.conn().prepare(
            "SELECT id, job_id, chain_name, base_path, current_document_id, \
             current_version_number, detection_method, detection_confidence, llm_reasoning, \
             version_order_confirmed, archive_strategy, archive_path \
             FROM version_chains WHERE job_id = ?1 ORDER BY id",
        )?;
        let chains = stmt
            .query_map([job_id], |row| {
                Ok(VersionChain {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    chain_name: row.get(2)?,
                    base_path: row.get(3)?,
                    current_document_id: row.get(4)?,
                    current_version_number: row.get(5)?,
                    detection_method: row.get(6)?,
                    detection_confidence: row.get(7)?,
                    llm_reasoning: row.get(8)?,
                    version_order_confirmed: row.get::<_, i64>(9)? != 0,
                    archive_strategy: row.get(10)?,
                    archive_path: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chains)
    }

    pub fn members(db: &Database, chain_id: i64) -> Result<Vec<VersionChainMember>> {
        let mut stmt = db.conn().prepare(
            "SELECT id, chain_id, document_id, version_number, version_label, version_date, \
             is_current, status, proposed_version_name, proposed_version_path \
             FROM version_chain_members WHERE chain_id = ?1 ORDER BY version_number",
        )?;
        let members = stmt
            .query_map([chain_id], VersionChainMember::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    /// Chain membership per document: (document_id, chain_name, is_current).
    pub fn membership_for_job(db: &Database, job_id: &str) -> Result<Vec<(i64, String, bool)>> {
        let mut stmt = db.conn().prepare(
            "SELECT vcm.document_id, vc.chain_name, vcm.is_current \
             FROM version_chain_members vcm \
             JOIN version_chains vc ON vcm.chain_id = vc.id \
             WHERE vc.job_id = ?1",
        )?;
        let rows = stmt
            .query_map([job_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_for_job(db: &Database, job_id: &str) -> Result<i64> {
        let count = db.conn().query_row(
            "SELECT COUNT(*) FROM version_chains WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
