//! Organization plan artifacts: naming schemas, tag taxonomy, directory
//! structure and per-document assignments.
//!
//! The whole plan for a batch persists in a single transaction so a failed
//! planning run never leaves a half-written plan behind.

use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

use super::Database;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct NamingSchemaRow {
    pub document_type: String,
    pub naming_pattern: String,
    pub example: Option<String>,
    pub description: Option<String>,
    /// token -> human description
    pub placeholder_definitions: HashMap<String, String>,
}

/// One taxonomy node; `parent` names another tag in the same batch and must
/// appear earlier in the flattened list (topological order).
#[derive(Debug, Clone)]
pub struct TagRow {
    pub tag_name: String,
    pub parent: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub path: String,
    pub folder_name: String,
    pub parent_path: Option<String>,
    pub depth: i64,
    pub purpose: Option<String>,
    pub expected_tags: Vec<String>,
    pub expected_document_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanArtifacts {
    pub batch_id: String,
    pub schemas: Vec<NamingSchemaRow>,
    /// Flattened taxonomy, parents before children.
    pub tags: Vec<TagRow>,
    /// Directory entries; persisted shallowest first.
    pub directories: Vec<DirectoryEntry>,
    /// (document_id, proposed_name, proposed_path, tags, reasoning).
    /// Both name and path `None` means "unchanged".
    pub assignments: Vec<(i64, Option<String>, Option<String>, Vec<String>, Option<String>)>,
}

impl PlanArtifacts {
    pub fn store(&self, db: &mut Database, job_id: &str) -> Result<()> {
        let tx = db.conn.transaction()?;

        // Clear any prior plan for this job; a re-planned job replaces its
        // artifacts wholesale.
        tx.execute("DELETE FROM naming_schemas WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM tag_taxonomy WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM directory_structure WHERE job_id = ?1", [job_id])?;

        for schema in &self.schemas {
            let placeholders = serde_json::to_string(&schema.placeholder_definitions)?;
            tx.execute(
                "INSERT INTO naming_schemas \
                 (job_id, batch_id, document_type, naming_pattern, example, description, \
                  placeholder_definitions) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job_id,
                    self.batch_id,
                    schema.document_type,
                    schema.naming_pattern,
                    schema.example,
                    schema.description,
                    placeholders
                ],
            )?;
        }

        // Parents first; a child naming an unknown parent is a validation
        // breach the planner should have caught.
        let mut tag_ids: HashMap<String, i64> = HashMap::new();
        for tag in &self.tags {
            let parent_id = match &tag.parent {
                Some(parent) => Some(*tag_ids.get(parent).ok_or_else(|| {
                    PipelineError::validation(format!(
                        "tag '{}' references unknown parent '{}'",
                        tag.tag_name, parent
                    ))
                })?),
                None => None,
            };
            tx.execute(
                "INSERT INTO tag_taxonomy (job_id, batch_id, tag_name, parent_id, description) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![job_id, self.batch_id, tag.tag_name, parent_id, tag.description],
            )?;
            tag_ids.insert(tag.tag_name.clone(), tx.last_insert_rowid());
        }

        let mut directories = self.directories.clone();
        directories.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.path.cmp(&b.path)));
        for dir in &directories {
            let tags = serde_json::to_string(&dir.expected_tags)?;
            let types = serde_json::to_string(&dir.expected_document_types)?;
            tx.execute(
                "INSERT INTO directory_structure \
                 (job_id, batch_id, path, folder_name, parent_path, depth, purpose, \
                  expected_tags, expected_document_types) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job_id,
                    self.batch_id,
                    dir.path,
                    dir.folder_name,
                    dir.parent_path,
                    dir.depth,
                    dir.purpose,
                    tags,
                    types
                ],
            )?;
        }

        for (doc_id, name, path, tags, reasoning) in &self.assignments {
            let tags_json = serde_json::to_string(tags)?;
            tx.execute(
                "UPDATE document_items SET \
                     proposed_name = ?1, proposed_path = ?2, proposed_tags = ?3, \
                     organization_reasoning = ?4, organization_batch_id = ?5, \
                     status = 'organized' \
                 WHERE id = ?6",
                params![name, path, tags_json, reasoning, self.batch_id, doc_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_directories(db: &Database, job_id: &str) -> Result<Vec<DirectoryEntry>> {
        let mut stmt = db.conn().prepare(
            "SELECT path, folder_name, parent_path, depth, purpose, expected_tags, \
             expected_document_types FROM directory_structure \
             WHERE job_id = ?1 ORDER BY depth, path",
        )?;
        let dirs = stmt
            .query_map([job_id], |row| {
                let tags_json: Option<String> = row.get(5)?;
                let types_json: Option<String> = row.get(6)?;
                Ok(DirectoryEntry {
                    path: row.get(0)?,
                    folder_name: row.get(1)?,
                    parent_path: row.get(2)?,
                    depth: row.get(3)?,
                    purpose: row.get(4)?,
                    expected_tags: tags_json
                        .and_then(|j| serde_json::from_str(&j).ok())
                        .unwrap_or_default(),
                    expected_document_types: types_json
                        .and_then(|j| serde_json::from_str(&j).ok())
                        .unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dirs)
    }

    pub fn tag_exists(db: &Database, job_id: &str, tag_name: &str) -> Result<bool> {
        let found: Option<i64> = db
            .conn()
            .query_row(
                "SELECT id FROM tag_taxonomy WHERE job_id = ?1 AND tag_name = ?2",
                params![job_id, tag_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentItem, Job};

    fn sample_plan(doc_id: i64) -> PlanArtifacts {
        PlanArtifacts {
            batch_id: "batch-1".to_string(),
            schemas: vec![NamingSchemaRow {
                document_type: "report".to_string(),
                naming_pattern: "{date}_{topic}_report.{ext}".to_string(),
                example: Some("2024-03-01_budget_report.pdf".to_string()),
                description: None,
                placeholder_definitions: HashMap::from([(
                    "date".to_string(),
                    "ISO date of the report".to_string(),
                )]),
            }],
            tags: vec![
                TagRow {
                    tag_name: "finance".to_string(),
                    parent: None,
                    description: None,
                },
                TagRow {
                    tag_name: "budget".to_string(),
                    parent: Some("finance".to_string()),
                    description: None,
                },
            ],
            directories: vec![
                DirectoryEntry {
                    path: "/Finance/Budgets".to_string(),
                    folder_name: "Budgets".to_string(),
                    parent_path: Some("/Finance".to_string()),
                    depth: 2,
                    purpose: None,
                    expected_tags: vec!["budget".to_string()],
                    expected_document_types: vec!["xlsx".to_string()],
                },
                DirectoryEntry {
                    path: "/Finance".to_string(),
                    folder_name: "Finance".to_string(),
                    parent_path: None,
                    depth: 1,
                    purpose: None,
                    expected_tags: vec![],
                    expected_document_types: vec![],
                },
            ],
            assignments: vec![(
                doc_id,
                Some("budget-2024.xlsx".to_string()),
                Some("/Finance/Budgets".to_string()),
                vec!["budget".to_string()],
                Some("spreadsheet of yearly budget".to_string()),
            )],
        }
    }

    #[test]
    fn test_store_plan_atomically() {
        let mut db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "a.zip").unwrap();
        let doc = DocumentItem::insert_discovered(
            &db, &job.id, "f1", "budget.xlsx", "", "xlsx", 10, "application/vnd.ms-excel",
        )
        .unwrap();

        sample_plan(doc).store(&mut db, &job.id).unwrap();

        let dirs = PlanArtifacts::load_directories(&db, &job.id).unwrap();
        assert_eq!(dirs.len(), 2);
        // Shallowest first.
        assert_eq!(dirs[0].path, "/Finance");
        assert!(PlanArtifacts::tag_exists(&db, &job.id, "budget").unwrap());

        let item = DocumentItem::get(&db, doc).unwrap().unwrap();
        assert_eq!(item.proposed_path.as_deref(), Some("/Finance/Budgets"));
    }

    #[test]
    fn test_unknown_parent_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "a.zip").unwrap();
        let doc = DocumentItem::insert_discovered(
            &db, &job.id, "f1", "a.txt", "", "txt", 1, "text/plain",
        )
        .unwrap();

        let mut plan = sample_plan(doc);
        plan.tags = vec![TagRow {
            tag_name: "orphan".to_string(),
            parent: Some("missing".to_string()),
            description: None,
        }];

        assert!(plan.store(&mut db, &job.id).is_err());
        // Nothing persisted, including directories.
        assert!(PlanArtifacts::load_directories(&db, &job.id).unwrap().is_empty());
    }

    #[test]
    fn test_replan_replaces_batch() {
        let mut db = Database::open_in_memory().unwrap();
        let job = Job::create(&db, "a.zip").unwrap();
        let doc = DocumentItem::insert_discovered(
            &db, &job.id, "f1", "a.txt", "", "txt", 1, "text/plain",
        )
        .unwrap();

        sample_plan(doc).store(&mut db, &job.id).unwrap();
        let mut second = sample_plan(doc);
        second.batch_id = "batch-2".to_string();
        second.directories.pop();
        second.store(&mut db, &job.id).unwrap();

        let dirs = PlanArtifacts::load_directories(&db, &job.id).unwrap();
        assert_eq!(dirs.len(), 1);
    }
}
