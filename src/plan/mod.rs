//! Organization planning phase.
//!
//! Assembles the surviving inventory into one deliberative call to the
//! remote model, then validates the returned plan against referential
//! constraints before anything is persisted. Validation failures reject
//! the whole plan; nothing destructive has happened yet at this point.

pub mod prompt;
pub mod schema;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use uuid::Uuid;

use crate::db::{
    Database, DirectoryEntry, DocumentItem, NamingSchemaRow, PlanArtifacts, TagRow, VersionChain,
};
use crate::error::{ErrorKind, PipelineError, Result};
use crate::llm::RemoteLlm;
use prompt::ItemContext;
use schema::{PlanResponse, TaxonomyNode};

/// Planning fails when more than this share of the planning set has no
/// assignment.
const MAX_UNASSIGNED_RATIO: f64 = 0.10;

/// Tag hierarchy depth accepted from the model.
const MAX_TAG_DEPTH: usize = 3;

const UNCATEGORIZED_DIR: &str = "/_Uncategorized";
const UNCATEGORIZED_TAG: &str = "uncategorized";

#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub planned_files: usize,
    pub files_with_changes: usize,
    pub files_unchanged: usize,
    pub schemas: usize,
    pub tags: usize,
    pub directories: usize,
    pub dropped_tags: usize,
    pub rerouted_files: usize,
}

pub struct Planner;

impl Planner {
    pub fn run(
        db: &mut Database,
        job_id: &str,
        llm: &RemoteLlm,
        cancel: &Arc<AtomicBool>,
    ) -> Result<PlanOutcome> {
        let items = DocumentItem::planning_set(db, job_id)?;
        if items.is_empty() {
            tracing::info!(job_id, "planning set empty, nothing to organize");
            return Ok(PlanOutcome::default());
        }

        let contexts = chain_contexts(db, job_id)?;
        let user_prompt = prompt::build_prompt(&items, &contexts);
        tracing::info!(
            job_id,
            files = items.len(),
            prompt_chars = user_prompt.len(),
            "requesting organization plan"
        );

        let value = llm.deliberate_json(&user_prompt, Some(prompt::SYSTEM_PROMPT), None, cancel)?;
        let response: PlanResponse = serde_json::from_value(value)
            .map_err(|e| PipelineError::malformed(format!("plan JSON shape invalid: {e}")))?;

        let (artifacts, outcome) = validate(job_id, &items, response)?;
        artifacts.store(db, job_id)?;

        tracing::info!(
            job_id,
            assignments = outcome.planned_files,
            changed = outcome.files_with_changes,
            directories = outcome.directories,
            tags = outcome.tags,
            "organization plan persisted"
        );
        Ok(outcome)
    }
}

fn chain_contexts(db: &Database, job_id: &str) -> Result<HashMap<i64, ItemContext>> {
    let mut contexts = HashMap::new();
    for (document_id, chain_name, is_current) in VersionChain::membership_for_job(db, job_id)? {
        contexts.insert(
            document_id,
            ItemContext {
                is_current_version: is_current,
                chain_name: Some(chain_name),
            },
        );
    }
    Ok(contexts)
}

/// Validate the plan against the planning set and referential rules,
/// producing ready-to-persist artifacts.
fn validate(
    job_id: &str,
    items: &[DocumentItem],
    response: PlanResponse,
) -> Result<(PlanArtifacts, PlanOutcome)> {
    let item_ids: HashSet<i64> = items.iter().map(|i| i.id).collect();
    let by_id: HashMap<i64, &DocumentItem> = items.iter().map(|i| (i.id, i)).collect();

    let mut outcome = PlanOutcome::default();

    // -- tags -------------------------------------------------------------
    let mut tags = flatten_taxonomy(&response.tag_taxonomy);
    let mut tag_names: HashSet<String> = tags.iter().map(|t| t.tag_name.clone()).collect();

    // -- directories ------------------------------------------------------
    let mut directories: Vec<DirectoryEntry> = Vec::new();
    let mut known_paths: HashSet<String> = HashSet::new();
    for def in &response.directory_structure {
        let Some(path) = normalize_dir_path(&def.path) else {
            tracing::warn!(job_id, path = %def.path, "dropping invalid directory path");
            continue;
        };
        if !known_paths.insert(path.clone()) {
            continue;
        }
        directories.push(directory_entry(&path, def.purpose.clone(), &def.expected_tags, &def.expected_document_types));
    }

    // -- assignments ------------------------------------------------------
    let mut seen: HashSet<i64> = HashSet::new();
    let mut assignments: Vec<(i64, Option<String>, Option<String>, Vec<String>, Option<String>)> =
        Vec::new();

    for assignment in response.file_assignments {
        if !item_ids.contains(&assignment.file_id) {
            tracing::warn!(job_id, file_id = assignment.file_id, "assignment for unknown file");
            continue;
        }
        if !seen.insert(assignment.file_id) {
            tracing::warn!(job_id, file_id = assignment.file_id, "duplicate assignment, keeping first");
            continue;
        }
        let item = by_id[&assignment.file_id];

        let mut name = assignment.proposed_name.filter(|n| !n.trim().is_empty());
        let mut path = assignment
            .proposed_path
            .as_deref()
            .and_then(normalize_dir_path);

        // A one-sided proposal is completed from the current location so
        // the pair stays both-null or both-set. A rename-in-place keeps
        // its current directory, mirrored into the plan if absent.
        if name.is_some() && path.is_none() {
            let current_dir = current_dir_as_plan_path(item);
            if known_paths.insert(current_dir.clone()) {
                directories.push(directory_entry(&current_dir, None, &[], &[]));
            }
            path = Some(current_dir);
        } else if path.is_some() && name.is_none() {
            name = Some(item.current_name.clone());
        }

        // Reroute to the uncategorized bucket rather than inventing a
        // parent hierarchy for a path the plan never declared.
        let unknown_path = path
            .as_deref()
            .map(|p| !known_paths.contains(p))
            .unwrap_or(false);
        if unknown_path {
            tracing::warn!(
                job_id,
                file_id = assignment.file_id,
                path = path.as_deref().unwrap_or_default(),
                "proposed path not in plan, rerouting"
            );
            outcome.rerouted_files += 1;
            path = Some(UNCATEGORIZED_DIR.to_string());
            if name.is_none() {
                name = Some(item.current_name.clone());
            }
            ensure_uncategorized(&mut directories, &mut known_paths);
        }

        let mut kept_tags = Vec::new();
        for tag in assignment.proposed_tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            if tag == UNCATEGORIZED_TAG {
                ensure_uncategorized_tag(&mut tags, &mut tag_names);
            }
            if tag_names.contains(&tag) {
                kept_tags.push(tag);
            } else {
                tracing::warn!(job_id, tag = %tag, "dropping tag not in taxonomy");
                outcome.dropped_tags += 1;
            }
        }

        if name.is_some() {
            outcome.files_with_changes += 1;
        } else {
            outcome.files_unchanged += 1;
        }
        assignments.push((assignment.file_id, name, path, kept_tags, assignment.reasoning));
    }

    // -- coverage ---------------------------------------------------------
    let missing: Vec<i64> = item_ids
        .iter()
        .filter(|id| !seen.contains(id))
        .copied()
        .collect();
    let ratio = missing.len() as f64 / items.len() as f64;
    if ratio > MAX_UNASSIGNED_RATIO {
        return Err(PipelineError::new(
            ErrorKind::PlanningIncomplete,
            format!(
                "{} of {} planning items unassigned (first missing id {})",
                missing.len(),
                items.len(),
                missing.first().copied().unwrap_or_default()
            ),
        ));
    }
    for id in missing {
        ensure_uncategorized_tag(&mut tags, &mut tag_names);
        outcome.files_unchanged += 1;
        assignments.push((
            id,
            None,
            None,
            vec![UNCATEGORIZED_TAG.to_string()],
            Some("not assigned by the planner, left unchanged".to_string()),
        ));
    }

    outcome.planned_files = assignments.len();
    outcome.schemas = response.naming_schemas.len();
    outcome.directories = directories.len();
    outcome.tags = tags.len();

    let schemas = response
        .naming_schemas
        .into_iter()
        .map(|s| NamingSchemaRow {
            document_type: s.document_type,
            naming_pattern: s.pattern,
            example: s.example,
            description: s.description,
            placeholder_definitions: s.placeholders,
        })
        .collect();

    let artifacts = PlanArtifacts {
        batch_id: Uuid::new_v4().to_string(),
        schemas,
        tags,
        directories,
        assignments,
    };
    Ok((artifacts, outcome))
}

/// Depth-first flattening, parents before children, depth-capped.
fn flatten_taxonomy(taxonomy: &HashMap<String, TaxonomyNode>) -> Vec<TagRow> {
    fn walk(
        nodes: &HashMap<String, TaxonomyNode>,
        parent: Option<&str>,
        depth: usize,
        seen: &mut HashSet<String>,
        out: &mut Vec<TagRow>,
    ) {
        if depth > MAX_TAG_DEPTH {
            tracing::warn!(depth, "tag taxonomy deeper than allowed, pruning");
            return;
        }
        let mut names: Vec<&String> = nodes.keys().collect();
        names.sort();
        for name in names {
            let node = &nodes[name];
            let tag = name.trim().to_lowercase();
            if tag.is_empty() || !seen.insert(tag.clone()) {
                continue;
            }
            out.push(TagRow {
                tag_name: tag.clone(),
                parent: parent.map(|p| p.to_string()),
                description: node.description.clone(),
            });
            walk(&node.children, Some(&tag), depth + 1, seen, out);
        }
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(taxonomy, None, 1, &mut seen, &mut out);
    out
}

/// Normalize a plan directory path: leading slash, no trailing slash,
/// no empty or dot segments.
fn normalize_dir_path(path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return None;
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." {
            return None;
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        return None;
    }
    Some(format!("/{}", segments.join("/")))
}

fn directory_entry(
    path: &str,
    purpose: Option<String>,
    expected_tags: &[String],
    expected_types: &[String],
) -> DirectoryEntry {
    let segments: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let depth = segments.len() as i64;
    let folder_name = segments
        .last()
        .copied()
        .unwrap_or("root")
        .to_string();
    let parent_path = if segments.len() > 1 {
        Some(format!("/{}", segments[..segments.len() - 1].join("/")))
    } else {
        None
    };
    DirectoryEntry {
        path: path.to_string(),
        folder_name,
        parent_path,
        depth,
        purpose,
        expected_tags: expected_tags.to_vec(),
        expected_document_types: expected_types.to_vec(),
    }
}

fn ensure_uncategorized(directories: &mut Vec<DirectoryEntry>, known: &mut HashSet<String>) {
    if known.insert(UNCATEGORIZED_DIR.to_string()) {
        directories.push(directory_entry(
            UNCATEGORIZED_DIR,
            Some("files the plan could not place".to_string()),
            &[UNCATEGORIZED_TAG.to_string()],
            &[],
        ));
    }
}

fn ensure_uncategorized_tag(tags: &mut Vec<TagRow>, names: &mut HashSet<String>) {
    if names.insert(UNCATEGORIZED_TAG.to_string()) {
        tags.push(TagRow {
            tag_name: UNCATEGORIZED_TAG.to_string(),
            parent: None,
            description: Some("files without a content-derived category".to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DocumentStatus;
    use schema::FileAssignment;

    fn make_item(id: i64, name: &str, dir: &str) -> DocumentItem {
        DocumentItem {
            id,
            job_id: "j".to_string(),
            file_id: format!("f{id}"),
            current_name: name.to_string(),
            current_path: dir.to_string(),
            extension: "txt".to_string(),
            file_size: 100,
            mime_type: "text/plain".to_string(),
            content_hash: Some("h".to_string()),
            source_mtime: None,
            content_summary: None,
            document_type: None,
            key_topics: vec![],
            proposed_name: None,
            proposed_path: None,
            proposed_tags: vec![],
            organization_reasoning: None,
            final_name: None,
            final_path: None,
            status: DocumentStatus::Processed,
            changes_applied: false,
            is_deleted: false,
            error_message: None,
        }
    }

    fn assignment(id: i64, name: Option<&str>, path: Option<&str>, tags: &[&str]) -> FileAssignment {
        FileAssignment {
            file_id: id,
            proposed_name: name.map(|s| s.to_string()),
            proposed_path: path.map(|s| s.to_string()),
            proposed_tags: tags.iter().map(|s| s.to_string()).collect(),
            reasoning: None,
        }
    }

    fn base_response() -> PlanResponse {
        let mut taxonomy = HashMap::new();
        taxonomy.insert(
            "docs".to_string(),
            TaxonomyNode {
                description: None,
                children: HashMap::new(),
            },
        );
        PlanResponse {
            naming_schemas: vec![],
            tag_taxonomy: taxonomy,
            directory_structure: vec![schema::DirectoryDef {
                path: "/Docs".to_string(),
                purpose: None,
                expected_tags: vec![],
                expected_document_types: vec![],
            }],
            file_assignments: vec![],
        }
    }

    #[test]
    fn test_rejects_when_too_many_unassigned() {
        let items: Vec<DocumentItem> = (1..=10).map(|i| make_item(i, "a.txt", "")).collect();
        let mut response = base_response();
        // 8 of 10 assigned: 20% missing, above the threshold.
        response.file_assignments = (1..=8)
            .map(|i| assignment(i, None, None, &[]))
            .collect();

        let err = validate("j", &items, response).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlanningIncomplete);
    }

    #[test]
    fn test_defaults_small_gap_to_unchanged() {
        let items: Vec<DocumentItem> = (1..=10).map(|i| make_item(i, "a.txt", "")).collect();
        let mut response = base_response();
        response.file_assignments = (1..=9)
            .map(|i| assignment(i, None, None, &[]))
            .collect();

        let (artifacts, outcome) = validate("j", &items, response).unwrap();
        assert_eq!(outcome.planned_files, 10);
        let defaulted = artifacts
            .assignments
            .iter()
            .find(|(id, _, _, _, _)| *id == 10)
            .unwrap();
        assert!(defaulted.1.is_none());
        assert_eq!(defaulted.3, vec![UNCATEGORIZED_TAG.to_string()]);
        // Synthesized tag present in the taxonomy.
        assert!(artifacts.tags.iter().any(|t| t.tag_name == UNCATEGORIZED_TAG));
    }

    #[test]
    fn test_unknown_directory_reroutes_to_uncategorized() {
        let items = vec![make_item(1, "a.txt", "")];
        let mut response = base_response();
        response.file_assignments =
            vec![assignment(1, Some("a.txt"), Some("/Never/Declared"), &[])];

        let (artifacts, outcome) = validate("j", &items, response).unwrap();
        assert_eq!(outcome.rerouted_files, 1);
        let entry = &artifacts.assignments[0];
        assert_eq!(entry.2.as_deref(), Some(UNCATEGORIZED_DIR));
        assert!(artifacts.directories.iter().any(|d| d.path == UNCATEGORIZED_DIR));
    }

    #[test]
    fn test_unknown_tags_dropped() {
        let items = vec![make_item(1, "a.txt", "")];
        let mut response = base_response();
        response.file_assignments = vec![assignment(
            1,
            Some("b.txt"),
            Some("/Docs"),
            &["docs", "made-up-tag"],
        )];

        let (artifacts, outcome) = validate("j", &items, response).unwrap();
        assert_eq!(outcome.dropped_tags, 1);
        assert_eq!(artifacts.assignments[0].3, vec!["docs".to_string()]);
    }

    #[test]
    fn test_one_sided_proposal_completed() {
        let items = vec![make_item(1, "a.txt", "docs")];
        let mut response = base_response();
        response.file_assignments = vec![assignment(1, None, Some("/Docs"), &[])];

        let (artifacts, _) = validate("j", &items, response).unwrap();
        let entry = &artifacts.assignments[0];
        assert_eq!(entry.1.as_deref(), Some("a.txt"));
        assert_eq!(entry.2.as_deref(), Some("/Docs"));
    }

    #[test]
    fn test_rename_in_place_mirrors_current_dir() {
        let items = vec![make_item(1, "a.txt", "docs")];
        let mut response = base_response();
        response.file_assignments = vec![assignment(1, Some("better-name.txt"), None, &[])];

        let (artifacts, outcome) = validate("j", &items, response).unwrap();
        assert_eq!(outcome.rerouted_files, 0);
        let entry = &artifacts.assignments[0];
        assert_eq!(entry.1.as_deref(), Some("better-name.txt"));
        assert_eq!(entry.2.as_deref(), Some("/docs"));
        assert!(artifacts.directories.iter().any(|d| d.path == "/docs"));
    }

    #[test]
    fn test_taxonomy_flattening_depth_cap() {
        let mut level4_children = HashMap::new();
        level4_children.insert(
            "too-deep".to_string(),
            TaxonomyNode::default(),
        );
        let mut level3_node = TaxonomyNode::default();
        level3_node.children = level4_children;
        let mut level2 = HashMap::new();
        level2.insert("mid".to_string(), TaxonomyNode { description: None, children: HashMap::from([("deep".to_string(), level3_node)]) });
        let taxonomy = HashMap::from([(
            "root".to_string(),
            TaxonomyNode {
                description: None,
                children: level2,
            },
        )]);

        let tags = flatten_taxonomy(&taxonomy);
        let names: Vec<&str> = tags.iter().map(|t| t.tag_name.as_str()).collect();
        assert!(names.contains(&"root"));
        assert!(names.contains(&"mid"));
        assert!(names.contains(&"deep"));
        assert!(!names.contains(&"too-deep"));
        // Parents precede children.
        let root_pos = names.iter().position(|&n| n == "root").unwrap();
        let mid_pos = names.iter().position(|&n| n == "mid").unwrap();
        assert!(root_pos < mid_pos);
    }

    #[test]
    fn test_normalize_dir_path() {
        assert_eq!(normalize_dir_path("/A/B/"), Some("/A/B".to_string()));
        assert_eq!(normalize_dir_path("A/B"), Some("/A/B".to_string()));
        assert_eq!(normalize_dir_path("//A//B"), Some("/A/B".to_string()));
        assert_eq!(normalize_dir_path("/"), None);
        assert_eq!(normalize_dir_path(""), None);
        assert_eq!(normalize_dir_path("/A/../B"), None);
    }

    fn current_dir_check(item: &DocumentItem) -> String {
        current_dir_as_plan_path(item)
    }

    #[test]
    fn test_current_dir_plan_path() {
        assert_eq!(current_dir_check(&make_item(1, "a.txt", "")), "/");
        assert_eq!(current_dir_check(&make_item(1, "a.txt", "docs/x")), "/docs/x");
    }
}

/// The item's current directory expressed as a plan path.
fn current_dir_as_plan_path(item: &DocumentItem) -> String {
    if item.current_path.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", item.current_path)
    }
}
