//! Duplicate resolution phase.
//!
//! Files with identical content hashes form groups; each group elects a
//! primary and assigns every other member an action. The deterministic
//! rule handles the common case; groups that look ambiguous go to the
//! local model, and any arbitration failure falls back to the rule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::db::{
    Database, DocumentItem, DuplicateDecision, DuplicateGroup, MemberAction,
};
use crate::error::{PipelineError, Result};
use crate::llm::json::extract_json;
use crate::llm::LocalLlm;

/// Path segments that mark a member as a likely backup copy.
const BACKUP_SEGMENTS: &[&str] = &["backup", "old", "archive"];

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub groups_found: usize,
    pub shortcuts_planned: usize,
    pub llm_decisions: usize,
    pub fallbacks: usize,
}

pub struct DuplicateResolver<'a> {
    config: &'a Config,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        db: &mut Database,
        job_id: &str,
        llm: &LocalLlm,
        cancel: &Arc<AtomicBool>,
    ) -> Result<DedupOutcome> {
        let items = DocumentItem::list_unclaimed(db, job_id)?;
        let groups = group_by_hash(&items, self.config.duplicates.min_duplicate_size_bytes());

        let mut outcome = DedupOutcome {
            groups_found: groups.len(),
            ..DedupOutcome::default()
        };
        tracing::info!(job_id, groups = groups.len(), "duplicate groups found");

        for group in groups {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::cancelled());
            }

            let mut decision = elect_by_rule(&group, &group_reasoning(&group));

            if needs_arbitration(&group) {
                match arbitrate(llm, &group, self.config.duplicates.allow_deletes, cancel) {
                    Ok(Some(llm_decision)) => {
                        decision = llm_decision;
                        outcome.llm_decisions += 1;
                    }
                    Ok(None) => {}
                    Err(e) if e.kind == crate::error::ErrorKind::Cancelled => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            hash = %short_hash(&group.content_hash),
                            error = %e,
                            "arbitration failed, using deterministic rule"
                        );
                        outcome.fallbacks += 1;
                    }
                }
            }

            outcome.shortcuts_planned += decision
                .members
                .iter()
                .filter(|(_, action, _)| *action == MemberAction::Shortcut)
                .count();

            DuplicateGroup::store_decision(db, job_id, &decision)?;
        }

        tracing::info!(
            job_id,
            groups = outcome.groups_found,
            shortcuts = outcome.shortcuts_planned,
            llm_decisions = outcome.llm_decisions,
            "duplicate resolution finished"
        );
        Ok(outcome)
    }
}

struct HashGroup {
    content_hash: String,
    members: Vec<DocumentItem>,
    total_size: i64,
}

fn group_by_hash(items: &[DocumentItem], min_size: u64) -> Vec<HashGroup> {
    let mut by_hash: HashMap<&str, Vec<&DocumentItem>> = HashMap::new();
    for item in items {
        if let Some(hash) = item.content_hash.as_deref() {
            by_hash.entry(hash).or_default().push(item);
        }
    }

    let mut groups: Vec<HashGroup> = by_hash
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .filter(|(_, members)| members.iter().any(|m| m.file_size as u64 >= min_size))
        .map(|(hash, members)| HashGroup {
            content_hash: hash.to_string(),
            total_size: members.iter().map(|m| m.file_size).sum(),
            members: members.into_iter().cloned().collect(),
        })
        .collect();
    // Largest win first; deterministic order for progress and tests.
    groups.sort_by(|a, b| b.total_size.cmp(&a.total_size).then(a.content_hash.cmp(&b.content_hash)));
    groups
}

/// Deterministic election: shortest relative path wins, ties broken by
/// earliest mtime, then lexicographically smallest path.
fn elect_primary(members: &[DocumentItem]) -> &DocumentItem {
    members
        .iter()
        .min_by(|a, b| {
            let a_path = a.relative_path();
            let b_path = b.relative_path();
            a_path
                .len()
                .cmp(&b_path.len())
                .then_with(|| a.source_mtime.cmp(&b.source_mtime))
                .then_with(|| a_path.cmp(&b_path))
        })
        .expect("group has at least two members")
}

fn group_reasoning(group: &HashGroup) -> String {
    format!(
        "{} identical copies, primary chosen by shortest path",
        group.members.len()
    )
}

fn elect_by_rule(group: &HashGroup, reasoning: &str) -> DuplicateDecision {
    let primary = elect_primary(&group.members);
    let members = group
        .members
        .iter()
        .map(|m| {
            if m.id == primary.id {
                (m.id, MemberAction::KeepPrimary, None)
            } else {
                (m.id, MemberAction::Shortcut, None)
            }
        })
        .collect();

    DuplicateDecision {
        content_hash: group.content_hash.clone(),
        total_size: group.total_size,
        primary_document_id: primary.id,
        decided_by: "auto",
        reasoning: Some(reasoning.to_string()),
        members,
    }
}

fn has_backup_segment(path: &str) -> bool {
    path.split('/')
        .any(|segment| BACKUP_SEGMENTS.contains(&segment.to_lowercase().as_str()))
}

fn top_level_segment(item: &DocumentItem) -> String {
    item.relative_path()
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Ambiguous groups go to the model: three or more copies, copies spread
/// across top-level directories, or a member living in a backup-like
/// folder.
fn needs_arbitration(group: &HashGroup) -> bool {
    if group.members.len() >= 3 {
        return true;
    }
    let top_levels: std::collections::HashSet<String> =
        group.members.iter().map(top_level_segment).collect();
    if top_levels.len() >= 2 {
        return true;
    }
    group
        .members
        .iter()
        .any(|m| has_backup_segment(&m.relative_path()))
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

fn arbitration_prompt(group: &HashGroup) -> String {
    let mut listing = String::new();
    for (index, member) in group.members.iter().enumerate() {
        let summary = member
            .content_summary
            .as_deref()
            .unwrap_or("no summary")
            .chars()
            .take(200)
            .collect::<String>();
        listing.push_str(&format!(
            "[{index}] {}\n    modified: {}\n    summary: {summary}\n",
            member.relative_path(),
            member.source_mtime.as_deref().unwrap_or("unknown"),
        ));
    }

    format!(
        "These files are byte-identical duplicates (hash {}):\n\n{listing}\n\
         Decide which file should be the PRIMARY (authoritative copy) and what to do\n\
         with each of the others:\n\
         - shortcut: replace with a link to the primary\n\
         - keep_both: keep as an intentional separate copy (e.g. a template used by two projects)\n\
         - delete: remove entirely (only for clearly obsolete backups)\n\n\
         Consider: files in backup/old/archive folders are usually secondary, cleaner\n\
         and shallower paths are usually authoritative.\n\n\
         Respond in this exact JSON format:\n\
         {{\n\
           \"primary_index\": <index of the primary file>,\n\
           \"reasoning\": \"why this file is primary\",\n\
           \"decisions\": [{{\"index\": <n>, \"action\": \"shortcut|keep_both|delete\", \"reasoning\": \"why\"}}]\n\
         }}\n\n\
         Respond ONLY with JSON.",
        short_hash(&group.content_hash)
    )
}

/// Ask the local model for a group decision. `Ok(None)` means the answer
/// was unusable and the caller should keep the deterministic rule.
fn arbitrate(
    llm: &LocalLlm,
    group: &HashGroup,
    allow_deletes: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<Option<DuplicateDecision>> {
    let response = llm.summarize(&arbitration_prompt(group), None, cancel)?;
    let value = extract_json(&response)?;

    let primary_index = value
        .get("primary_index")
        .and_then(|v| v.as_u64())
        .map(|i| i as usize);
    let Some(primary_index) = primary_index.filter(|i| *i < group.members.len()) else {
        return Ok(None);
    };
    let primary_id = group.members[primary_index].id;
    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut actions: HashMap<usize, (MemberAction, Option<String>)> = HashMap::new();
    if let Some(decisions) = value.get("decisions").and_then(|v| v.as_array()) {
        for entry in decisions {
            let Some(index) = entry.get("index").and_then(|v| v.as_u64()).map(|i| i as usize)
            else {
                continue;
            };
            let Some(action_str) = entry.get("action").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(mut action) = MemberAction::parse(&action_str.to_lowercase()) else {
                continue;
            };
            if action == MemberAction::Delete && !allow_deletes {
                action = MemberAction::Shortcut;
            }
            let why = entry
                .get("reasoning")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            actions.insert(index, (action, why));
        }
    }

    let members = group
        .members
        .iter()
        .enumerate()
        .map(|(index, member)| {
            if index == primary_index {
                (member.id, MemberAction::KeepPrimary, None)
            } else {
                let (action, why) = actions
                    .get(&index)
                    .cloned()
                    .unwrap_or((MemberAction::Shortcut, None));
                (member.id, action, why)
            }
        })
        .collect();

    Ok(Some(DuplicateDecision {
        content_hash: group.content_hash.clone(),
        total_size: group.total_size,
        primary_document_id: primary_id,
        decided_by: "llm",
        reasoning,
        members,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Job, NewDocument};

    fn make_item(id: i64, name: &str, dir: &str, mtime: &str) -> DocumentItem {
        DocumentItem {
            id,
            job_id: "j".to_string(),
            file_id: format!("f{id}"),
            current_name: name.to_string(),
            current_path: dir.to_string(),
            extension: "pdf".to_string(),
            file_size: 50_000,
            mime_type: "application/pdf".to_string(),
            content_hash: Some("h".to_string()),
            source_mtime: Some(mtime.to_string()),
            content_summary: None,
            document_type: None,
            key_topics: vec![],
            proposed_name: None,
            proposed_path: None,
            proposed_tags: vec![],
            organization_reasoning: None,
            final_name: None,
            final_path: None,
            status: crate::db::DocumentStatus::Processed,
            changes_applied: false,
            is_deleted: false,
            error_message: None,
        }
    }

    #[test]
    fn test_primary_is_shortest_path() {
        let members = vec![
            make_item(1, "report.pdf", "A/deep/nested", "2024-01-01T00:00:00Z"),
            make_item(2, "report.pdf", "A", "2024-06-01T00:00:00Z"),
        ];
        assert_eq!(elect_primary(&members).id, 2);
    }

    #[test]
    fn test_tie_breaks_on_mtime_then_path() {
        let members = vec![
            make_item(1, "report.pdf", "B", "2024-06-01T00:00:00Z"),
            make_item(2, "report.pdf", "A", "2024-06-01T00:00:00Z"),
        ];
        // Same path length and mtime: lexicographically smallest wins.
        assert_eq!(elect_primary(&members).id, 2);

        let members = vec![
            make_item(1, "report.pdf", "B", "2024-01-01T00:00:00Z"),
            make_item(2, "report.pdf", "A", "2024-06-01T00:00:00Z"),
        ];
        // Same length, earlier mtime wins.
        assert_eq!(elect_primary(&members).id, 1);
    }

    #[test]
    fn test_grouping_requires_two_members_and_min_size() {
        let mut solo = make_item(1, "a.pdf", "", "2024-01-01T00:00:00Z");
        solo.content_hash = Some("alone".to_string());
        let mut small_a = make_item(2, "b.pdf", "", "2024-01-01T00:00:00Z");
        let mut small_b = make_item(3, "c.pdf", "x", "2024-01-01T00:00:00Z");
        small_a.file_size = 100;
        small_b.file_size = 100;
        small_a.content_hash = Some("tiny".to_string());
        small_b.content_hash = Some("tiny".to_string());

        let groups = group_by_hash(&[solo, small_a, small_b], 10 * 1024);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_arbitration_triggers() {
        let pair_same_dir = HashGroup {
            content_hash: "h".to_string(),
            total_size: 2,
            members: vec![
                make_item(1, "a.pdf", "docs", "t"),
                make_item(2, "a2.pdf", "docs", "t"),
            ],
        };
        assert!(!needs_arbitration(&pair_same_dir));

        let pair_cross_dir = HashGroup {
            content_hash: "h".to_string(),
            total_size: 2,
            members: vec![
                make_item(1, "a.pdf", "projects/x", "t"),
                make_item(2, "a.pdf", "shared/x", "t"),
            ],
        };
        assert!(needs_arbitration(&pair_cross_dir));

        let pair_backup = HashGroup {
            content_hash: "h".to_string(),
            total_size: 2,
            members: vec![
                make_item(1, "a.pdf", "docs", "t"),
                make_item(2, "a.pdf", "docs/old", "t"),
            ],
        };
        assert!(needs_arbitration(&pair_backup));

        let triple = HashGroup {
            content_hash: "h".to_string(),
            total_size: 3,
            members: vec![
                make_item(1, "a.pdf", "docs", "t"),
                make_item(2, "b.pdf", "docs", "t"),
                make_item(3, "c.pdf", "docs", "t"),
            ],
        };
        assert!(needs_arbitration(&triple));
    }

    #[test]
    fn test_backup_segment_is_whole_segment() {
        assert!(has_backup_segment("docs/backup/a.pdf"));
        assert!(has_backup_segment("Archive/a.pdf"));
        // Substring matches do not count.
        assert!(!has_backup_segment("backups-analysis/a.pdf"));
        assert!(!has_backup_segment("golden/a.pdf"));
    }

    #[test]
    fn test_rule_decision_via_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        let mut db = Database::open(&db_path).unwrap();
        db.initialize().unwrap();
        let job = Job::create(&db, "a.zip").unwrap();

        for (file_id, name, dir_name) in
            [("f1", "report.pdf", "A"), ("f2", "report.pdf", "B")]
        {
            DocumentItem::insert_discovered(
                &db, &job.id, file_id, name, dir_name, "pdf", 50_000, "application/pdf",
            )
            .unwrap();
            DocumentItem::apply_index_result(
                &db,
                &job.id,
                &NewDocument {
                    file_id: file_id.to_string(),
                    current_name: name.to_string(),
                    current_path: dir_name.to_string(),
                    extension: "pdf".to_string(),
                    file_size: 50_000,
                    mime_type: "application/pdf".to_string(),
                    content_hash: "same-hash".to_string(),
                    source_mtime: None,
                    content_summary: None,
                    document_type: None,
                    key_topics: vec![],
                },
            )
            .unwrap();
        }

        let config = Config::default();
        let resolver = DuplicateResolver::new(&config);
        let llm = LocalLlm::from_config(&crate::config::LocalLlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            max_retries: 1,
            ..crate::config::LocalLlmConfig::default()
        });
        let outcome = resolver
            .run(&mut db, &job.id, &llm, &Arc::new(AtomicBool::new(false)))
            .unwrap();

        assert_eq!(outcome.groups_found, 1);
        assert_eq!(outcome.shortcuts_planned, 1);

        let groups = DuplicateGroup::list_for_job(&db, &job.id).unwrap();
        assert_eq!(groups.len(), 1);
        let members = DuplicateGroup::members(&db, groups[0].id).unwrap();
        let primary: Vec<_> = members.iter().filter(|m| m.is_primary).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].action, MemberAction::KeepPrimary);

        // Primary is A/report.pdf (paths tie in length; A sorts first).
        let primary_doc = DocumentItem::get(&db, primary[0].document_id)
            .unwrap()
            .unwrap();
        assert_eq!(primary_doc.current_path, "A");
    }
}
