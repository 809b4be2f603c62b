//! Prompt assembly for the planning call.
//!
//! The system prompt is deterministic; the user prompt carries the file
//! inventory, the current directory list (capped by population) and an
//! extension histogram.

use serde_json::json;
use std::collections::HashMap;

use crate::db::DocumentItem;

/// Directories shown to the model, most-populated first.
const MAX_DIRECTORIES: usize = 50;

/// Summary excerpt per file.
const MAX_SUMMARY_CHARS: usize = 200;

/// Topics per file.
const MAX_TOPICS: usize = 5;

pub const SYSTEM_PROMPT: &str = "\
You are an expert document management consultant specializing in file organization, \
naming conventions, and taxonomy design.

Your goal is to create a comprehensive, practical organization system that:
- Groups related files logically by purpose and project
- Uses consistent, meaningful naming conventions
- Creates a navigable directory hierarchy (max 4 levels deep)
- Assigns appropriate tags for filtering and searching
- Handles ALL file types appropriately

CRITICAL RULES:
1. EVERY file must be assigned - no files can be left out of file_assignments
2. When uncertain about categorization, preserve original location and name (set proposed_name and proposed_path to null)
3. Binary files (images, video, audio, executables) should be organized by filename patterns and metadata, not content
4. Unknown file extensions should be placed in /_Uncategorized with original names and the tag 'uncategorized'
5. Naming patterns must be practical and usable
6. Tag names must be lowercase with hyphens, max 3 levels deep in hierarchy
7. Directory paths must start with / and not exceed 4 levels (e.g. /Level1/Level2/Level3/Level4)

Respond with ONLY valid JSON - no markdown formatting, no explanations before or after the JSON.";

/// Extra context about a planning item that is not on the DocumentItem
/// row itself.
#[derive(Debug, Clone, Default)]
pub struct ItemContext {
    pub is_current_version: bool,
    pub chain_name: Option<String>,
}

pub fn build_prompt(items: &[DocumentItem], contexts: &HashMap<i64, ItemContext>) -> String {
    let inventory: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            let mut entry = json!({
                "id": item.id,
                "name": item.current_name,
                "path": item.current_path,
                "extension": item.extension,
                "size_bytes": item.file_size,
                "mime_type": item.mime_type,
            });
            if let Some(summary) = &item.content_summary {
                let excerpt: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
                entry["summary"] = json!(excerpt);
            }
            if let Some(doc_type) = &item.document_type {
                entry["type"] = json!(doc_type);
            }
            if !item.key_topics.is_empty() {
                let topics: Vec<&String> = item.key_topics.iter().take(MAX_TOPICS).collect();
                entry["topics"] = json!(topics);
            }
            if let Some(mtime) = &item.source_mtime {
                entry["modified"] = json!(mtime);
            }
            if let Some(context) = contexts.get(&item.id) {
                if let Some(chain) = &context.chain_name {
                    entry["version_chain"] = json!(chain);
                    entry["is_current_version"] = json!(context.is_current_version);
                }
            }
            entry
        })
        .collect();

    format!(
        "Analyze this file collection and create a comprehensive organization system.\n\n\
         ## FILE INVENTORY ({count} files)\n\n{inventory}\n\n\
         ## CURRENT DIRECTORY STRUCTURE\n\n{directories}\n\n\
         ## FILE TYPE DISTRIBUTION\n\n{histogram}\n\n\
         ## RESPONSE FORMAT\n\n\
         {{\n\
           \"naming_schemas\": [\n\
             {{\"document_type\": \"...\", \"pattern\": \"... with {{placeholders}}\", \"example\": \"...\",\n\
              \"description\": \"...\", \"placeholders\": {{\"placeholder\": \"meaning\"}}}}\n\
           ],\n\
           \"tag_taxonomy\": {{\n\
             \"root-tag\": {{\"description\": \"...\", \"children\": {{\"child-tag\": {{\"description\": \"...\"}}}}}}\n\
           }},\n\
           \"directory_structure\": [\n\
             {{\"path\": \"/Path/To/Dir\", \"purpose\": \"...\", \"expected_types\": [\"ext\"], \"expected_tags\": [\"tag\"]}}\n\
           ],\n\
           \"file_assignments\": [\n\
             {{\"file_id\": <id from inventory>, \"proposed_name\": \"new-name.ext or null\",\n\
              \"proposed_path\": \"/Dir/From/directory_structure or null\",\n\
              \"proposed_tags\": [\"tag\"], \"reasoning\": \"...\"}}\n\
           ]\n\
         }}\n\n\
         REMEMBER: every file_id from the inventory MUST appear in file_assignments. \
         When uncertain, use null for proposed_name and proposed_path.",
        count = items.len(),
        inventory = serde_json::to_string_pretty(&inventory).unwrap_or_default(),
        directories = directory_listing(items),
        histogram = extension_histogram(items),
    )
}

/// Unique directories, most-populated first, capped.
fn directory_listing(items: &[DocumentItem]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *counts.entry(item.current_path.as_str()).or_default() += 1;
    }

    let mut directories: Vec<(&str, usize)> = counts.into_iter().collect();
    directories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let total = directories.len();
    let mut listing: Vec<String> = directories
        .into_iter()
        .take(MAX_DIRECTORIES)
        .map(|(dir, count)| {
            let shown = if dir.is_empty() { "(root)" } else { dir };
            format!("- {shown} ({count} files)")
        })
        .collect();
    if total > MAX_DIRECTORIES {
        listing.push(format!("... and {} more directories", total - MAX_DIRECTORIES));
    }
    listing.join("\n")
}

fn extension_histogram(items: &[DocumentItem]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        let ext = if item.extension.is_empty() {
            "(none)"
        } else {
            item.extension.as_str()
        };
        *counts.entry(ext).or_default() += 1;
    }

    let mut entries: Vec<(&str, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    entries
        .into_iter()
        .map(|(ext, count)| format!("- {ext}: {count} files"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DocumentStatus;

    fn make_item(id: i64, name: &str, dir: &str, ext: &str) -> DocumentItem {
        DocumentItem {
            id,
            job_id: "j".to_string(),
            file_id: format!("f{id}"),
            current_name: name.to_string(),
            current_path: dir.to_string(),
            extension: ext.to_string(),
            file_size: 100,
            mime_type: "application/octet-stream".to_string(),
            content_hash: Some("h".to_string()),
            source_mtime: None,
            content_summary: Some("A long summary ".repeat(40)),
            document_type: Some("report".to_string()),
            key_topics: (0..10).map(|i| format!("topic{i}")).collect(),
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

    #[test]
    fn test_prompt_contains_inventory_and_histogram() {
        let items = vec![
            make_item(1, "a.pdf", "docs", "pdf"),
            make_item(2, "b.pdf", "docs", "pdf"),
            make_item(3, "c.txt", "", "txt"),
        ];
        let prompt = build_prompt(&items, &HashMap::new());
        assert!(prompt.contains("## FILE INVENTORY (3 files)"));
        assert!(prompt.contains("- pdf: 2 files"));
        assert!(prompt.contains("- docs (2 files)"));
        assert!(prompt.contains("(root)"));
    }

    #[test]
    fn test_summary_and_topics_truncated() {
        let items = vec![make_item(1, "a.pdf", "docs", "pdf")];
        let prompt = build_prompt(&items, &HashMap::new());
        // 10 topics in the item, at most 5 serialized.
        assert!(prompt.contains("topic4"));
        assert!(!prompt.contains("topic5"));
    }

    #[test]
    fn test_chain_context_included() {
        let items = vec![make_item(1, "budget.xlsx", "plans", "xlsx")];
        let contexts = HashMap::from([(
            1i64,
            ItemContext {
                is_current_version: true,
                chain_name: Some("budget".to_string()),
            },
        )]);
        let prompt = build_prompt(&items, &contexts);
        assert!(prompt.contains("version_chain"));
        assert!(prompt.contains("is_current_version"));
    }
}
