//! Typed shape of the remote model's organization plan.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlanResponse {
    #[serde(default)]
    pub naming_schemas: Vec<NamingSchema>,
    #[serde(default)]
    pub tag_taxonomy: HashMap<String, TaxonomyNode>,
    #[serde(default)]
    pub directory_structure: Vec<DirectoryDef>,
    #[serde(default)]
    pub file_assignments: Vec<FileAssignment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamingSchema {
    pub document_type: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub placeholders: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaxonomyNode {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub children: HashMap<String, TaxonomyNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryDef {
    pub path: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub expected_tags: Vec<String>,
    #[serde(default, alias = "expected_types")]
    pub expected_document_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileAssignment {
    pub file_id: i64,
    #[serde(default)]
    pub proposed_name: Option<String>,
    #[serde(default)]
    pub proposed_path: Option<String>,
    #[serde(default)]
    pub proposed_tags: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}
