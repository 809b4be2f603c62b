pub const SCHEMA: &str = r#"
-- Processing jobs: one row per ingested archive
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    current_phase TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0,
    source_archive TEXT,
    output_archive TEXT,

    -- Counters filled in as phases complete
    files_processed INTEGER NOT NULL DEFAULT 0,
    duplicates_found INTEGER NOT NULL DEFAULT 0,
    shortcuts_created INTEGER NOT NULL DEFAULT 0,
    version_chains_found INTEGER NOT NULL DEFAULT 0,
    files_renamed INTEGER NOT NULL DEFAULT 0,
    files_moved INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT
);

-- Document inventory: one row per file discovered in the source tree
CREATE TABLE IF NOT EXISTS document_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    file_id TEXT NOT NULL,            -- stable hash of the relative path
    current_name TEXT NOT NULL,
    current_path TEXT NOT NULL,       -- directory relative to source root, '' at root
    extension TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    content_hash TEXT,                -- sha256 hex, set once hashed
    source_mtime TEXT,

    -- LLM-derived content fields
    content_summary TEXT,
    document_type TEXT,
    key_topics TEXT,                  -- JSON array

    -- Organization plan
    proposed_name TEXT,
    proposed_path TEXT,
    proposed_tags TEXT,               -- JSON array
    organization_reasoning TEXT,
    organization_batch_id TEXT,

    -- Execution outcome
    final_name TEXT,
    final_path TEXT,

    status TEXT NOT NULL DEFAULT 'discovered',
    changes_applied INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,

    UNIQUE (job_id, file_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_job ON document_items(job_id);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON document_items(job_id, content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_status ON document_items(job_id, status);

-- Duplicate groups keyed by content hash
CREATE TABLE IF NOT EXISTS duplicate_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    file_count INTEGER NOT NULL,
    total_size INTEGER NOT NULL,
    primary_document_id INTEGER NOT NULL,
    decision_reasoning TEXT,
    decided_by TEXT NOT NULL DEFAULT 'auto',   -- 'auto', 'llm', 'user'

    UNIQUE (job_id, content_hash),
    FOREIGN KEY (primary_document_id) REFERENCES document_items(id)
);

CREATE TABLE IF NOT EXISTS duplicate_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    document_id INTEGER NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    action TEXT NOT NULL,              -- 'keep_primary', 'shortcut', 'keep_both', 'delete'
    action_reasoning TEXT,
    shortcut_target_path TEXT,

    UNIQUE (group_id, document_id),
    FOREIGN KEY (group_id) REFERENCES duplicate_groups(id),
    FOREIGN KEY (document_id) REFERENCES document_items(id)
);

CREATE INDEX IF NOT EXISTS idx_dup_members_doc ON duplicate_members(document_id);

-- Version chains
CREATE TABLE IF NOT EXISTS version_chains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    chain_name TEXT NOT NULL,
    base_path TEXT NOT NULL,
    current_document_id INTEGER NOT NULL,
    current_version_number INTEGER NOT NULL,
    detection_method TEXT NOT NULL,    -- 'explicit_marker', 'name_similarity', 'content_similarity'
    detection_confidence REAL NOT NULL,
    llm_reasoning TEXT,
    version_order_confirmed INTEGER NOT NULL DEFAULT 0,
    archive_strategy TEXT NOT NULL,
    archive_path TEXT,

    FOREIGN KEY (current_document_id) REFERENCES document_items(id)
);

CREATE INDEX IF NOT EXISTS idx_chains_job ON version_chains(job_id);

CREATE TABLE IF NOT EXISTS version_chain_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id INTEGER NOT NULL,
    document_id INTEGER NOT NULL,
    version_number INTEGER NOT NULL,   -- 1-based, oldest first
    version_label TEXT,
    version_date TEXT,
    is_current INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,              -- 'active', 'superseded', 'archived'
    proposed_version_name TEXT,
    proposed_version_path TEXT,

    UNIQUE (chain_id, version_number),
    UNIQUE (chain_id, document_id),
    FOREIGN KEY (chain_id) REFERENCES version_chains(id),
    FOREIGN KEY (document_id) REFERENCES document_items(id)
);

CREATE INDEX IF NOT EXISTS idx_chain_members_doc ON version_chain_members(document_id);

-- Organization plan artifacts, scoped to a planning batch
CREATE TABLE IF NOT EXISTS naming_schemas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    naming_pattern TEXT NOT NULL,
    example TEXT,
    description TEXT,
    placeholder_definitions TEXT,      -- JSON object: token -> description
    schema_version INTEGER NOT NULL DEFAULT 1,

    UNIQUE (job_id, batch_id, document_type)
);

CREATE TABLE IF NOT EXISTS tag_taxonomy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    parent_id INTEGER,                 -- NULL for roots; forms a forest
    description TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,

    UNIQUE (job_id, batch_id, tag_name),
    FOREIGN KEY (parent_id) REFERENCES tag_taxonomy(id)
);

CREATE TABLE IF NOT EXISTS directory_structure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    path TEXT NOT NULL,
    folder_name TEXT NOT NULL,
    parent_path TEXT,
    depth INTEGER NOT NULL,
    purpose TEXT,
    expected_tags TEXT,                -- JSON array
    expected_document_types TEXT,      -- JSON array

    UNIQUE (job_id, batch_id, path)
);

-- Shortcuts materialized by the executor
CREATE TABLE IF NOT EXISTS shortcut_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    document_id INTEGER NOT NULL,
    shortcut_path TEXT NOT NULL,
    target_path TEXT NOT NULL,
    shortcut_type TEXT NOT NULL,       -- 'symlink', 'url', 'desktop'
    original_path TEXT NOT NULL,
    original_hash TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    FOREIGN KEY (document_id) REFERENCES document_items(id)
);

-- Append-only execution trail, one row per filesystem operation
CREATE TABLE IF NOT EXISTS execution_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    operation TEXT NOT NULL,           -- 'create_dir', 'copy_file', 'rename', 'move', 'create_shortcut', 'archive_version'
    source_path TEXT,
    target_path TEXT,
    document_id INTEGER,
    success INTEGER NOT NULL DEFAULT 1,
    error_message TEXT,
    duration_ms INTEGER,
    executed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_execution_log_job ON execution_log(job_id);
"#;
