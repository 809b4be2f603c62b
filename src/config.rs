use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub local_llm: LocalLlmConfig,

    #[serde(default)]
    pub remote_llm: RemoteLlmConfig,

    #[serde(default)]
    pub duplicates: DuplicateConfig,

    #[serde(default)]
    pub versions: VersionConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

/// Data directory layout. The source tree under `source_root/<job>` is
/// read-only for every phase after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    #[serde(default = "default_working_root")]
    pub working_root: PathBuf,

    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    #[serde(default = "default_reports_root")]
    pub reports_root: PathBuf,
}

fn default_input_root() -> PathBuf {
    PathBuf::from("/data/input")
}

fn default_source_root() -> PathBuf {
    PathBuf::from("/data/source")
}

fn default_working_root() -> PathBuf {
    PathBuf::from("/data/working")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/data/output")
}

fn default_reports_root() -> PathBuf {
    PathBuf::from("/data/reports")
}

impl PathsConfig {
    pub fn source_dir(&self, job_id: &str) -> PathBuf {
        self.source_root.join(job_id)
    }

    pub fn working_dir(&self, job_id: &str) -> PathBuf {
        self.working_root.join(job_id)
    }

    pub fn output_archive(&self, job_id: &str) -> PathBuf {
        self.output_root.join(format!("{job_id}.zip"))
    }

    pub fn manifest_path(&self, job_id: &str) -> PathBuf {
        self.reports_root.join(format!("{job_id}_manifest.json"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            source_root: default_source_root(),
            working_root: default_working_root(),
            output_root: default_output_root(),
            reports_root: default_reports_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Progress flush granularity per phase (items).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Files larger than this are hashed and indexed but not text-extracted.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "default_text_budget")]
    pub text_extraction_budget_bytes: usize,

    /// Worker pool for hashing and extraction.
    #[serde(default = "default_cpu_workers")]
    pub cpu_workers: usize,

    /// Worker pool for LLM calls; bounded by API concurrency policy.
    #[serde(default = "default_net_workers")]
    pub net_workers: usize,

    /// Skip hidden entries in the source tree.
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_text_budget() -> usize {
    100 * 1024
}

fn default_cpu_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().clamp(4, 8))
        .unwrap_or(4)
}

fn default_net_workers() -> usize {
    3
}

fn default_skip_hidden() -> bool {
    true
}

impl ProcessingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_file_size_mb: default_max_file_size_mb(),
            text_extraction_budget_bytes: default_text_budget(),
            cpu_workers: default_cpu_workers(),
            net_workers: default_net_workers(),
            skip_hidden: default_skip_hidden(),
        }
    }
}

/// Local model used for per-file summarization and arbitration prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_local_model")]
    pub model: String,

    #[serde(default = "default_local_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_local_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_model() -> String {
    "llama3.2".to_string()
}

fn default_local_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_local_endpoint(),
            model: default_local_model(),
            timeout_secs: default_local_timeout(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
        }
    }
}

/// Remote reasoning model used for the organization plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_remote_model")]
    pub model: String,

    #[serde(default = "default_remote_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_remote_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_remote_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_remote_max_tokens() -> u32 {
    16000
}

fn default_remote_timeout() -> u64 {
    180
}

impl RemoteLlmConfig {
    /// API key from config, with environment override.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
    }
}

impl Default for RemoteLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_remote_endpoint(),
            api_key: None,
            model: default_remote_model(),
            max_tokens: default_remote_max_tokens(),
            timeout_secs: default_remote_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Permit `delete` actions from LLM arbitration. Off by default;
    /// deletes are coerced to shortcuts.
    #[serde(default)]
    pub allow_deletes: bool,

    /// Groups below this size are not worth deduplicating.
    #[serde(default = "default_min_duplicate_size_kb")]
    pub min_duplicate_size_kb: u64,
}

fn default_min_duplicate_size_kb() -> u64 {
    10
}

impl DuplicateConfig {
    pub fn min_duplicate_size_bytes(&self) -> u64 {
        self.min_duplicate_size_kb * 1024
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            allow_deletes: false,
            min_duplicate_size_kb: default_min_duplicate_size_kb(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStrategy {
    /// `{base}/_versions/{name}/...`; current stays at `{base}/{name}.{ext}`.
    #[default]
    Subfolder,
    /// All members coexist in the base directory with version suffixes.
    Inline,
    /// `/Archive/Versions/{name}/...`; current stays in its base directory.
    SeparateArchive,
}

impl ArchiveStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStrategy::Subfolder => "subfolder",
            ArchiveStrategy::Inline => "inline",
            ArchiveStrategy::SeparateArchive => "separate_archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subfolder" => Some(ArchiveStrategy::Subfolder),
            "inline" => Some(ArchiveStrategy::Inline),
            "separate_archive" => Some(ArchiveStrategy::SeparateArchive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionConfig {
    #[serde(default)]
    pub archive_strategy: ArchiveStrategy,

    #[serde(default = "default_version_folder")]
    pub folder_name: String,

    /// Minimum normalized edit-distance similarity for implicit version
    /// candidates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_version_folder() -> String {
    "_versions".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.7
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            archive_strategy: ArchiveStrategy::default(),
            folder_name: default_version_folder(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewConfig {
    /// Pause between planning and execution until an approve signal.
    #[serde(default)]
    pub review_required: bool,

    /// Validate and report without touching the working tree.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidydrive")
        .join("tidydrive.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            paths: PathsConfig::default(),
            processing: ProcessingConfig::default(),
            local_llm: LocalLlmConfig::default(),
            remote_llm: RemoteLlmConfig::default(),
            duplicates: DuplicateConfig::default(),
            versions: VersionConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tidydrive")
    }

    fn config_path() -> PathBuf {
        std::env::var("TIDYDRIVE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.processing.batch_size, 50);
        assert_eq!(parsed.versions.similarity_threshold, 0.7);
        assert_eq!(parsed.versions.folder_name, "_versions");
        assert!(!parsed.duplicates.allow_deletes);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.paths.input_root, PathBuf::from("/data/input"));
        assert_eq!(parsed.versions.archive_strategy, ArchiveStrategy::Subfolder);
    }

    #[test]
    fn test_job_scoped_paths() {
        let paths = PathsConfig::default();
        assert_eq!(paths.source_dir("abc"), PathBuf::from("/data/source/abc"));
        assert_eq!(
            paths.output_archive("abc"),
            PathBuf::from("/data/output/abc.zip")
        );
        assert_eq!(
            paths.manifest_path("abc"),
            PathBuf::from("/data/reports/abc_manifest.json")
        );
    }

    #[test]
    fn test_archive_strategy_parse() {
        let config: Config =
            toml::from_str("[versions]\narchive_strategy = \"separate_archive\"\n").unwrap();
        assert_eq!(
            config.versions.archive_strategy,
            ArchiveStrategy::SeparateArchive
        );
        assert_eq!(ArchiveStrategy::parse("inline"), Some(ArchiveStrategy::Inline));
        assert_eq!(ArchiveStrategy::parse("bogus"), None);
    }
}
