//! Application configuration for PostScout.
//!
//! User config lives at `~/.postscout/postscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PostScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postscout";

/// Instruction sent ahead of every post's content.
const DEFAULT_INSTRUCTION: &str = "You are a content strategist analysing a competitor's blog post. \
Return a single JSON object with these keys: \
\"summary\" (no more than 350 characters), \
\"seo_keywords\" (array of the 5 most important SEO keywords, ordered by importance), \
\"funnel_stage\" (one of \"TOFU\", \"MOFU\", \"BOFU\"), \
\"target_audience\" (short description), and \
\"strategic_analysis\" (object with \"content_angle\", \"competitive_differentiation\", \
\"content_freshness_score\", \"target_persona_indicators\", \"content_depth\"). \
If the content is marked as continued, analyse only the part you are given.";

// ---------------------------------------------------------------------------
// Config structs (matching postscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Routing, models, and live-path limits.
    #[serde(default)]
    pub enrichment: EnrichmentSection,

    /// Normalization and chunking limits.
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Bulk job workspace settings.
    #[serde(default)]
    pub batch: BatchSection,

    /// Gemini API settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Prompt text and competitor context.
    #[serde(default)]
    pub prompt: PromptConfig,
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// Item count at or above which the batch path is used.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Model used for synchronous calls.
    #[serde(default = "default_live_model")]
    pub live_model: String,

    /// Model used for bulk jobs.
    #[serde(default = "default_batch_model")]
    pub batch_model: String,

    /// Maximum in-flight live requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per chunk for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a server-advised rate-limit wait.
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,

    /// Deadline for a single live request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            batch_threshold: default_batch_threshold(),
            live_model: default_live_model(),
            batch_model: default_batch_model(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_batch_threshold() -> usize {
    10
}
fn default_live_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_batch_model() -> String {
    "gemini-2.5-flash-lite".into()
}
fn default_concurrency() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_max_rate_limit_wait_secs() -> u64 {
    120
}
fn default_request_timeout_secs() -> u64 {
    90
}

/// `[preprocess]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Maximum characters in one chunk body.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Characters carried over from the end of the previous chunk.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    /// Posts needing more chunks than this are rejected.
    #[serde(default = "default_max_chunks_per_post")]
    pub max_chunks_per_post: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            max_chunks_per_post: default_max_chunks_per_post(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    6_000
}
fn default_overlap_chars() -> usize {
    200
}
fn default_max_chunks_per_post() -> usize {
    50
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Root of the job registry and chunk-source files.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Maximum chunk lines per submitted file.
    #[serde(default = "default_max_items_per_file")]
    pub max_items_per_file: usize,

    /// Maximum serialized request bytes per submitted file.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            max_items_per_file: default_max_items_per_file(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_workspace_dir() -> String {
    "workspace".into()
}
fn default_max_items_per_file() -> usize {
    5_000
}
fn default_max_file_bytes() -> usize {
    95 * 1024 * 1024
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API origin; overridden in tests.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}

/// `[prompt]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_instruction")]
    pub instruction: String,

    /// Direct competitors named in the prompt.
    #[serde(default)]
    pub primary_competitors: Vec<String>,

    /// Broader market players named in the prompt.
    #[serde(default)]
    pub other_competitors: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            instruction: default_instruction(),
            primary_competitors: Vec::new(),
            other_competitors: Vec::new(),
        }
    }
}

fn default_instruction() -> String {
    DEFAULT_INSTRUCTION.into()
}

// ---------------------------------------------------------------------------
// Enrichment config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime enrichment configuration passed to the router, live worker, and
/// batch manager.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub batch_threshold: usize,
    pub live_model: String,
    pub batch_model: String,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_rate_limit_wait: Duration,
    pub request_timeout: Duration,
    pub preprocess: PreprocessConfig,
    pub prompt: PromptConfig,
    pub workspace_dir: PathBuf,
    pub max_items_per_file: usize,
    pub max_file_bytes: usize,
}

impl From<&AppConfig> for EnrichmentConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_threshold: config.enrichment.batch_threshold,
            live_model: config.enrichment.live_model.clone(),
            batch_model: config.enrichment.batch_model.clone(),
            concurrency: config.enrichment.concurrency.max(1),
            max_retries: config.enrichment.max_retries.max(1),
            backoff_base: Duration::from_millis(config.enrichment.backoff_base_ms),
            max_rate_limit_wait: Duration::from_secs(config.enrichment.max_rate_limit_wait_secs),
            request_timeout: Duration::from_secs(config.enrichment.request_timeout_secs),
            preprocess: config.preprocess.clone(),
            prompt: config.prompt.clone(),
            workspace_dir: PathBuf::from(&config.batch.workspace_dir),
            max_items_per_file: config.batch.max_items_per_file.max(1),
            max_file_bytes: config.batch.max_file_bytes,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PostScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postscout/postscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PostScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PostScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PostScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PostScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PostScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Gemini API key from the configured env var.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.gemini.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PostScoutError::config(format!(
            "Gemini API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://aistudio.google.com/apikey"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("batch_threshold"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[enrichment]
batch_threshold = 25

[preprocess]
overlap_chars = 150

[prompt]
primary_competitors = ["Squiz", "Modern Campus"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.enrichment.batch_threshold, 25);
        assert_eq!(config.enrichment.concurrency, 5);
        assert_eq!(config.preprocess.overlap_chars, 150);
        assert_eq!(config.preprocess.max_chunk_chars, 6_000);
        assert_eq!(config.prompt.primary_competitors.len(), 2);
        assert!(config.prompt.instruction.contains("seo_keywords"));
    }

    #[test]
    fn enrichment_config_from_app_config() {
        let mut app = AppConfig::default();
        app.enrichment.concurrency = 0;
        let config = EnrichmentConfig::from(&app);
        assert_eq!(config.batch_threshold, 10);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.workspace_dir, PathBuf::from("workspace"));
        assert_eq!(config.max_file_bytes, 95 * 1024 * 1024);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gemini.api_key_env = "PS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
