//! Application configuration for the RM proposal builder.
//!
//! User config lives at `~/.rmproposal/rmproposal.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RmProposalError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "rmproposal.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".rmproposal";

// ---------------------------------------------------------------------------
// Config structs (matching rmproposal.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web search collaborator.
    #[serde(default)]
    pub search: SearchConfig,

    /// Chat-completion collaborator.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding collaborator used by the document index.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Document index location and chunking.
    #[serde(default)]
    pub index: IndexConfig,

    /// Pipeline policy knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search API base URL.
    #[serde(default = "default_search_api_base")]
    pub api_base: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,

    /// Result cap per query.
    #[serde(default = "default_search_max_results")]
    pub max_results: u32,

    /// Recency window passed to the provider.
    #[serde(default = "default_time_range")]
    pub time_range: String,

    /// Request timeout.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_base: default_search_api_base(),
            api_key_env: default_search_api_key_env(),
            max_results: default_search_max_results(),
            time_range: default_time_range(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_api_base() -> String {
    "https://api.tavily.com".into()
}
fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_search_max_results() -> u32 {
    30
}
fn default_time_range() -> String {
    "year".into()
}
fn default_search_timeout() -> u64 {
    30
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible API base (OpenRouter by default).
    #[serde(default = "default_generation_api_base")]
    pub api_base: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_generation_api_key_env")]
    pub api_key_env: String,

    /// Chat model identifier.
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_generation_api_base(),
            api_key_env: default_generation_api_key_env(),
            model: default_generation_model(),
            temperature: 0.0,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_api_base() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_generation_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_generation_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_generation_timeout() -> u64 {
    120
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base.
    #[serde(default = "default_embedding_api_base")]
    pub api_base: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Inputs per embedding request.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Request timeout.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_api_base(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    60
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path to the libSQL index file.
    #[serde(default = "default_index_path")]
    pub path: String,

    /// Chunk window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_index_path() -> String {
    "./my_documents_db/index.db".into()
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline variant: "basic" or "eligibility".
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Directory receiving the proposal artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Market named in the analyst framing and the derived web query.
    #[serde(default = "default_market")]
    pub market: String,

    /// Template for deriving the web query; `{subject}` and `{market}` are substituted.
    #[serde(default = "default_web_query_template")]
    pub web_query_template: String,

    /// Result cap for the single internal retrieval call.
    #[serde(default = "default_top_k")]
    pub internal_top_k: usize,

    /// Result cap for each per-product retrieval call.
    #[serde(default = "default_top_k")]
    pub product_top_k: usize,

    /// Body prefix length (in characters) used as the deduplication key.
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,

    /// Character budget of web context sent to product identification.
    #[serde(default = "default_product_context_chars")]
    pub product_context_chars: usize,

    /// Upper bound on identified products.
    #[serde(default = "default_max_products")]
    pub max_products: usize,

    /// Fallback products when identification fails.
    #[serde(default = "default_products")]
    pub default_products: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            output_dir: default_output_dir(),
            market: default_market(),
            web_query_template: default_web_query_template(),
            internal_top_k: default_top_k(),
            product_top_k: default_top_k(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
            product_context_chars: default_product_context_chars(),
            max_products: default_max_products(),
            default_products: default_products(),
        }
    }
}

impl PipelineConfig {
    /// The web query template with `{market}` already substituted.
    pub fn resolved_query_template(&self) -> String {
        self.web_query_template.replace("{market}", &self.market)
    }
}

fn default_variant() -> String {
    "eligibility".into()
}
fn default_output_dir() -> String {
    "./output".into()
}
fn default_market() -> String {
    "Malaysia".into()
}
fn default_web_query_template() -> String {
    "{subject} {market} news financial performance expansion plans".into()
}
fn default_top_k() -> usize {
    5
}
fn default_dedup_prefix_chars() -> usize {
    200
}
fn default_product_context_chars() -> usize {
    8_000
}
fn default_max_products() -> usize {
    4
}
fn default_products() -> Vec<String> {
    vec!["Working Capital Loan".into(), "Business Expansion Loan".into()]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.rmproposal/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RmProposalError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.rmproposal/rmproposal.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| RmProposalError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        RmProposalError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RmProposalError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RmProposalError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RmProposalError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the named env var, failing with a config error if unset or empty.
pub fn resolve_api_key(var_name: &str, provider: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(RmProposalError::config(format!(
            "{provider} API key not found. Set the {var_name} environment variable."
        ))),
    }
}
