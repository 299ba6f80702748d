//! Application configuration for docqa.
//!
//! User config lives at `~/.docqa/docqa.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocQaError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docqa.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docqa";

/// Extraction output file name inside `paths.output_dir`.
pub const EXTRACTED_FILE_NAME: &str = "text_content.json";

/// Enrichment output (and checkpoint) file name inside `paths.output_dir`.
pub const ENRICHED_FILE_NAME: &str = "enriched_content.json";

/// Image asset directory name inside `paths.output_dir`.
pub const IMAGES_DIR_NAME: &str = "images";

/// Vector database file name inside `paths.vector_store_dir`.
pub const INDEX_DB_FILE_NAME: &str = "index.db";

// ---------------------------------------------------------------------------
// Config structs (matching docqa.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model service settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Filesystem locations for stage outputs and the vector store.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Extraction defaults.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Enrichment tuning.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Query-time settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the Generative Language API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for captions, questions, and answers.
    #[serde(default = "default_generative_model")]
    pub generative_model: String,

    /// Model used for document and query embeddings.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            generative_model: default_generative_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_generative_model() -> String {
    "gemini-2.0-flash-001".into()
}
fn default_embedding_model() -> String {
    "text-embedding-004".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for extraction/enrichment output and image assets.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Directory holding the vector database.
    #[serde(default = "default_vector_store_dir")]
    pub vector_store_dir: String,

    /// Name of the vector collection.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            vector_store_dir: default_vector_store_dir(),
            collection: default_collection(),
        }
    }
}

fn default_output_dir() -> String {
    "processed_data".into()
}
fn default_vector_store_dir() -> String {
    "vector_store".into()
}
fn default_collection() -> String {
    "docs".into()
}

impl PathsConfig {
    /// `<output_dir>/text_content.json`
    pub fn extracted_file(&self) -> PathBuf {
        Path::new(&self.output_dir).join(EXTRACTED_FILE_NAME)
    }

    /// `<output_dir>/enriched_content.json`
    pub fn enriched_file(&self) -> PathBuf {
        Path::new(&self.output_dir).join(ENRICHED_FILE_NAME)
    }

    /// `<output_dir>/images`
    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.output_dir).join(IMAGES_DIR_NAME)
    }

    /// `<vector_store_dir>/index.db`
    pub fn index_db(&self) -> PathBuf {
        Path::new(&self.vector_store_dir).join(INDEX_DB_FILE_NAME)
    }
}

/// `[extraction]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Documents processed when none are given on the command line.
    #[serde(default)]
    pub documents: Vec<String>,
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Attempts per image caption.
    #[serde(default = "default_caption_attempts")]
    pub caption_attempts: u32,

    /// Fixed delay between caption attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub caption_retry_delay_ms: u64,

    /// Attempts per question-synthesis call (1 = no retry).
    #[serde(default = "default_question_attempts")]
    pub question_attempts: u32,

    /// Fixed delay between question-synthesis attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub question_retry_delay_ms: u64,

    /// Text blocks must be strictly longer than this to get questions.
    #[serde(default = "default_question_min_chars")]
    pub question_min_chars: usize,

    /// Block content is truncated to this many characters before sending.
    #[serde(default = "default_question_max_input_chars")]
    pub question_max_input_chars: usize,

    /// Flush the accumulated output every N processed items.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Throttle applied after every item, success or not.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            caption_attempts: default_caption_attempts(),
            caption_retry_delay_ms: default_retry_delay_ms(),
            question_attempts: default_question_attempts(),
            question_retry_delay_ms: default_retry_delay_ms(),
            question_min_chars: default_question_min_chars(),
            question_max_input_chars: default_question_max_input_chars(),
            checkpoint_every: default_checkpoint_every(),
            item_delay_ms: default_item_delay_ms(),
        }
    }
}

fn default_caption_attempts() -> u32 {
    3
}
fn default_question_attempts() -> u32 {
    1
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_question_min_chars() -> usize {
    100
}
fn default_question_max_input_chars() -> usize {
    4_000
}
fn default_checkpoint_every() -> usize {
    50
}
fn default_item_delay_ms() -> u64 {
    500
}

impl EnrichmentConfig {
    pub fn caption_retry_delay(&self) -> Duration {
        Duration::from_millis(self.caption_retry_delay_ms)
    }

    pub fn question_retry_delay(&self) -> Duration {
        Duration::from_millis(self.question_retry_delay_ms)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of nearest records supplied as context.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Length of the source excerpt shown to the caller.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// System instruction for answer generation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            excerpt_chars: default_excerpt_chars(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_top_k() -> usize {
    2
}
fn default_excerpt_chars() -> usize {
    300
}
fn default_system_prompt() -> String {
    "You are an expert software consultant. \
     Provide clear, step-by-step answers based strictly on the provided documentation context. \
     If the context does not contain the answer, say so instead of guessing. \
     If the context includes image descriptions (screenshots/charts), use them to explain \
     where to click or what the UI looks like. \
     Be professional, concise, and friendly."
        .into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docqa/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocQaError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docqa/docqa.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| DocQaError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocQaError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocQaError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| DocQaError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocQaError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the API key env var is set and non-empty, returning its value.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.gemini.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocQaError::config(format!(
            "Gemini API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://aistudio.google.com/app/apikey"
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
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.enrichment.caption_attempts, 3);
        assert_eq!(parsed.enrichment.checkpoint_every, 50);
        assert_eq!(parsed.retrieval.top_k, 2);
        assert_eq!(parsed.gemini.api_key_env, "GOOGLE_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[paths]
collection = "handbook"

[extraction]
documents = ["Overview.docx", "Scheduling.docx"]

[enrichment]
item_delay_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.paths.collection, "handbook");
        assert_eq!(config.paths.output_dir, "processed_data");
        assert_eq!(config.extraction.documents.len(), 2);
        assert_eq!(config.enrichment.item_delay(), Duration::ZERO);
        assert_eq!(config.enrichment.caption_retry_delay(), Duration::from_secs(2));
        assert_eq!(config.enrichment.question_max_input_chars, 4_000);
    }

    #[test]
    fn derived_paths() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.extracted_file(),
            Path::new("processed_data").join("text_content.json")
        );
        assert_eq!(
            paths.enriched_file(),
            Path::new("processed_data").join("enriched_content.json")
        );
        assert_eq!(paths.images_dir(), Path::new("processed_data").join("images"));
        assert_eq!(paths.index_db(), Path::new("vector_store").join("index.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gemini.api_key_env = "DOCQA_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
