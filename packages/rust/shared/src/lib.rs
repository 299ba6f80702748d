//! Shared types, error model, and configuration for docqa.
//!
//! This crate is the foundation depended on by all other docqa crates.
//! It provides:
//! - [`DocQaError`], the unified error type
//! - Domain types ([`ContentBlock`], [`EnrichedRecord`], [`IndexedDocument`], [`Generation`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnrichmentConfig, ExtractionConfig, GeminiConfig, PathsConfig, RetrievalConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{DocQaError, Result};
pub use types::{
    BlockKind, ContentBlock, DocumentMetadata, EnrichedRecord, FailureKind, Generation,
    IndexedDocument, MISSING_IMAGE_CONTENT, Role, SENTINEL_DESCRIPTION, Turn,
};
