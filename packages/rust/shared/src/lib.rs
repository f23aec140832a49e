//! Shared types, error model, and configuration for PostScout.
//!
//! This crate is the foundation depended on by all other PostScout crates.
//! It provides:
//! - [`PostScoutError`]: the unified error type
//! - Domain types ([`Post`], [`ContentChunk`], [`EnrichmentResult`], [`PendingJobRecord`])
//! - Configuration ([`AppConfig`], [`EnrichmentConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchSection, EnrichmentConfig, EnrichmentSection, GeminiConfig, PreprocessConfig,
    PromptConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{PostScoutError, Result};
pub use types::{
    BatchJobState, CONTINUATION_MARKER, ContentChunk, ContentProcessing, EnrichmentResult,
    EnrichmentStatus, FunnelStage, PendingJobRecord, Post, RunSummary, StrategicAnalysis,
    chunk_key, sort_newest_first,
};
