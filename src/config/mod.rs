//! Configuration module for Crawl-Ingest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use crawl_ingest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl-ingest.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, CrawlerConfig, EmbeddingConfig, PipelineConfig, StorageConfig,
    VectorStoreConfig, WorkersConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
    SELENIUM_GRID_ENV,
};
pub use validation::validate;
