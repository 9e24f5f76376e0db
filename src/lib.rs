//! Crawl-Ingest: a tenant-scoped website ingestion crawler
//!
//! This crate walks a website depth-first from a seed URL, stays on the seed's
//! host, renders every page through a remote browser session, and feeds the
//! page text into a chunk/embed/store pipeline. Every discovered URL gets a
//! persisted record so interrupted or failed work can be resumed.

pub mod config;
pub mod crawler;
pub mod pipeline;
pub mod report;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod url;

use thiserror::Error;

/// Main error type for Crawl-Ingest operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("URL error: {0}")]
    Scope(#[from] ScopeError),

    #[error("Task queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}

/// Reasons a URL is out of scope. Never surfaced past the scope filter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing or undotted host in URL: {0}")]
    MissingDomain(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),

    #[error("Host {candidate} does not match {anchor}")]
    ForeignHost { candidate: String, anchor: String },
}

/// Browser navigation and rendering failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Navigation timed out for {url}: {message}")]
    Timeout { url: String, message: String },

    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Browser transport error: {0}")]
    Transport(String),

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),
}

/// Content pipeline failures (embedding or vector store)
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Vector store write failed: {0}")]
    VectorStore(String),

    #[error("Pipeline misconfigured: {0}")]
    Setup(String),
}

/// Result type alias for Crawl-Ingest operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, Crawler};
pub use state::{FailureKind, NodeFailure, RecordStatus};
pub use crate::url::{check_scope, in_scope};
