use serde::Deserialize;

/// Main configuration structure for Crawl-Ingest
///
/// Every section and field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default, rename = "vector-store")]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Traversal configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum link-following distance from the seed
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Page load timeout per navigation (seconds)
    #[serde(rename = "navigation-timeout-secs", default = "default_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Script execution timeout per page (seconds)
    #[serde(rename = "script-timeout-secs", default = "default_timeout_secs")]
    pub script_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            navigation_timeout_secs: default_timeout_secs(),
            script_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Remote browser configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver endpoint; overridden by `SELENIUM_GRID_URL`
    #[serde(rename = "webdriver-url", default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(rename = "browser-name", default = "default_browser_name")]
    pub browser_name: String,

    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            browser_name: default_browser_name(),
            headless: true,
        }
    }
}

/// Text splitting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum chunk length in characters
    #[serde(rename = "chunk-size", default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[serde(rename = "chunk-overlap", default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Embeddings endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(rename = "api-key-env", default = "default_embedding_key_env")]
    pub api_key_env: String,

    /// Requested vector size, for models that support shortening
    #[serde(default)]
    pub dimensions: Option<usize>,

    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(rename = "timeout-secs", default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            dimensions: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Qdrant configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Each tenant gets its own collection named `{collection-prefix}-{tenant}`
    #[serde(rename = "collection-prefix", default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Environment variable holding the Qdrant API key, if the instance needs one
    #[serde(rename = "api-key-env", default)]
    pub api_key_env: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection_prefix: default_collection_prefix(),
            api_key_env: None,
        }
    }
}

/// Crawl state database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Task worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Number of crawl tasks that may run at once
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Tasks that may wait in the queue before `submit` applies backpressure
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_depth() -> u32 {
    15
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_webdriver_url() -> String {
    "http://localhost:4444/wd/hub".to_string()
}

fn default_browser_name() -> String {
    "firefox".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_max_retries() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection_prefix() -> String {
    "website_chunks".to_string()
}

fn default_database_path() -> String {
    "./crawl_state.db".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}
