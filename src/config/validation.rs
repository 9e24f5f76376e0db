use crate::config::types::{
    BrowserConfig, Config, CrawlerConfig, EmbeddingConfig, PipelineConfig, StorageConfig,
    VectorStoreConfig, WorkersConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_browser_config(&config.browser)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_embedding_config(&config.embedding)?;
    validate_vector_store_config(&config.vector_store)?;
    validate_storage_config(&config.storage)?;
    validate_workers_config(&config.workers)?;
    Ok(())
}

/// Validates traversal configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    // max_depth of 0 or 1 is allowed: the seed is still fetched, nothing below it

    if config.navigation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.script_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "script-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates remote browser configuration
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    validate_http_url("webdriver-url", &config.webdriver_url)?;

    if config.browser_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "browser-name cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates text splitting configuration
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.chunk_size == 0 {
        return Err(ConfigError::Validation(
            "chunk-size must be >= 1".to_string(),
        ));
    }

    if config.chunk_overlap >= config.chunk_size {
        return Err(ConfigError::Validation(format!(
            "chunk-overlap ({}) must be smaller than chunk-size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }

    Ok(())
}

/// Validates embeddings endpoint configuration
fn validate_embedding_config(config: &EmbeddingConfig) -> Result<(), ConfigError> {
    validate_http_url("embedding.endpoint", &config.endpoint)?;
    validate_env_name("embedding.api-key-env", &config.api_key_env)?;

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "embedding.model cannot be empty".to_string(),
        ));
    }

    if config.batch_size < 1 || config.batch_size > 2048 {
        return Err(ConfigError::Validation(format!(
            "embedding.batch-size must be between 1 and 2048, got {}",
            config.batch_size
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "embedding.max-retries must be >= 1".to_string(),
        ));
    }

    if config.dimensions == Some(0) {
        return Err(ConfigError::Validation(
            "embedding.dimensions must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates Qdrant configuration
fn validate_vector_store_config(config: &VectorStoreConfig) -> Result<(), ConfigError> {
    validate_http_url("vector-store.url", &config.url)?;

    if config.collection_prefix.is_empty()
        || !config
            .collection_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "vector-store.collection-prefix must be non-empty and contain only alphanumerics, '_' or '-', got '{}'",
            config.collection_prefix
        )));
    }

    if let Some(var) = &config.api_key_env {
        validate_env_name("vector-store.api-key-env", var)?;
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool configuration
fn validate_workers_config(config: &WorkersConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 64 {
        return Err(ConfigError::Validation(format!(
            "workers.count must be between 1 and 64, got {}",
            config.count
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "workers.queue-capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates that `value` is an absolute http(s) URL
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            field, value
        )));
    }

    Ok(())
}

/// Validates an environment variable name
fn validate_env_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "{} must be a valid environment variable name, got '{}'",
            field, name
        )));
    }

    Ok(())
}
