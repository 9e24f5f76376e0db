//! Content pipeline: split page text, embed the chunks, store the vectors
//!
//! The orchestrator only sees [`ContentPipeline`]; [`EmbeddingPipeline`] is the
//! production implementation over an OpenAI-compatible embeddings endpoint and
//! one Qdrant collection per tenant.

mod embedder;
mod splitter;
mod vector_store;

pub use embedder::OpenAiEmbedder;
pub use splitter::TextSplitter;
pub use vector_store::{point_id, QdrantStore};

use crate::config::Config;
use crate::{ConfigError, IngestError};
use async_trait::async_trait;

/// Receives the chunks of one page and makes them searchable for a tenant
#[async_trait]
pub trait ContentPipeline: Send + Sync {
    /// Ingests the chunks of `source_url` for `tenant_id`
    ///
    /// An empty `chunks` slice is a successful no-op.
    async fn ingest(
        &self,
        tenant_id: &str,
        source_url: &str,
        chunks: &[String],
    ) -> Result<(), IngestError>;
}

/// Embeds chunks and writes them to the vector store
pub struct EmbeddingPipeline {
    embedder: OpenAiEmbedder,
    store: QdrantStore,
}

impl EmbeddingPipeline {
    pub fn new(embedder: OpenAiEmbedder, store: QdrantStore) -> Self {
        Self { embedder, store }
    }

    /// Builds the pipeline from configuration, reading API keys from the environment
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.embedding.api_key_env)
            .map_err(|_| ConfigError::MissingEnv(config.embedding.api_key_env.clone()))?;
        let embedder = OpenAiEmbedder::new(&api_key, &config.embedding)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let store_key = match &config.vector_store.api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.clone()))?,
            ),
            None => None,
        };
        let store = QdrantStore::new(&config.vector_store, store_key.as_deref())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(Self::new(embedder, store))
    }
}

#[async_trait]
impl ContentPipeline for EmbeddingPipeline {
    async fn ingest(
        &self,
        tenant_id: &str,
        source_url: &str,
        chunks: &[String],
    ) -> Result<(), IngestError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed(chunks).await?;
        self.store
            .replace_page(tenant_id, source_url, chunks, &vectors)
            .await
    }
}
