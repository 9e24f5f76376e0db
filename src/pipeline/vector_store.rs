//! Qdrant vector store writer
//!
//! Every tenant gets its own collection. Each chunk becomes one point whose id
//! is derived from the tenant, page URL and chunk index, so re-ingesting a page
//! overwrites its previous points in place.

use crate::config::VectorStoreConfig;
use crate::IngestError;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Writes embedded chunks to per-tenant Qdrant collections over the REST API
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection_prefix: String,
    /// Collections known to exist; the lock also serializes their creation
    ready: Mutex<HashSet<String>>,
}

#[derive(Debug, Serialize)]
struct Point<'a> {
    id: String,
    vector: &'a [f32],
    payload: ChunkPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ChunkPayload<'a> {
    tenant_id: &'a str,
    source_url: &'a str,
    chunk_index: usize,
    text: &'a str,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig, api_key: Option<&str>) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            headers.insert(
                "api-key",
                HeaderValue::from_str(key.trim())
                    .map_err(|_| IngestError::Setup("invalid Qdrant API key".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Setup(format!("failed to build Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection_prefix: config.collection_prefix.clone(),
            ready: Mutex::new(HashSet::new()),
        })
    }

    /// Name of the collection holding `tenant_id`'s vectors
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - The tenant (bot) the vectors belong to
    ///
    /// # Returns
    ///
    /// `{prefix}-{tenant_id}`. Characters outside `[A-Za-z0-9_-]` are replaced
    /// with `_`, and a short hash of the raw id is appended whenever that
    /// happens so distinct tenants never share a collection.
    pub fn collection_for(&self, tenant_id: &str) -> String {
        let sanitized: String = tenant_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if !tenant_id.is_empty() && sanitized == tenant_id {
            format!("{}-{}", self.collection_prefix, sanitized)
        } else {
            let digest = hex::encode(Sha256::digest(tenant_id.as_bytes()));
            format!("{}-{}-{}", self.collection_prefix, sanitized, &digest[..8])
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection)
    }

    /// Creates `collection` if it does not exist yet
    ///
    /// Checked once per collection for the lifetime of the store; a failed
    /// check is retried on the next call.
    pub async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<(), IngestError> {
        let mut ready = self.ready.lock().await;
        if ready.contains(collection) {
            return Ok(());
        }

        let url = self.collection_url(collection);
        let existing = self.client.get(&url).send().await.map_err(store_error)?;

        match existing.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                tracing::info!(collection, dimensions, "Creating vector collection");
                let body = json!({
                    "vectors": { "size": dimensions, "distance": "Cosine" }
                });
                let created = self.client.put(&url).json(&body).send().await.map_err(store_error)?;
                check_response(created, "create collection").await?;
            }
            _ => check_response(existing, "get collection").await?,
        }

        ready.insert(collection.to_string());
        Ok(())
    }

    /// Replaces the points stored for `source_url` in `tenant_id`'s collection
    ///
    /// The new chunks are upserted first; only then are points left over from
    /// a longer previous version of the page deleted. A failed upsert leaves
    /// the previous version in place.
    pub async fn replace_page(
        &self,
        tenant_id: &str,
        source_url: &str,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<(), IngestError> {
        if chunks.len() != vectors.len() {
            return Err(IngestError::VectorStore(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let Some(dimensions) = vectors.first().map(Vec::len) else {
            return Ok(());
        };

        let collection = self.collection_for(tenant_id);
        self.ensure_collection(&collection, dimensions).await?;

        let points: Vec<Point<'_>> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (text, vector))| Point {
                id: point_id(tenant_id, source_url, chunk_index),
                vector,
                payload: ChunkPayload {
                    tenant_id,
                    source_url,
                    chunk_index,
                    text,
                },
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(&collection)))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(store_error)?;
        check_response(response, "upsert points").await?;

        self.delete_stale(&collection, source_url, chunks.len()).await?;

        tracing::debug!(
            tenant_id,
            source_url,
            collection = %collection,
            points = chunks.len(),
            "Stored page chunks"
        );
        Ok(())
    }

    /// Deletes the page's points with `chunk_index >= keep`
    async fn delete_stale(&self, collection: &str, source_url: &str, keep: usize) -> Result<(), IngestError> {
        let filter = json!({
            "filter": {
                "must": [
                    { "key": "source_url", "match": { "value": source_url } },
                    { "key": "chunk_index", "range": { "gte": keep } }
                ]
            }
        });
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url(collection)))
            .json(&filter)
            .send()
            .await
            .map_err(store_error)?;
        check_response(response, "delete stale points").await
    }
}

/// Deterministic point id for one chunk of one page
pub fn point_id(tenant_id: &str, source_url: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(source_url.as_bytes());
    hasher.update(b"|");
    hasher.update(chunk_index.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn store_error(e: reqwest::Error) -> IngestError {
    IngestError::VectorStore(e.to_string())
}

async fn check_response(response: Response, action: &str) -> Result<(), IngestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(IngestError::VectorStore(format!(
        "{} failed ({}): {}",
        action, status, body
    )))
}
