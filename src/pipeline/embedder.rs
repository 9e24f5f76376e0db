//! OpenAI-compatible embeddings client

use crate::config::EmbeddingConfig;
use crate::IngestError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Async embeddings client that talks to OpenAI-compatible endpoints
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
    retry_base: Duration,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, config: &EmbeddingConfig) -> Result<Self, IngestError> {
        if api_key.trim().is_empty() {
            return Err(IngestError::Setup("missing embeddings API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(IngestError::Setup("missing embeddings model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| IngestError::Setup("invalid embeddings API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Setup(format!("failed to build embeddings client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
            retry_base: Duration::from_millis(500),
        })
    }

    /// Overrides the first retry delay; later retries double it
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embeds every input, batching requests, and returns vectors in input order
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            vectors.extend(self.embed_batch(&refs).await?);
        }
        Ok(vectors)
    }

    /// Sends one batch and returns its embedding vectors
    pub async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };

            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
                            IngestError::Embedding(format!("failed to parse response: {}", e))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != inputs.len() {
                            return Err(IngestError::Embedding(format!(
                                "endpoint returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                inputs.len()
                            )));
                        }
                        return Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect());
                    }

                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            "Embeddings request failed, retrying"
                        );
                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(IngestError::Embedding(format!(
                        "request failed ({}): {}",
                        status, body
                    )));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "Embeddings request errored, retrying");
                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(IngestError::Embedding(err.to_string()));
                }
            }
        }
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.retry_base * (1 << capped)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
