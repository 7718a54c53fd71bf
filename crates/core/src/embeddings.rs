use crate::config::Settings;
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const LOCAL_EMBEDDING_MODEL: &str = "char-ngram";
pub const HUGGINGFACE_INFERENCE_URL: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction/";
const EMBED_BATCH_SIZE: usize = 32;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Recorded in the index manifest; an index only loads with the model
    /// that built it.
    fn model_name(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: self.model_name().to_string(),
            details: "no embedding returned for query".to_string(),
        })
    }
}

/// Picks the embedding backend from the configured model name:
/// `char-ngram` runs locally, `text-embedding-*` goes to OpenAI, anything
/// else is treated as a Hugging Face model id.
pub fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>, SearchError> {
    let model = settings.embedding_model.trim();

    if model == LOCAL_EMBEDDING_MODEL {
        return Ok(Arc::new(CharacterNgramEmbedder::default()));
    }

    if model.starts_with("text-embedding-") {
        let api_key = settings.openai_api_key.clone().ok_or_else(|| {
            SearchError::Request(format!("OPENAI_API_KEY is required for embedding model {model}"))
        })?;
        let embedder = OpenAiEmbedder::new(&settings.openai_base_url, api_key, model)?;
        return Ok(Arc::new(embedder));
    }

    let embedder = HuggingFaceEmbedder::new(
        HUGGINGFACE_INFERENCE_URL,
        settings.huggingface_api_key.clone(),
        model,
    )?;
    Ok(Arc::new(embedder))
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            endpoint: join_endpoint(base_url, "embeddings")?,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(&json!({ "model": self.model, "input": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(SearchError::BackendResponse {
                    backend: "openai-embeddings".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: OpenAiEmbeddingResponse = response.json().await?;
            vectors.extend(order_openai_embeddings(parsed, batch.len())?);
        }

        Ok(vectors)
    }
}

fn order_openai_embeddings(
    mut parsed: OpenAiEmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, SearchError> {
    if parsed.data.len() != expected {
        return Err(SearchError::BackendResponse {
            backend: "openai-embeddings".to_string(),
            details: format!("expected {expected} embeddings, got {}", parsed.data.len()),
        });
    }
    parsed.data.sort_by_key(|item| item.index);
    Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
}

pub struct HuggingFaceEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
}

impl HuggingFaceEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let model = model.into();
        Ok(Self {
            client: Client::new(),
            endpoint: join_endpoint(base_url, &model)?,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let mut request = self
                .client
                .post(self.endpoint.clone())
                .json(&json!({ "inputs": batch, "options": { "wait_for_model": true } }));
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(SearchError::BackendResponse {
                    backend: "huggingface".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: Value = response.json().await?;
            let batch_vectors = parse_feature_extraction(&parsed)?;
            if batch_vectors.len() != batch.len() {
                return Err(SearchError::BackendResponse {
                    backend: "huggingface".to_string(),
                    details: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        batch_vectors.len()
                    ),
                });
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}

/// Accepts pooled output (`[[f32]]`) or token-level output (`[[[f32]]]`),
/// which is mean-pooled per input.
fn parse_feature_extraction(value: &Value) -> Result<Vec<Vec<f32>>, SearchError> {
    let rows = value.as_array().ok_or_else(|| invalid_features("response is not an array"))?;

    rows.iter()
        .map(|row| {
            let items = row
                .as_array()
                .ok_or_else(|| invalid_features("embedding is not an array"))?;
            if items.first().is_some_and(Value::is_array) {
                let tokens = items
                    .iter()
                    .map(parse_vector)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(mean_pool(&tokens))
            } else {
                parse_vector(row)
            }
        })
        .collect()
}

fn parse_vector(value: &Value) -> Result<Vec<f32>, SearchError> {
    value
        .as_array()
        .ok_or_else(|| invalid_features("embedding is not an array"))?
        .iter()
        .map(|item| {
            item.as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| invalid_features("embedding value is not a number"))
        })
        .collect()
}

fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let width = tokens.first().map(Vec::len).unwrap_or(0);
    let mut pooled = vec![0f32; width];
    for token in tokens {
        for (slot, value) in pooled.iter_mut().zip(token) {
            *slot += value;
        }
    }
    if !tokens.is_empty() {
        for slot in pooled.iter_mut() {
            *slot /= tokens.len() as f32;
        }
    }
    pooled
}

fn invalid_features(details: &str) -> SearchError {
    SearchError::BackendResponse {
        backend: "huggingface".to_string(),
        details: details.to_string(),
    }
}

/// Joins `path` onto `base`, treating `base` as a directory.
pub fn join_endpoint(base: &str, path: &str) -> Result<Url, SearchError> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn query_embedding_matches_document_embedding() {
        let embedder = CharacterNgramEmbedder::default();
        let documents = embedder
            .embed_documents(&["Lubrication schedule".to_string()])
            .await
            .unwrap();
        let query = embedder.embed_query("Lubrication schedule").await.unwrap();
        assert_eq!(documents[0], query);
    }

    #[test]
    fn backend_is_chosen_from_model_name() {
        let local = Settings {
            embedding_model: LOCAL_EMBEDDING_MODEL.to_string(),
            ..Settings::default()
        };
        assert_eq!(build_embedder(&local).unwrap().model_name(), "char-ngram");

        let huggingface = Settings::default();
        assert_eq!(
            build_embedder(&huggingface).unwrap().model_name(),
            "intfloat/multilingual-e5-large"
        );

        let openai_without_key = Settings {
            embedding_model: "text-embedding-3-small".to_string(),
            ..Settings::default()
        };
        assert!(build_embedder(&openai_without_key).is_err());
    }

    #[test]
    fn huggingface_endpoint_keeps_model_path() {
        let embedder =
            HuggingFaceEmbedder::new(HUGGINGFACE_INFERENCE_URL, None, "intfloat/multilingual-e5-large")
                .unwrap();
        assert_eq!(
            embedder.endpoint.as_str(),
            "https://api-inference.huggingface.co/pipeline/feature-extraction/intfloat/multilingual-e5-large"
        );
    }

    #[test]
    fn join_endpoint_tolerates_missing_trailing_slash() {
        let url = join_endpoint("http://localhost:8080/v1", "embeddings").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn openai_embeddings_are_reordered_by_index() {
        let parsed: OpenAiEmbeddingResponse = serde_json::from_value(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        }))
        .unwrap();
        let ordered = order_openai_embeddings(parsed, 2).unwrap();
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn feature_extraction_accepts_pooled_and_token_output() {
        let pooled = parse_feature_extraction(&json!([[0.5, 0.5], [1.0, 0.0]])).unwrap();
        assert_eq!(pooled, vec![vec![0.5, 0.5], vec![1.0, 0.0]]);

        let tokens = parse_feature_extraction(&json!([[[1.0, 0.0], [0.0, 1.0]]])).unwrap();
        assert_eq!(tokens, vec![vec![0.5, 0.5]]);

        assert!(parse_feature_extraction(&json!({ "error": "loading" })).is_err());
    }
}
