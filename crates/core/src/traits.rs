use crate::models::{DocumentFragment, SearchQuery};
use crate::store::ScoredFragment;
use crate::SearchError;
use async_trait::async_trait;

pub trait VectorIndex: Send + Sync {
    fn index_vector_chunks(
        &mut self,
        chunks: &[DocumentFragment],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    /// Returns at most `query.top_k` hits, most similar first.
    fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<ScoredFragment>, SearchError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<String, SearchError>;
}
