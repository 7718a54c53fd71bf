use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::indexer::{PdfIndexer, Retriever};
use crate::models::{QueryResponse, SourceRecord};
use crate::prompt::build_question_prompt;
use crate::stores::LocalVectorStore;
use crate::traits::{LanguageModel, VectorIndex};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

enum EngineState {
    NoIndex,
    Ready(LocalVectorStore),
}

/// Answers questions over a persisted index. Construction never fails: a
/// missing or unreadable index leaves the engine in a not-ready state and
/// every later call reports that instead.
pub struct QueryEngine {
    state: EngineState,
    embedder: Arc<dyn Embedder>,
    language_model: Option<Arc<dyn LanguageModel>>,
    similarity_top_k: usize,
}

impl QueryEngine {
    pub fn open(
        settings: &Settings,
        index_dir: Option<&Path>,
        embedder: Arc<dyn Embedder>,
        language_model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        let mut indexer = PdfIndexer::new(settings.clone(), Arc::clone(&embedder));
        let state = match indexer.load(index_dir) {
            Ok(()) => indexer
                .into_index()
                .map(EngineState::Ready)
                .unwrap_or(EngineState::NoIndex),
            Err(error) => {
                warn!(%error, "no index loaded; run the index command first");
                EngineState::NoIndex
            }
        };

        if language_model.is_none() {
            warn!("no language model configured; questions cannot be answered");
        }

        Self {
            state,
            embedder,
            language_model,
            similarity_top_k: settings.similarity_top_k,
        }
    }

    pub fn from_index(
        index: LocalVectorStore,
        embedder: Arc<dyn Embedder>,
        language_model: Option<Arc<dyn LanguageModel>>,
        similarity_top_k: usize,
    ) -> Self {
        Self {
            state: EngineState::Ready(index),
            embedder,
            language_model,
            similarity_top_k,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    pub fn indexed_fragments(&self) -> usize {
        match &self.state {
            EngineState::Ready(index) => index.len(),
            EngineState::NoIndex => 0,
        }
    }

    fn retriever(&self) -> Result<Retriever<'_>, SearchError> {
        match &self.state {
            EngineState::Ready(index) => Ok(Retriever::new(index, self.embedder.as_ref())),
            EngineState::NoIndex => Err(SearchError::NotReady(
                "no query engine available; build an index first".to_string(),
            )),
        }
    }

    /// Answers `question` from the index. Failures are reported in the
    /// response rather than returned, so callers always get a printable
    /// result. Sources are the top `max_results` retrieved fragments, most
    /// similar first.
    pub async fn query(&self, question: &str, max_results: usize) -> QueryResponse {
        match self.answer(question, max_results).await {
            Ok(response) => response,
            Err(error) => {
                error!(%error, "query failed");
                QueryResponse::error(error.to_string())
            }
        }
    }

    async fn answer(&self, question: &str, max_results: usize) -> Result<QueryResponse, SearchError> {
        let retriever = self.retriever()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SearchError::Request("question is empty".to_string()));
        }
        let Some(language_model) = &self.language_model else {
            return Err(SearchError::NotReady(
                "no language model configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY".to_string(),
            ));
        };

        info!(question, "processing query");
        let hits = retriever.retrieve(question, self.similarity_top_k).await?;
        debug!(hits = hits.len(), model = language_model.name(), "synthesizing answer");

        let answer = language_model
            .complete(&build_question_prompt(question, &hits))
            .await?;
        let sources = hits
            .iter()
            .take(max_results)
            .map(|hit| hit.to_source_record())
            .collect();

        Ok(QueryResponse::Answer {
            answer: answer.trim().to_string(),
            sources,
        })
    }

    /// Returns the `top_k` most similar fragments without calling the
    /// language model.
    pub async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SourceRecord>, SearchError> {
        let retriever = self.retriever().map_err(|error| {
            error!(%error, "similarity search failed");
            error
        })?;

        let hits = retriever.retrieve(query, top_k).await?;
        Ok(hits.iter().map(|hit| hit.to_source_record()).collect())
    }
}
