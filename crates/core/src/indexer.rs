use crate::chunking::{split_fragments, ChunkingConfig};
use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::ingest::{discover_pdf_files, load_fragments, LoadReport, SkippedPdf};
use crate::models::{DocumentFragment, SearchQuery};
use crate::reconcile::{MetadataReconciler, ReconcileSummary};
use crate::store::ScoredFragment;
use crate::stores::LocalVectorStore;
use crate::traits::VectorIndex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where an indexing run takes its input from.
#[derive(Debug, Clone)]
pub enum IndexSource {
    /// Every PDF under the configured directory, honouring `max_pdfs`.
    Directory,
    Files(Vec<PathBuf>),
    /// Already-parsed fragments; the loader is skipped.
    Fragments(Vec<DocumentFragment>),
}

#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub files: usize,
    pub fragments: usize,
    pub chunks: usize,
    pub skipped_files: Vec<SkippedPdf>,
    pub reconciliation: ReconcileSummary,
}

pub struct PdfIndexer {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PdfExtractor>,
    index: Option<LocalVectorStore>,
}

impl PdfIndexer {
    pub fn new(settings: Settings, embedder: Arc<dyn Embedder>) -> Self {
        info!(
            embedding_model = embedder.model_name(),
            chunk_size = settings.chunk_size,
            chunk_overlap = settings.chunk_overlap,
            "indexer configured"
        );
        Self {
            settings,
            embedder,
            extractor: Arc::new(LopdfExtractor),
            index: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> Option<&LocalVectorStore> {
        self.index.as_ref()
    }

    pub fn into_index(self) -> Option<LocalVectorStore> {
        self.index
    }

    pub fn pdf_files(&self) -> Vec<PathBuf> {
        discover_pdf_files(&self.settings.pdf_dir, self.settings.max_pdfs)
    }

    /// Loads, attributes, chunks and embeds the input, replacing any index
    /// held in memory. Fails with [`IngestError::NoDocuments`] instead of
    /// building an empty index.
    pub async fn process(&mut self, source: IndexSource) -> Result<IndexSummary, IngestError> {
        let (inputs, mut fragments, skipped_files) = match source {
            IndexSource::Directory => {
                let files = self.pdf_files();
                let report = self.load_files(files.clone()).await?;
                (files, report.fragments, report.skipped_files)
            }
            IndexSource::Files(files) => {
                let report = self.load_files(files.clone()).await?;
                (files, report.fragments, report.skipped_files)
            }
            IndexSource::Fragments(fragments) => {
                let inputs = fragments
                    .iter()
                    .filter_map(|fragment| fragment.metadata.file_path.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect::<Vec<_>>();
                (inputs, fragments, Vec::new())
            }
        };

        if fragments.is_empty() {
            warn!(files = inputs.len(), "no document fragments to index");
            return Err(IngestError::NoDocuments(format!(
                "{} input file(s) produced no text",
                inputs.len()
            )));
        }

        let reconciliation = MetadataReconciler::new(&inputs).reconcile(&mut fragments);
        let chunks = split_fragments(&fragments, ChunkingConfig::from(&self.settings))?;
        if chunks.is_empty() {
            return Err(IngestError::NoDocuments(
                "fragments contained no indexable text".to_string(),
            ));
        }
        info!(
            fragments = fragments.len(),
            chunks = chunks.len(),
            unresolved = reconciliation.unresolved(),
            "embedding chunks"
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let mut store = LocalVectorStore::new(self.embedder.model_name());
        store.index_vector_chunks(&chunks, &embeddings)?;
        self.index = Some(store);
        info!(chunks = chunks.len(), "index built");

        Ok(IndexSummary {
            files: inputs.len(),
            fragments: fragments.len(),
            chunks: chunks.len(),
            skipped_files,
            reconciliation,
        })
    }

    async fn load_files(&self, files: Vec<PathBuf>) -> Result<LoadReport, IngestError> {
        if files.is_empty() {
            return Ok(LoadReport::default());
        }

        info!(count = files.len(), "processing pdf files");
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || load_fragments(&files, extractor.as_ref()))
            .await
            .map_err(|error| IngestError::Task(error.to_string()))
    }

    /// Writes the in-memory index to `directory`, or to the configured index
    /// directory. Returns the directory written.
    pub fn persist(&self, directory: Option<&Path>) -> Result<PathBuf, SearchError> {
        let Some(index) = &self.index else {
            error!("no index to persist");
            return Err(SearchError::NotReady("no index has been built".to_string()));
        };

        let target = directory
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.index_dir.clone());
        index.persist(&target)?;
        Ok(target)
    }

    pub fn load(&mut self, directory: Option<&Path>) -> Result<(), SearchError> {
        let source = directory
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.index_dir.clone());

        let store = LocalVectorStore::load(&source).map_err(|error| {
            error!(directory = %source.display(), %error, "failed to load index");
            error
        })?;

        if store.embedding_model() != self.embedder.model_name() {
            let error = SearchError::Request(format!(
                "index at {} was built with embedding model {} but {} is configured",
                source.display(),
                store.embedding_model(),
                self.embedder.model_name()
            ));
            error!(%error, "refusing to load index");
            return Err(error);
        }

        self.index = Some(store);
        Ok(())
    }

    pub fn retriever(&self) -> Result<Retriever<'_>, SearchError> {
        match &self.index {
            Some(index) => Ok(Retriever::new(index, self.embedder.as_ref())),
            None => {
                error!("no index available for retrieval");
                Err(SearchError::NotReady("no index loaded".to_string()))
            }
        }
    }
}

/// Read-only similarity search over a built or loaded index.
pub struct Retriever<'a> {
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a dyn VectorIndex, embedder: &'a dyn Embedder) -> Self {
        Self { index, embedder }
    }

    pub async fn retrieve(&self, text: &str, top_k: usize) -> Result<Vec<ScoredFragment>, SearchError> {
        let query = SearchQuery::new(text, top_k);
        let query_vector = self.embedder.embed_query(&query.text).await?;
        self.index.search_vector(&query_vector, &query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::PageText;
    use crate::models::FragmentMetadata;
    use crate::reconcile::UNKNOWN_SOURCE;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct FakeExtractor;

    impl PdfExtractor for FakeExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let name = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("doc");
            Ok(vec![
                PageText {
                    number: 1,
                    text: format!("{name} introduction and overview."),
                },
                PageText {
                    number: 2,
                    text: format!("{name} maintenance schedule for bearings."),
                },
            ])
        }
    }

    struct RenamedEmbedder;

    #[async_trait]
    impl Embedder for RenamedEmbedder {
        fn model_name(&self) -> &str {
            "some-other-model"
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            CharacterNgramEmbedder::default().embed_documents(texts).await
        }
    }

    fn settings_for(pdf_dir: &Path, index_dir: &Path) -> Settings {
        Settings {
            embedding_model: "char-ngram".to_string(),
            chunk_size: 64,
            chunk_overlap: 8,
            ..Settings::default()
        }
        .with_pdf_dir(pdf_dir)
        .with_index_dir(index_dir)
    }

    fn indexer(settings: Settings) -> PdfIndexer {
        PdfIndexer::new(settings, Arc::new(CharacterNgramEmbedder::default()))
            .with_extractor(Arc::new(FakeExtractor))
    }

    #[tokio::test]
    async fn empty_directory_reports_no_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut indexer = indexer(settings_for(dir.path(), &dir.path().join("index")));

        let result = indexer.process(IndexSource::Directory).await;
        assert!(matches!(result, Err(IngestError::NoDocuments(_))));
        assert!(indexer.index().is_none());
        assert!(matches!(indexer.persist(None), Err(SearchError::NotReady(_))));
        assert!(!dir.path().join("index").exists());
        Ok(())
    }

    #[tokio::test]
    async fn directory_run_builds_attributed_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["pump.pdf", "valve.pdf", "skip.txt"] {
            fs::write(dir.path().join(name), b"%PDF-1.4")?;
        }
        let mut indexer = indexer(settings_for(dir.path(), &dir.path().join("index")));

        let summary = indexer.process(IndexSource::Directory).await?;
        assert_eq!(summary.files, 2);
        assert_eq!(summary.fragments, 4);
        assert_eq!(summary.reconciliation.direct, 4);

        let index = indexer.index().expect("index built");
        let documents: BTreeSet<_> = index
            .fragments()
            .iter()
            .map(|fragment| fragment.document.as_str())
            .collect();
        assert_eq!(documents, BTreeSet::from(["pump.pdf", "valve.pdf"]));
        Ok(())
    }

    #[tokio::test]
    async fn max_pdfs_caps_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            fs::write(dir.path().join(name), b"%PDF-1.4")?;
        }
        let settings = Settings {
            max_pdfs: Some(1),
            ..settings_for(dir.path(), &dir.path().join("index"))
        };
        let mut indexer = indexer(settings);

        let summary = indexer.process(IndexSource::Directory).await?;
        assert_eq!(summary.files, 1);
        Ok(())
    }

    #[tokio::test]
    async fn explicit_fragments_always_get_a_document_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut indexer = indexer(settings_for(dir.path(), &dir.path().join("index")));
        let fragments = vec![
            DocumentFragment::new("loose text without any source", FragmentMetadata::default()),
            DocumentFragment::new(
                "text from a page",
                FragmentMetadata {
                    page_label: Some("4".to_string()),
                    ..FragmentMetadata::default()
                },
            ),
        ];

        indexer.process(IndexSource::Fragments(fragments)).await?;

        let index = indexer.index().expect("index built");
        assert!(index
            .fragments()
            .iter()
            .all(|fragment| fragment.document == UNKNOWN_SOURCE));
        Ok(())
    }

    #[tokio::test]
    async fn persisted_index_reloads_and_retrieves() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("pump.pdf"), b"%PDF-1.4")?;
        let index_dir = dir.path().join("index");
        let settings = settings_for(dir.path(), &index_dir);

        let mut builder = indexer(settings.clone());
        builder
            .process(IndexSource::Files(vec![dir.path().join("pump.pdf")]))
            .await?;
        assert_eq!(builder.persist(None)?, index_dir);

        let mut reader = indexer(settings);
        reader.load(None)?;
        let hits = reader
            .retriever()?
            .retrieve("maintenance schedule for bearings", 1)
            .await?;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fragment.document, "pump.pdf");
        assert_eq!(hits[0].fragment.page.as_deref(), Some("2"));
        Ok(())
    }

    #[tokio::test]
    async fn load_rejects_missing_directory_and_other_models() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("pump.pdf"), b"%PDF-1.4")?;
        let settings = settings_for(dir.path(), &dir.path().join("index"));

        let mut missing = indexer(settings.clone());
        assert!(matches!(missing.load(None), Err(SearchError::NotReady(_))));
        assert!(missing.retriever().is_err());

        let mut builder = indexer(settings.clone());
        builder.process(IndexSource::Directory).await?;
        builder.persist(None)?;

        let mut other = PdfIndexer::new(settings, Arc::new(RenamedEmbedder))
            .with_extractor(Arc::new(FakeExtractor));
        assert!(matches!(other.load(None), Err(SearchError::Request(_))));
        assert!(other.index().is_none());
        Ok(())
    }
}
