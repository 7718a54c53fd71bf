pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod query_engine;
pub mod reconcile;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, normalize_whitespace, split_fragments, ChunkingConfig};
pub use config::{LlmProviderKind, Settings};
pub use embeddings::{build_embedder, CharacterNgramEmbedder, Embedder, LOCAL_EMBEDDING_MODEL};
pub use error::{ConfigError, IngestError, SearchError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use indexer::{IndexSource, IndexSummary, PdfIndexer, Retriever};
pub use ingest::{discover_pdf_files, load_fragments, select_existing_pdfs, LoadReport, SkippedPdf};
pub use llm::build_language_model;
pub use models::{DocumentFragment, FragmentMetadata, QueryResponse, SearchQuery, SourceRecord};
pub use query_engine::QueryEngine;
pub use reconcile::{MetadataReconciler, ReconcileSummary};
pub use store::{IndexManifest, ScoredFragment, StoredFragment};
pub use stores::LocalVectorStore;
pub use traits::{ChatRequest, LanguageModel, VectorIndex};
