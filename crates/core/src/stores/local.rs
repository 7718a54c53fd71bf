use crate::models::{DocumentFragment, SearchQuery};
use crate::store::{
    IndexManifest, ScoredFragment, StoredFragment, FRAGMENTS_FILE, INDEX_FORMAT_VERSION,
    MANIFEST_FILE,
};
use crate::traits::VectorIndex;
use crate::SearchError;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Brute-force cosine index kept in memory and persisted as two JSON files.
#[derive(Debug, Clone)]
pub struct LocalVectorStore {
    manifest: IndexManifest,
    fragments: Vec<StoredFragment>,
}

impl LocalVectorStore {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            manifest: IndexManifest::new(embedding_model),
            fragments: Vec::new(),
        }
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    pub fn fragments(&self) -> &[StoredFragment] {
        &self.fragments
    }

    pub fn persist(&self, directory: &Path) -> Result<(), SearchError> {
        fs::create_dir_all(directory)?;
        write_json(&directory.join(FRAGMENTS_FILE), &self.fragments)?;
        write_json(&directory.join(MANIFEST_FILE), &self.manifest)?;

        info!(
            directory = %directory.display(),
            fragments = self.fragments.len(),
            index_id = %self.manifest.index_id,
            "persisted index"
        );
        Ok(())
    }

    pub fn load(directory: &Path) -> Result<Self, SearchError> {
        if !directory.is_dir() {
            return Err(SearchError::NotReady(format!(
                "index directory does not exist: {}",
                directory.display()
            )));
        }

        let manifest: IndexManifest =
            serde_json::from_slice(&fs::read(directory.join(MANIFEST_FILE))?)?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(SearchError::CorruptIndex(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }

        let fragments: Vec<StoredFragment> =
            serde_json::from_slice(&fs::read(directory.join(FRAGMENTS_FILE))?)?;
        if fragments.len() != manifest.fragment_count {
            return Err(SearchError::CorruptIndex(format!(
                "manifest lists {} fragments but {} were stored",
                manifest.fragment_count,
                fragments.len()
            )));
        }
        if let Some(bad) = fragments
            .iter()
            .find(|fragment| fragment.embedding.len() != manifest.dimensions)
        {
            return Err(SearchError::CorruptIndex(format!(
                "fragment {} has dimension {} instead of {}",
                bad.id,
                bad.embedding.len(),
                manifest.dimensions
            )));
        }

        info!(
            directory = %directory.display(),
            fragments = fragments.len(),
            embedding_model = %manifest.embedding_model,
            "loaded index"
        );
        Ok(Self {
            manifest,
            fragments,
        })
    }
}

impl VectorIndex for LocalVectorStore {
    fn index_vector_chunks(
        &mut self,
        chunks: &[DocumentFragment],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut dimensions = self.manifest.dimensions;
        for embedding in embeddings {
            if dimensions == 0 {
                dimensions = embedding.len();
            }
            if embedding.is_empty() || embedding.len() != dimensions {
                return Err(SearchError::Request(format!(
                    "embedding dimension {} != {}",
                    embedding.len(),
                    dimensions
                )));
            }
        }

        self.fragments.extend(
            chunks
                .iter()
                .zip(embeddings.iter())
                .map(|(chunk, embedding)| StoredFragment::from_fragment(chunk, embedding.clone())),
        );
        self.manifest.dimensions = dimensions;
        self.manifest.fragment_count = self.fragments.len();
        Ok(())
    }

    fn search_vector(
        &self,
        query_vector: &[f32],
        query: &SearchQuery,
    ) -> Result<Vec<ScoredFragment>, SearchError> {
        if self.fragments.is_empty() || query.top_k == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.manifest.dimensions {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.manifest.dimensions
            )));
        }

        let mut hits: Vec<(usize, f64)> = self
            .fragments
            .iter()
            .enumerate()
            .map(|(position, fragment)| {
                (position, cosine_similarity(query_vector, &fragment.embedding))
            })
            .collect();
        hits.sort_by(|left, right| right.1.total_cmp(&left.1));
        hits.truncate(query.top_k);

        Ok(hits
            .into_iter()
            .map(|(position, score)| ScoredFragment {
                fragment: self.fragments[position].clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.fragments.len()
    }
}

/// Writes through a temporary file so a reader never sees half a file.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SearchError> {
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, serde_json::to_vec(value)?)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut a_norm = 0.0f64;
    let mut b_norm = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
