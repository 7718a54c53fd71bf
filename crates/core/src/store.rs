use crate::models::{DocumentFragment, SourceRecord};
use crate::reconcile::UNKNOWN_SOURCE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const FRAGMENTS_FILE: &str = "fragments.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub index_id: Uuid,
    pub embedding_model: String,
    pub dimensions: usize,
    pub fragment_count: usize,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            index_id: Uuid::new_v4(),
            embedding_model: embedding_model.into(),
            dimensions: 0,
            fragment_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A fragment as kept in the index: attribution is already resolved, so
/// `document` is always set.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFragment {
    pub id: String,
    pub text: String,
    pub document: String,
    pub page: Option<String>,
    #[serde(default)]
    pub filesize: u64,
    #[serde(with = "embedding_base64")]
    pub embedding: Vec<f32>,
}

impl StoredFragment {
    pub fn from_fragment(fragment: &DocumentFragment, embedding: Vec<f32>) -> Self {
        let metadata = &fragment.metadata;
        let document = metadata
            .filename
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        Self {
            id: fragment.id.clone(),
            text: fragment.text.clone(),
            document,
            page: metadata
                .page_label
                .clone()
                .or_else(|| metadata.page.map(|page| page.to_string())),
            filesize: metadata.filesize,
            embedding,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub fragment: StoredFragment,
    pub score: f64,
}

impl ScoredFragment {
    pub fn to_source_record(&self) -> SourceRecord {
        SourceRecord {
            text: self.fragment.text.clone(),
            score: Some(self.score),
            document: self.fragment.document.clone(),
            page: self
                .fragment
                .page
                .clone()
                .unwrap_or_else(|| crate::models::UNKNOWN_PAGE.to_string()),
        }
    }
}

/// Vectors are stored as base64 of their little-endian `f32` bytes.
mod embedding_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vector: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: Vec<u8> = vector.iter().flat_map(|value| value.to_le_bytes()).collect();
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded).map_err(D::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(D::Error::custom(format!(
                "embedding byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}
