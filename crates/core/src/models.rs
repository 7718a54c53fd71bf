use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;

/// Metadata attached to a fragment by the loader and completed by the
/// reconciler. Every field the parser may leave unset is optional.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub file_path: Option<PathBuf>,
    pub source: Option<String>,
    pub source_filename: Option<String>,
    pub file_name: Option<String>,
    pub document_id: Option<String>,
    pub page_label: Option<String>,
    pub page: Option<u32>,
    pub filename: Option<String>,
    #[serde(default)]
    pub filesize: u64,
}

impl FragmentMetadata {
    /// Alternate identifiers probed when no usable file path exists, in
    /// probing order.
    pub fn alternate_identifiers(&self) -> [Option<&str>; 4] {
        [
            self.source.as_deref(),
            self.source_filename.as_deref(),
            self.file_name.as_deref(),
            self.document_id.as_deref(),
        ]
    }

    pub fn has_page_marker(&self) -> bool {
        self.page_label.is_some() || self.page.is_some()
    }

    pub fn page_display(&self) -> String {
        self.page_label
            .clone()
            .or_else(|| self.page.map(|page| page.to_string()))
            .unwrap_or_else(|| UNKNOWN_PAGE.to_string())
    }
}

pub const UNKNOWN_PAGE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFragment {
    pub id: String,
    pub text: String,
    pub metadata: FragmentMetadata,
}

impl DocumentFragment {
    pub fn new(text: impl Into<String>, metadata: FragmentMetadata) -> Self {
        let text = text.into();
        Self {
            id: crate::chunking::fragment_id(&metadata, 0, &text),
            text,
            metadata,
        }
    }
}

/// One retrieved fragment as shown to callers.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub text: String,
    pub score: Option<f64>,
    pub document: String,
    pub page: String,
}

/// Outcome of a question. Serializes to `{answer, sources}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Answer {
        answer: String,
        sources: Vec<SourceRecord>,
    },
    Error {
        error: String,
    },
}

impl QueryResponse {
    pub fn error(message: impl Into<String>) -> Self {
        QueryResponse::Error {
            error: message.into(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            QueryResponse::Error { error } => Some(error),
            QueryResponse::Answer { .. } => None,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            QueryResponse::Answer { answer, .. } => Some(answer),
            QueryResponse::Error { .. } => None,
        }
    }

    pub fn sources(&self) -> &[SourceRecord] {
        match self {
            QueryResponse::Answer { sources, .. } => sources,
            QueryResponse::Error { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}
