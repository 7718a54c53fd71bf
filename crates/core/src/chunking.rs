use crate::config::Settings;
use crate::error::IngestError;
use crate::models::{DocumentFragment, FragmentMetadata};
use regex::Regex;
use sha2::{Digest, Sha256};

/// A token ends a sentence when it ends in `.`, `!` or `?`, optionally
/// followed by closing quotes or brackets.
const SENTENCE_END_PATTERN: &str = r#"[.!?]["')\]]*$"#;

/// Chunk sizes are counted in whitespace-separated tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&Settings> for ChunkingConfig {
    fn from(value: &Settings) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `text` into overlapping windows of at most `chunk_size` tokens,
/// ending a window early on a sentence boundary when one falls in its
/// second half. Tokens are never altered: joining a single window gives
/// back the whitespace-normalized input.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;
    let sentence_end = Regex::new(SENTENCE_END_PATTERN)?;
    Ok(chunk_words(text, config, &sentence_end))
}

fn chunk_words(text: &str, config: ChunkingConfig, sentence_end: &Regex) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let boundaries: Vec<usize> = words
        .iter()
        .enumerate()
        .filter(|(_, word)| sentence_end.is_match(word))
        .map(|(position, _)| position + 1)
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + config.chunk_size).min(words.len());
        if end < words.len() {
            let earliest = start + config.chunk_size / 2;
            if let Some(boundary) = boundaries
                .iter()
                .rev()
                .find(|boundary| **boundary <= end && **boundary > earliest)
            {
                end = *boundary;
            }
        }

        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start = end.saturating_sub(config.chunk_overlap).max(start + 1);
    }

    chunks
}

/// Splits every fragment into chunks that inherit its metadata.
pub fn split_fragments(
    fragments: &[DocumentFragment],
    config: ChunkingConfig,
) -> Result<Vec<DocumentFragment>, IngestError> {
    config.validate()?;
    let sentence_end = Regex::new(SENTENCE_END_PATTERN)?;
    let mut chunks = Vec::new();

    for fragment in fragments {
        for (index, text) in chunk_words(&fragment.text, config, &sentence_end)
            .into_iter()
            .enumerate()
        {
            chunks.push(DocumentFragment {
                id: fragment_id(&fragment.metadata, index as u64, &text),
                text,
                metadata: fragment.metadata.clone(),
            });
        }
    }

    Ok(chunks)
}

pub fn fragment_id(metadata: &FragmentMetadata, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(path) = &metadata.file_path {
        hasher.update(path.to_string_lossy().as_bytes());
    }
    if let Some(name) = metadata.filename.as_ref().or(metadata.file_name.as_ref()) {
        hasher.update(name.as_bytes());
    }
    if let Some(label) = &metadata.page_label {
        hasher.update(label.as_bytes());
    }
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
