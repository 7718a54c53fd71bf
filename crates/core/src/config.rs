use crate::error::ConfigError;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_PDF_DIR: &str = "pdfs";
pub const DEFAULT_INDEX_DIR: &str = "index_storage";
pub const DEFAULT_EMBEDDING_MODEL: &str = "intfloat/multilingual-e5-large";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    #[default]
    OpenAi,
    Anthropic,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Anthropic => "anthropic",
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide settings, resolved once at startup and handed to every
/// component constructor.
#[derive(Clone)]
pub struct Settings {
    pub pdf_dir: PathBuf,
    pub index_dir: PathBuf,
    pub llm_provider: LlmProviderKind,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_model: String,
    pub anthropic_max_tokens: u32,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub huggingface_api_key: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    /// `None` processes every discovered PDF.
    pub max_pdfs: Option<usize>,
    pub similarity_top_k: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from(DEFAULT_PDF_DIR),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            llm_provider: LlmProviderKind::default(),
            openai_api_key: None,
            anthropic_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            anthropic_max_tokens: 1_024,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            huggingface_api_key: None,
            chunk_size: 512,
            chunk_overlap: 50,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            max_pdfs: None,
            similarity_top_k: 5,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("pdf_dir", &self.pdf_dir)
            .field("index_dir", &self.index_dir)
            .field("llm_provider", &self.llm_provider)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_model", &self.openai_model)
            .field("anthropic_model", &self.anthropic_model)
            .field("embedding_model", &self.embedding_model)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("max_pdfs", &self.max_pdfs)
            .field("similarity_top_k", &self.similarity_top_k)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Settings::default();

        let llm_provider = match read("LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.llm_provider,
        };

        let max_pdfs = parse_number::<usize>("MAX_PDFS", read("MAX_PDFS"))?
            .filter(|limit| *limit > 0);

        let settings = Self {
            pdf_dir: read("PDF_DIR").map(PathBuf::from).unwrap_or(defaults.pdf_dir),
            index_dir: read("INDEX_DIR").map(PathBuf::from).unwrap_or(defaults.index_dir),
            llm_provider,
            openai_api_key: read("OPENAI_API_KEY"),
            anthropic_api_key: read("ANTHROPIC_API_KEY"),
            openai_model: read("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            anthropic_model: read("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            anthropic_max_tokens: parse_number("ANTHROPIC_MAX_TOKENS", read("ANTHROPIC_MAX_TOKENS"))?
                .unwrap_or(defaults.anthropic_max_tokens),
            openai_base_url: read("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            anthropic_base_url: read("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic_base_url),
            huggingface_api_key: read("HF_API_TOKEN"),
            chunk_size: parse_number("CHUNK_SIZE", read("CHUNK_SIZE"))?
                .unwrap_or(defaults.chunk_size),
            chunk_overlap: parse_number("CHUNK_OVERLAP", read("CHUNK_OVERLAP"))?
                .unwrap_or(defaults.chunk_overlap),
            embedding_model: read("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            max_pdfs,
            similarity_top_k: parse_number("SIMILARITY_TOP_K", read("SIMILARITY_TOP_K"))?
                .unwrap_or(defaults.similarity_top_k),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHUNK_SIZE",
                value: self.chunk_size.to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::ChunkOverlap {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        if self.similarity_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIMILARITY_TOP_K",
                value: self.similarity_top_k.to_string(),
            });
        }
        Ok(())
    }

    pub fn with_pdf_dir(mut self, pdf_dir: impl Into<PathBuf>) -> Self {
        self.pdf_dir = pdf_dir.into();
        self
    }

    pub fn with_index_dir(mut self, index_dir: impl Into<PathBuf>) -> Self {
        self.index_dir = index_dir.into();
        self
    }

    /// Creates the PDF source directory. The index directory is only
    /// created when an index is persisted.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        ensure_dir(&self.pdf_dir)
    }
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        tracing::info!(path = %path.display(), "created directory");
    }
    Ok(())
}

fn parse_number<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let settings = Settings::from_lookup(|_| None).expect("defaults are valid");
        assert_eq!(settings.pdf_dir, PathBuf::from("pdfs"));
        assert_eq!(settings.index_dir, PathBuf::from("index_storage"));
        assert_eq!(settings.llm_provider, LlmProviderKind::OpenAi);
        assert_eq!(settings.chunk_size, 512);
        assert_eq!(settings.chunk_overlap, 50);
        assert_eq!(settings.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(settings.max_pdfs, None);
    }

    #[test]
    fn environment_values_override_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("PDF_DIR", "/data/pdfs"),
            ("LLM_PROVIDER", "Anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("CHUNK_SIZE", "256"),
            ("CHUNK_OVERLAP", "16"),
            ("MAX_PDFS", "3"),
        ]))
        .expect("valid settings");

        assert_eq!(settings.pdf_dir, PathBuf::from("/data/pdfs"));
        assert_eq!(settings.llm_provider, LlmProviderKind::Anthropic);
        assert_eq!(settings.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(settings.chunk_size, 256);
        assert_eq!(settings.chunk_overlap, 16);
        assert_eq!(settings.max_pdfs, Some(3));
    }

    #[test]
    fn zero_max_pdfs_means_unlimited() {
        let settings = Settings::from_lookup(lookup_from(&[("MAX_PDFS", "0")])).unwrap();
        assert_eq!(settings.max_pdfs, None);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let error = Settings::from_lookup(lookup_from(&[("CHUNK_SIZE", "large")])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { key: "CHUNK_SIZE", .. }));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let error = Settings::from_lookup(lookup_from(&[("LLM_PROVIDER", "llama")])).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownProvider(_)));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let error = Settings::from_lookup(lookup_from(&[
            ("CHUNK_SIZE", "10"),
            ("CHUNK_OVERLAP", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(error, ConfigError::ChunkOverlap { size: 10, overlap: 10 }));
    }

    #[test]
    fn overrides_replace_directories() {
        let settings = Settings::default()
            .with_pdf_dir("/tmp/in")
            .with_index_dir("/tmp/out");
        assert_eq!(settings.pdf_dir, PathBuf::from("/tmp/in"));
        assert_eq!(settings.index_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn debug_output_hides_api_keys() {
        let settings = Settings {
            openai_api_key: Some("sk-secret".to_string()),
            ..Settings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
