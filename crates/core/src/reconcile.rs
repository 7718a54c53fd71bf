//! Source attribution for loaded fragments.
//!
//! The PDF parser does not reliably stamp fragments with the file they came
//! from, so every fragment is attributed by the first rule that applies:
//!
//! 1. an existing `file_path` gives the basename and byte size directly;
//! 2. the alternate identifiers (`source`, `source_filename`, `file_name`,
//!    `document_id`) are reduced to a basename and substring-matched in
//!    either direction against the known filenames, visited in ascending
//!    lexicographic order so the first match is deterministic;
//! 3. a run over exactly one input file attributes everything to it;
//! 4. a fragment with a page marker gets a collective label naming up to
//!    [`MAX_LISTED_FILES`] known files, or a generic collection label;
//! 5. anything else is labelled [`UNKNOWN_SOURCE`].

use crate::ingest::file_name_of;
use crate::models::DocumentFragment;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const UNKNOWN_SOURCE: &str = "unknown";
pub const COLLECTION_LABEL: &str = "One PDF from the collection";
pub const MAX_LISTED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    DirectPath,
    Matched,
    SoleFile,
    Collection,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub direct: usize,
    pub matched: usize,
    pub sole_file: usize,
    pub collection: usize,
    pub unknown: usize,
}

impl ReconcileSummary {
    fn record(&mut self, attribution: Attribution) {
        match attribution {
            Attribution::DirectPath => self.direct += 1,
            Attribution::Matched => self.matched += 1,
            Attribution::SoleFile => self.sole_file += 1,
            Attribution::Collection => self.collection += 1,
            Attribution::Unknown => self.unknown += 1,
        }
    }

    pub fn unresolved(&self) -> usize {
        self.collection + self.unknown
    }
}

pub struct MetadataReconciler {
    /// Known filename to byte size.
    known: BTreeMap<String, u64>,
    input_files: Vec<PathBuf>,
}

impl MetadataReconciler {
    pub fn new(input_files: &[PathBuf]) -> Self {
        let mut known = BTreeMap::new();
        for path in input_files {
            if let Some(name) = file_name_of(path) {
                known
                    .entry(name)
                    .or_insert_with(|| file_size(path).unwrap_or(0));
            }
        }

        Self {
            known,
            input_files: input_files.to_vec(),
        }
    }

    pub fn known_filenames(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }

    /// Assigns `filename` and `filesize` to every fragment in place.
    pub fn reconcile(&mut self, fragments: &mut [DocumentFragment]) -> ReconcileSummary {
        self.learn_direct_paths(fragments);

        let mut summary = ReconcileSummary::default();
        let mut warned = false;

        for fragment in fragments.iter_mut() {
            let attribution = self.attribute(fragment);
            summary.record(attribution);

            if matches!(attribution, Attribution::Collection | Attribution::Unknown) && !warned {
                warn!(
                    known_files = self.known.len(),
                    "some fragments could not be attributed to a single source file"
                );
                warned = true;
            }
        }

        summary
    }

    fn learn_direct_paths(&mut self, fragments: &[DocumentFragment]) {
        for fragment in fragments {
            let Some(path) = fragment.metadata.file_path.as_deref() else {
                continue;
            };
            let (Some(name), Some(size)) = (file_name_of(path), file_size(path)) else {
                continue;
            };
            self.known.entry(name).or_insert(size);
        }
    }

    fn attribute(&self, fragment: &mut DocumentFragment) -> Attribution {
        let metadata = &mut fragment.metadata;

        if let Some(path) = metadata.file_path.as_deref() {
            if let (Some(name), Some(size)) = (file_name_of(path), file_size(path)) {
                metadata.filename = Some(name);
                metadata.filesize = size;
                return Attribution::DirectPath;
            }
        }

        let matched = metadata
            .alternate_identifiers()
            .into_iter()
            .flatten()
            .find_map(|candidate| self.match_known(candidate));
        if let Some((name, size)) = matched {
            metadata.filename = Some(name.to_string());
            metadata.filesize = size;
            return Attribution::Matched;
        }

        if let [only] = self.input_files.as_slice() {
            if let Some(name) = file_name_of(only) {
                metadata.filename = Some(name);
                metadata.filesize = file_size(only).unwrap_or(0);
                return Attribution::SoleFile;
            }
        }

        metadata.filesize = 0;
        if metadata.has_page_marker() && !self.known.is_empty() {
            metadata.filename = Some(self.collection_label());
            Attribution::Collection
        } else {
            metadata.filename = Some(UNKNOWN_SOURCE.to_string());
            Attribution::Unknown
        }
    }

    fn match_known(&self, candidate: &str) -> Option<(&str, u64)> {
        let basename = basename(candidate);
        if basename.is_empty() {
            return None;
        }

        self.known
            .iter()
            .find(|(name, _)| name.contains(basename) || basename.contains(name.as_str()))
            .map(|(name, size)| (name.as_str(), *size))
    }

    fn collection_label(&self) -> String {
        if self.known.len() <= MAX_LISTED_FILES {
            let names: Vec<&str> = self.known_filenames().collect();
            format!("One PDF from: {}", names.join(", "))
        } else {
            COLLECTION_LABEL.to_string()
        }
    }
}

fn basename(candidate: &str) -> &str {
    candidate
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
}
