use crate::extractor::PdfExtractor;
use crate::models::{DocumentFragment, FragmentMetadata};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Recursively lists the PDFs under `folder` in path order, keeping at most
/// `max_files` when a cap is given.
pub fn discover_pdf_files(folder: &Path, max_files: Option<usize>) -> Vec<PathBuf> {
    if !folder.is_dir() {
        warn!(folder = %folder.display(), "pdf directory does not exist");
        return Vec::new();
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && has_pdf_extension(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    if let Some(limit) = max_files {
        files.truncate(limit);
    }

    info!(folder = %folder.display(), count = files.len(), "discovered pdf files");
    files
}

/// Keeps the explicitly requested paths that exist and look like PDFs.
pub fn select_existing_pdfs(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|path| {
            let keep = path.is_file() && has_pdf_extension(path);
            if !keep {
                warn!(path = %path.display(), "ignoring missing or non-pdf file");
            }
            keep
        })
        .cloned()
        .collect()
}

pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub fragments: Vec<DocumentFragment>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Parses each file into one fragment per page. A file that fails to parse
/// is logged and skipped; the rest are still loaded.
pub fn load_fragments(files: &[PathBuf], extractor: &dyn PdfExtractor) -> LoadReport {
    let mut report = LoadReport::default();

    for path in files {
        match extractor.extract_pages(path) {
            Ok(pages) => {
                let file_name = file_name_of(path);
                let before = report.fragments.len();
                for page in pages {
                    let metadata = FragmentMetadata {
                        file_path: Some(path.clone()),
                        file_name: file_name.clone(),
                        page_label: Some(page.number.to_string()),
                        page: Some(page.number),
                        ..FragmentMetadata::default()
                    };
                    report
                        .fragments
                        .push(DocumentFragment::new(page.text, metadata));
                }
                info!(
                    path = %path.display(),
                    pages = report.fragments.len() - before,
                    "loaded pdf"
                );
            }
            Err(reason) => {
                error!(path = %path.display(), error = %reason, "failed to load pdf");
                report.skipped_files.push(SkippedPdf {
                    path: path.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    report
}
