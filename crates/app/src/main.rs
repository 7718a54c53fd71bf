use anyhow::Context;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use pdf_query_core::{
    build_embedder, build_language_model, normalize_whitespace, select_existing_pdfs, IndexSource,
    IngestError, PdfIndexer, QueryEngine, QueryResponse, Settings, SourceRecord,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const QUERY_EXCERPT_CHARS: usize = 500;
const INTERACTIVE_EXCERPT_CHARS: usize = 150;
const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "q"];

#[derive(Parser)]
#[command(name = "pdf-query", version, about = "Index a folder of PDFs and ask questions about it.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// File that receives a copy of every log line.
    #[arg(
        long = "log_file",
        env = "LOG_FILE",
        default_value = "pdf_query.log",
        global = true
    )]
    log_file: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Parse PDFs, embed their chunks and persist the index.
    Index {
        /// Folder scanned recursively for PDFs.
        #[arg(long = "pdf_dir")]
        pdf_dir: Option<PathBuf>,
        #[arg(long = "index_dir")]
        index_dir: Option<PathBuf>,
        /// Index only these PDF files instead of scanning the folder.
        #[arg(long, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Answer a single question from the index.
    Query {
        question: String,
        #[arg(long = "index_dir")]
        index_dir: Option<PathBuf>,
        /// Number of sources to print.
        #[arg(long = "max_results", default_value_t = 5)]
        max_results: usize,
    },
    /// List the most similar fragments without generating an answer.
    Search {
        query: String,
        #[arg(long = "index_dir")]
        index_dir: Option<PathBuf>,
        /// Defaults to SIMILARITY_TOP_K.
        #[arg(long = "top_k")]
        top_k: Option<usize>,
    },
    /// Ask questions in a loop until exit, quit or q.
    Interactive {
        #[arg(long = "index_dir")]
        index_dir: Option<PathBuf>,
        #[arg(long = "max_results", default_value_t = 5)]
        max_results: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_file);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-query boot"
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "pdf-query failed");
            eprintln!("Error: {error:#}");
            eprintln!("See the log file for details.");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_file: &Path) {
    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(Mutex::new(file)),
        ),
        Err(error) => {
            eprintln!("warning: cannot open log file {}: {error}", log_file.display());
            None
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let settings = Settings::from_env().context("invalid configuration")?;

    match command {
        Command::Index {
            pdf_dir,
            index_dir,
            files,
        } => {
            let mut settings = settings;
            if let Some(pdf_dir) = pdf_dir {
                settings = settings.with_pdf_dir(pdf_dir);
            }
            if let Some(index_dir) = index_dir {
                settings = settings.with_index_dir(index_dir);
            }
            run_index(settings, files).await
        }
        Command::Query {
            question,
            index_dir,
            max_results,
        } => {
            let engine = open_engine(&settings, index_dir.as_deref())?;
            let response = engine.query(&question, max_results).await;
            print!("{}", render_response(&question, &response, QUERY_EXCERPT_CHARS));
            Ok(())
        }
        Command::Search {
            query,
            index_dir,
            top_k,
        } => {
            let engine = open_engine(&settings, index_dir.as_deref())?;
            let top_k = top_k.unwrap_or(settings.similarity_top_k);
            let sources = engine.similarity_search(&query, top_k).await?;
            println!("Query: {query}\n");
            if sources.is_empty() {
                println!("No matching fragments.");
            } else {
                print!("{}", render_sources(&sources, QUERY_EXCERPT_CHARS));
            }
            Ok(())
        }
        Command::Interactive {
            index_dir,
            max_results,
        } => {
            let engine = open_engine(&settings, index_dir.as_deref())?;
            run_interactive(&engine, max_results).await
        }
    }
}

async fn run_index(settings: Settings, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let source = if files.is_empty() {
        settings
            .ensure_directories()
            .with_context(|| format!("failed to create {}", settings.pdf_dir.display()))?;
        IndexSource::Directory
    } else {
        let existing = select_existing_pdfs(&files);
        if existing.is_empty() {
            error!(requested = files.len(), "none of the given files is an existing PDF");
            println!("No valid PDF files given; nothing was indexed.");
            return Ok(());
        }
        IndexSource::Files(existing)
    };

    let embedder = build_embedder(&settings)?;
    let mut indexer = PdfIndexer::new(settings, embedder);
    let summary = match indexer.process(source).await {
        Ok(summary) => summary,
        Err(IngestError::NoDocuments(reason)) => {
            error!(%reason, "no documents were loaded");
            println!("No documents found to index.");
            return Ok(());
        }
        Err(other) => return Err(other).context("indexing failed"),
    };

    for skipped in &summary.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }

    let target = indexer.persist(None).context("failed to persist index")?;
    println!(
        "Indexed {} chunks from {} file(s) into {} at {}",
        summary.chunks,
        summary.files.saturating_sub(summary.skipped_files.len()),
        target.display(),
        Utc::now().to_rfc3339()
    );
    if !summary.skipped_files.is_empty() {
        println!("Skipped {} unreadable file(s).", summary.skipped_files.len());
    }
    Ok(())
}

fn open_engine(settings: &Settings, index_dir: Option<&Path>) -> anyhow::Result<QueryEngine> {
    let embedder = build_embedder(settings)?;
    let language_model = build_language_model(settings)?;
    Ok(QueryEngine::open(settings, index_dir, embedder, language_model))
}

async fn run_interactive(engine: &QueryEngine, max_results: usize) -> anyhow::Result<()> {
    println!("Ask questions about your PDFs. Type exit, quit or q to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nQuestion: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            break;
        }

        let response = engine.query(question, max_results).await;
        print!("{}", render_response(question, &response, INTERACTIVE_EXCERPT_CHARS));
    }

    println!("Goodbye.");
    Ok(())
}

fn is_exit_command(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    EXIT_COMMANDS.contains(&input.as_str())
}

fn render_response(question: &str, response: &QueryResponse, excerpt_chars: usize) -> String {
    match response {
        QueryResponse::Error { error } => format!("Error: {error}\n"),
        QueryResponse::Answer { answer, sources } => {
            let mut out = format!("Question: {question}\n\nAnswer: {answer}\n");
            if !sources.is_empty() {
                out.push_str("\nSources:\n");
                out.push_str(&render_sources(sources, excerpt_chars));
            }
            out
        }
    }
}

fn render_sources(sources: &[SourceRecord], excerpt_chars: usize) -> String {
    let mut out = String::new();
    for (position, source) in sources.iter().enumerate() {
        let score = source
            .score
            .map(|score| format!("{score:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        out.push_str(&format!(
            "{}. {} (page {}, score {})\n   {}\n",
            position + 1,
            source.document,
            source.page,
            score,
            excerpt(&source.text, excerpt_chars)
        ));
    }
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flattened = normalize_whitespace(text);
    match flattened.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flattened[..cut]),
        None => flattened,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn local_settings(root: &Path) -> Settings {
        Settings {
            embedding_model: "char-ngram".to_string(),
            ..Settings::default()
        }
        .with_pdf_dir(root.join("pdfs"))
        .with_index_dir(root.join("index"))
    }

    #[tokio::test]
    async fn index_with_only_missing_files_writes_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let settings = local_settings(dir.path());
        let index_dir = settings.index_dir.clone();

        run_index(settings, vec![dir.path().join("nonexistent.pdf")]).await?;

        assert!(!index_dir.exists());
        assert!(!dir.path().join("pdfs").exists());
        Ok(())
    }

    #[tokio::test]
    async fn index_with_only_unreadable_files_writes_nothing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"%PDF-1.4\nnot really")?;
        let settings = local_settings(dir.path());
        let index_dir = settings.index_dir.clone();

        run_index(settings, vec![broken]).await?;

        assert!(!index_dir.exists());
        Ok(())
    }

    fn source(text: &str, score: Option<f64>) -> SourceRecord {
        SourceRecord {
            text: text.to_string(),
            score,
            document: "manual.pdf".to_string(),
            page: "2".to_string(),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn index_accepts_several_files() {
        let cli = Cli::try_parse_from([
            "pdf-query", "index", "--files", "a.pdf", "b.pdf", "--index_dir", "out",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Index {
                files, index_dir, ..
            }) => {
                assert_eq!(files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
                assert_eq!(index_dir, Some(PathBuf::from("out")));
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn query_defaults_to_five_results() {
        let cli = Cli::try_parse_from(["pdf-query", "query", "what is on page 2?"]).unwrap();
        match cli.command {
            Some(Command::Query {
                question,
                max_results,
                ..
            }) => {
                assert_eq!(question, "what is on page 2?");
                assert_eq!(max_results, 5);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn missing_subcommand_parses() {
        let cli = Cli::try_parse_from(["pdf-query"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command(" QUIT "));
        assert!(is_exit_command("Q"));
        assert!(!is_exit_command("question"));
    }

    #[test]
    fn excerpt_cuts_on_characters() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("ünïcödé text", 7), "ünïcödé...");
        assert_eq!(excerpt("line one\n\nline   two", 100), "line one line two");
    }

    #[test]
    fn answer_lists_numbered_sources() {
        let response = QueryResponse::Answer {
            answer: "Weekly.".to_string(),
            sources: vec![source("Grease the bearings.", Some(0.91234)), source("x", None)],
        };
        let rendered = render_response("How often?", &response, 150);
        assert!(rendered.starts_with("Question: How often?\n\nAnswer: Weekly.\n"));
        assert!(rendered.contains("1. manual.pdf (page 2, score 0.9123)\n   Grease the bearings.\n"));
        assert!(rendered.contains("2. manual.pdf (page 2, score n/a)"));
    }

    #[test]
    fn error_response_is_printed_as_error() {
        let rendered = render_response("q", &QueryResponse::error("index not available"), 150);
        assert_eq!(rendered, "Error: index not available\n");
    }
}
