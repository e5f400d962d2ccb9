//! CLI binary for edgequake-pdfops.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DispatchConfig`, turns `-O key=value` pairs into raw options and writes
//! the packaged result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_pdfops::{
    load_document, DispatchConfig, DispatchError, Dispatcher, DocumentRequest, Engines,
    PackagedResult, Registry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compress for messaging apps
  pdfops run compress report.pdf -O mode=whatsapp

  # First page as a 300 DPI PNG
  pdfops run convert slides.pdf -O format=png -O dpi=300 -o cover.png

  # OCR a scan into Word
  pdfops run extractText scan.pdf -O language=fra -O outputFormat=docx

  # Translate into a new PDF
  pdfops run translate https://example.com/paper.pdf -O targetLanguage=fr -O outputFormat=pdf

  # Watermark and encrypt
  pdfops run secure contract.pdf -O action=both -O password=s3cret -O watermarkText=DRAFT

  # What can I run?
  pdfops list --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (extractText, summarize, translate)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (convert to image, extractText)
  PDFOPS_QPDF             qpdf executable (secure with a password)
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Run document operations on PDF files and URLs.
#[derive(Parser, Debug)]
#[command(
    name = "pdfops",
    version,
    about = "Compress, convert, OCR, summarize, translate and secure PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Working directory for temporary artifacts (default: private temp dir).
    #[arg(long, global = true, env = "PDFOPS_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Largest accepted input in MiB.
    #[arg(long, global = true, env = "PDFOPS_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: u64,

    /// Time bound per operation in seconds.
    #[arg(long, global = true, env = "PDFOPS_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Concurrent LLM calls per request.
    #[arg(long, global = true, env = "PDFOPS_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "PDFOPS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// qpdf executable used for password protection.
    #[arg(long, global = true, env = "PDFOPS_QPDF", default_value = "qpdf")]
    qpdf: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOPS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOPS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one operation on a local file or URL.
    Run {
        /// Operation name or alias (see `pdfops list`).
        operation: String,

        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Operation option as key=value; repeatable.
        #[arg(short = 'O', long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,

        /// Output file (default: the packaged file name in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print result metadata as JSON.
        #[arg(long)]
        json: bool,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "PDFOPS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
    },

    /// List registered operations and their options.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Check the working directory and engines.
    Health,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty option name in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let registry = Arc::new(Registry::builtin().context("Failed to build operation registry")?);

    match &cli.command {
        Command::List { json } => {
            print_operations(&registry, *json)?;
            Ok(())
        }
        Command::Health => {
            let dispatcher = build_dispatcher(&cli, registry, false)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&dispatcher.health())
                    .context("Failed to serialise health")?
            );
            Ok(())
        }
        Command::Run {
            operation,
            input,
            options,
            output,
            json,
            download_timeout,
        } => {
            let dispatcher = build_dispatcher(&cli, registry, true)?;
            let doc = load_document(input, *download_timeout, cli.max_upload_mb * 1024 * 1024)
                .await
                .with_context(|| format!("Failed to load '{input}'"))?;

            let mut request = DocumentRequest::new(operation.as_str(), doc.file_name, doc.bytes);
            for (key, value) in options {
                request = request.option(key.as_str(), value.as_str());
            }

            let spinner = (!cli.quiet).then(|| spinner(operation));
            let result = dispatcher.dispatch(request).await;
            if let Some(bar) = spinner {
                bar.finish_and_clear();
            }

            match result {
                Ok(packaged) => {
                    let path = output
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(&packaged.filename));
                    write_atomic(&path, &packaged.body).await?;
                    report(&packaged, &path, *json, cli.quiet)?;
                    Ok(())
                }
                Err(e) => fail(&e),
            }
        }
    }
}

/// Map CLI args to `DispatchConfig` and build the dispatcher.
fn build_dispatcher(cli: &Cli, registry: Arc<Registry>, with_llm: bool) -> Result<Dispatcher> {
    let mut builder = DispatchConfig::builder()
        .max_upload_bytes(cli.max_upload_mb * 1024 * 1024)
        .default_timeout_secs(cli.timeout)
        .llm_concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .qpdf_binary(&cli.qpdf);
    if let Some(dir) = &cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(lib) = &cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    let config = builder.build().context("Invalid configuration")?;

    let engines = if with_llm {
        Engines::detect(&config)
    } else {
        Engines::offline(&config)
    };
    Dispatcher::new(registry, config, engines).context("Failed to start dispatcher")
}

fn spinner(operation: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(operation.to_string());
    bar.set_message("working…");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Atomic write: write to a sibling temp file, then rename.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move result to {}", path.display()))?;
    Ok(())
}

fn report(packaged: &PackagedResult, path: &Path, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(packaged).context("Failed to serialise result")?
        );
        return Ok(());
    }
    if quiet {
        return Ok(());
    }
    let mark = if packaged.is_placeholder() {
        red("⚠ placeholder")
    } else {
        green("✔")
    };
    eprintln!(
        "{}  {}  {}  →  {}",
        mark,
        packaged.content_type,
        dim(&format!("{} bytes", packaged.body.len())),
        bold(&path.display().to_string()),
    );
    for (key, value) in &packaged.metadata {
        eprintln!("   {} {}", dim(&format!("{key}:")), value);
    }
    Ok(())
}

fn print_operations(registry: &Registry, json: bool) -> Result<()> {
    let operations = registry.describe();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&operations).context("Failed to serialise operations")?
        );
        return Ok(());
    }
    for op in operations {
        let aliases = if op.aliases.is_empty() {
            String::new()
        } else {
            format!(" (alias: {})", op.aliases.join(", "))
        };
        println!("{}{}  {}", bold(op.name), aliases, dim(op.summary));
        for field in &op.options {
            let value = serde_json::to_value(field).context("Failed to serialise option")?;
            println!("    {}", dim(&value.to_string()));
        }
    }
    Ok(())
}

/// Print `errorKind: message` and exit non-zero (2 for client errors).
fn fail(e: &DispatchError) -> ! {
    let kind = e.kind();
    eprintln!("{}: {}", red(&kind.to_string()), e);
    std::process::exit(if kind.is_client_error() { 2 } else { 1 })
}
