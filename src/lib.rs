//! # edgequake-pdfops
//!
//! Document operations (compress, convert, OCR, summarize, translate,
//! secure) behind one request/response contract.
//!
//! ## Why one dispatcher?
//!
//! Every operation follows the same lifecycle: check the upload, resolve
//! its options, stage it on disk, run a transformation, package the result
//! and delete every temporary file. Writing that lifecycle once, in
//! [`Dispatcher`], means cleanup cannot be forgotten on one operation's
//! error path, and adding an operation is one more registry entry.
//!
//! ## Lifecycle
//!
//! ```text
//! DocumentRequest
//!  │
//!  ├─ 1. Lookup     operation name or alias → OperationSpec
//!  ├─ 2. Validate   extension, MIME type, leading-byte signature, size
//!  ├─ 3. Options    raw strings → typed NormalizedOptions (defaults, rules)
//!  ├─ 4. Stage      input written under a private per-request scope
//!  ├─ 5. Invoke     routine, bounded by a timeout; best-effort fallback
//!  ├─ 6. Package    content type, display name, metadata
//!  └─ 7. Close      every artifact of the scope deleted, on every path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfops::{DispatchConfig, Dispatcher, DocumentRequest, Engines, Registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::default();
//!     let engines = Engines::detect(&config);
//!     let dispatcher = Dispatcher::new(Arc::new(Registry::builtin()?), config, engines)?;
//!
//!     let bytes = std::fs::read("report.pdf")?;
//!     let request = DocumentRequest::new("compress", "report.pdf", bytes)
//!         .option("mode", "balanced");
//!     let result = dispatcher.dispatch(request).await?;
//!     std::fs::write(&result.filename, &result.body)?;
//!     println!("{:?}", result.metadata);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfops` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## External engines
//!
//! | Engine | Used by | When missing |
//! |--------|---------|--------------|
//! | lopdf (built in) | compress, secure (watermark), text extraction | always available |
//! | pdfium | convert (images), extractText | fallback / `DependencyUnavailable` |
//! | language model (edgequake-llm) | extractText, summarize, translate | fallback result |
//! | `qpdf` | secure (password) | `DependencyUnavailable` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod options;
pub mod package;
pub mod prompts;
pub mod registry;
pub mod routines;
pub mod source;
pub mod store;
pub mod text;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DispatchConfig, DispatchConfigBuilder, LlmSettings};
pub use dispatch::{Dispatcher, DocumentRequest, Health, Lifecycle};
pub use error::{
    ConfigError, DispatchError, ErrorKind, ErrorResponse, OptionError, RegistryError,
    RoutineError, SetupError, SourceError, StorageError,
};
pub use media::MediaKind;
pub use options::{NormalizedOptions, OptionField, OptionValue, RawOptions};
pub use package::PackagedResult;
pub use registry::{OperationDescription, OperationSpec, Registry, RegistryBuilder};
pub use routines::{Engines, Routine, RoutineContext};
pub use source::{load_document, LoadedDocument};
pub use store::{Artifact, ArtifactId, ArtifactStore, CleanupReport, RequestScope};
pub use validate::ValidationError;
