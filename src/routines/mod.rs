//! Transformation routines and the contract they satisfy.
//!
//! A routine receives the staged input [`Artifact`] and typed options and
//! returns a fresh result artifact created in the same request scope, or a
//! typed [`RoutineError`]. It never deletes the input and never writes
//! outside its scope. Operations declared best-effort additionally provide
//! a [`Routine::fallback`], whose result the caller sees marked as a
//! placeholder.
//!
//! Each submodule exports `operation()`, the registry entry wiring its
//! routine to a name and an option schema.

pub mod compress;
pub mod convert;
pub mod ocr;
pub mod secure;
pub mod summarize;
pub mod translate;

use crate::codec;
use crate::config::{DispatchConfig, LlmSettings};
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::NormalizedOptions;
use crate::store::{Artifact, RequestScope};
use async_trait::async_trait;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pluggable document transformation.
#[async_trait]
pub trait Routine: Send + Sync {
    /// Produce the genuine result.
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError>;

    /// Produce a degraded result after `run` failed with `cause`.
    ///
    /// Only consulted for best-effort operations, and only for failures
    /// where [`RoutineError::allows_fallback`] holds.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        let _ = ctx;
        Err(RoutineError::processing(format!("no fallback available: {cause}")))
    }
}

/// Everything a routine may use for one invocation.
pub struct RoutineContext<'a> {
    pub operation: &'static str,
    pub input: &'a Artifact,
    pub options: &'a NormalizedOptions,
    /// Kind the operation declared for these options.
    pub output_kind: MediaKind,
    pub scope: &'a RequestScope,
    pub engines: &'a Engines,
}

impl RoutineContext<'_> {
    /// Stage `bytes` as the result of this invocation.
    pub fn emit(&self, bytes: &[u8]) -> Result<Artifact, RoutineError> {
        Ok(self.scope.stage(bytes, self.output_kind)?)
    }

    /// Read the staged input into memory.
    pub async fn input_bytes(&self) -> Result<Vec<u8>, RoutineError> {
        tokio::fs::read(self.input.path()).await.map_err(|e| {
            RoutineError::processing(format!("staged input unreadable ({})", e.kind()))
        })
    }

    /// Option value that the schema guarantees to be present.
    pub fn choice(&self, name: &str) -> Result<&'static str, RoutineError> {
        self.options
            .choice(name)
            .ok_or_else(|| RoutineError::processing(format!("option '{name}' was not resolved")))
    }

    pub fn integer(&self, name: &str) -> Result<i64, RoutineError> {
        self.options
            .integer(name)
            .ok_or_else(|| RoutineError::processing(format!("option '{name}' was not resolved")))
    }
}

/// External engines the routines call into.
#[derive(Clone)]
pub struct Engines {
    pub llm: Option<Arc<dyn LLMProvider>>,
    pub llm_settings: LlmSettings,
    pub pdfium_library: Option<PathBuf>,
    pub qpdf_binary: PathBuf,
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engines")
            .field("llm", &self.llm.as_ref().map(|_| "configured"))
            .field("pdfium_library", &self.pdfium_library)
            .field("qpdf_binary", &self.qpdf_binary)
            .finish()
    }
}

impl Engines {
    /// Engines without a language model.
    pub fn offline(config: &DispatchConfig) -> Self {
        Self {
            llm: None,
            llm_settings: config.llm.clone(),
            pdfium_library: config.pdfium_library.clone(),
            qpdf_binary: config.qpdf_binary.clone(),
        }
    }

    /// Engines with a language model resolved from configuration and the
    /// environment. A missing provider is logged, not fatal: model-backed
    /// operations then fall back.
    pub fn detect(config: &DispatchConfig) -> Self {
        let mut engines = Self::offline(config);
        match codec::llm::resolve_provider(&config.llm) {
            Ok(provider) => engines.llm = Some(provider),
            Err(e) => warn!("Language model unavailable: {}", e),
        }
        engines
    }

    pub fn with_llm(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn llm(&self) -> Result<&Arc<dyn LLMProvider>, RoutineError> {
        self.llm
            .as_ref()
            .ok_or_else(|| RoutineError::unavailable("language model", "no provider configured"))
    }
}

/// Text of every page: lopdf's reader first, pdfium's text layer when
/// lopdf finds nothing.
pub(crate) async fn page_texts(ctx: &RoutineContext<'_>) -> Result<Vec<String>, RoutineError> {
    let bytes = ctx.input_bytes().await?;
    let texts = codec::blocking("text extraction", move || codec::pdf::page_texts(&bytes)).await?;
    if texts.iter().any(|t| !t.trim().is_empty()) {
        return Ok(texts);
    }

    debug!("No text via lopdf; trying pdfium");
    let library = ctx.engines.pdfium_library.clone();
    let path = ctx.input.path().to_path_buf();
    match codec::blocking("text extraction", move || {
        codec::pdfium::page_texts(library.as_deref(), &path)
    })
    .await
    {
        Ok(texts) => Ok(texts),
        Err(RoutineError::DependencyUnavailable { .. }) => Ok(texts),
        Err(e) => Err(e),
    }
}

/// Whole-document text, cleaned. Fails when the document has no text layer.
pub(crate) async fn document_text(ctx: &RoutineContext<'_>) -> Result<String, RoutineError> {
    let pages = page_texts(ctx).await?;
    let text = crate::text::clean_text(&pages.join("\n\n"));
    if text.is_empty() {
        return Err(RoutineError::processing("document has no extractable text"));
    }
    Ok(text)
}
