//! `extractText`: transcribe every page with a vision language model.
//!
//! Pages are rasterised at 300 DPI (capped at 2048 px, the useful range for
//! vision models), sent concurrently, and reassembled in page order as
//! `=== Page N ===` sections. A page the model fails on is marked in the
//! output; the request fails only when every page fails.
//!
//! The fallback reads the document's embedded text layer instead, which is
//! empty for scanned documents.

use super::{page_texts, Routine, RoutineContext};
use crate::codec;
use crate::codec::ooxml::Block;
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::{NormalizedOptions, OptionField};
use crate::prompts;
use crate::registry::OperationSpec;
use crate::store::Artifact;
use crate::text::clean_text;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

pub const LANGUAGES: &[&str] = &[
    "eng", "fra", "spa", "deu", "ita", "por", "rus", "chi_sim", "chi_tra", "jpn", "kor",
];
pub const OUTPUT_FORMATS: &[&str] = &["txt", "docx"];

const OCR_DPI: u32 = 300;
const VISION_MAX_EDGE: u32 = 2048;
const FAILED_PAGE: &str = "[this page could not be transcribed]";

fn output_kind(options: &NormalizedOptions) -> MediaKind {
    match options.choice("outputFormat") {
        Some("docx") => MediaKind::Docx,
        _ => MediaKind::Txt,
    }
}

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "extractText",
        aliases: &["ocr"],
        summary: "Extract text from scanned pages (OCR)",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("language", LANGUAGES).default_value("eng"),
            OptionField::choice("outputFormat", OUTPUT_FORMATS)
                .aliases(&["output_format"])
                .default_value("txt"),
        ],
        rules: vec![],
        output_kind,
        output_kinds: &[MediaKind::Txt, MediaKind::Docx],
        display_prefix: "ocr_",
        best_effort: true,
        report_sizes: false,
        routine: Arc::new(Ocr),
    }
}

/// Render `pages` (1-based sections) in the requested output kind.
async fn emit_pages(
    ctx: &RoutineContext<'_>,
    pages: Vec<String>,
) -> Result<Artifact, RoutineError> {
    let bytes = match ctx.output_kind {
        MediaKind::Docx => {
            codec::blocking("office encoding", move || {
                let mut blocks = Vec::with_capacity(pages.len() * 2);
                for (idx, text) in pages.iter().enumerate() {
                    blocks.push(Block::Heading(format!("Page {}", idx + 1)));
                    blocks.push(Block::Paragraph(text.trim_end().to_string()));
                }
                codec::ooxml::write_docx(&blocks)
            })
            .await?
        }
        _ => sections(&pages).into_bytes(),
    };
    ctx.emit(&bytes)
}

fn sections(pages: &[String]) -> String {
    let mut out = String::new();
    for (idx, text) in pages.iter().enumerate() {
        out.push_str(&format!("=== Page {} ===\n", idx + 1));
        out.push_str(text.trim_end());
        out.push_str("\n\n");
    }
    out
}

pub struct Ocr;

#[async_trait]
impl Routine for Ocr {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let provider = Arc::clone(ctx.engines.llm()?);
        let language = ctx.choice("language")?;

        let library = ctx.engines.pdfium_library.clone();
        let path = ctx.input.path().to_path_buf();
        let encoded = codec::blocking("rasterisation", move || {
            codec::pdfium::render_pages(library.as_deref(), &path, OCR_DPI, VISION_MAX_EDGE, None)?
                .iter()
                .map(codec::image::encode_for_vision)
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
        let total = encoded.len();
        info!("Transcribing {} pages ({})", total, language);

        let prompt = prompts::ocr_prompt(language);
        let settings = &ctx.engines.llm_settings;
        let results: Vec<Result<String, RoutineError>> =
            stream::iter(encoded.into_iter().enumerate().map(|(idx, image)| {
                let provider = Arc::clone(&provider);
                let messages = codec::llm::vision_messages(&prompt, image);
                async move {
                    let label = format!("page {}/{}", idx + 1, total);
                    codec::llm::chat(&provider, &messages, settings, &label).await
                }
            }))
            .buffered(settings.concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed == total {
            return Err(results
                .into_iter()
                .find_map(Result::err)
                .unwrap_or_else(|| RoutineError::processing("no pages transcribed")));
        }
        if failed > 0 {
            warn!("{} of {} pages could not be transcribed", failed, total);
        }

        let pages = results
            .into_iter()
            .map(|r| match r {
                Ok(text) => clean_text(&text),
                Err(_) => FAILED_PAGE.to_string(),
            })
            .collect();
        emit_pages(ctx, pages).await
    }

    /// The embedded text layer, without OCR.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        warn!("OCR failed ({}); using the embedded text layer", cause);
        let pages = match page_texts(ctx).await {
            Ok(pages) if !pages.is_empty() => pages.iter().map(|p| clean_text(p)).collect(),
            _ => vec![String::from("[text could not be extracted from this document]")],
        };
        emit_pages(ctx, pages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing::{options, Harness};

    #[test]
    fn sections_are_numbered() {
        let out = sections(&["alpha\n".into(), "beta".into()]);
        assert_eq!(out, "=== Page 1 ===\nalpha\n\n=== Page 2 ===\nbeta\n\n");
    }

    #[test]
    fn alias_and_language_set() {
        let spec = operation();
        let opts = options(&spec, &[("output_format", "DOCX"), ("language", "chi_sim")]);
        assert_eq!((spec.output_kind)(&opts), MediaKind::Docx);
        let raw = [("language".to_string(), Some("klingon".to_string()))]
            .into_iter()
            .collect();
        assert!(spec.normalize(&raw).is_err());
    }

    #[tokio::test]
    async fn without_model_falls_back_to_text_layer() {
        let input = codec::pdf::write_text_pdf(None, "Scanned? Not really.").unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(&spec, &[]);
        let ctx = harness.context(&spec, &opts);

        let err = Ocr.run(&ctx).await.unwrap_err();
        assert!(err.allows_fallback());
        let out = Ocr.fallback(&ctx, &err).await.unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert!(text.starts_with("=== Page 1 ==="));
        assert!(text.contains("Not really."));
    }
}
