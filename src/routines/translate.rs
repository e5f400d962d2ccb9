//! `translate`: translate the document text, as plain text or a new PDF.
//!
//! Text is split at sentence boundaries into chunks below 4 000 characters,
//! translated concurrently and reassembled in order.

use super::{document_text, Routine, RoutineContext};
use crate::codec;
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::{CrossRule, NormalizedOptions, OptionField};
use crate::prompts;
use crate::registry::OperationSpec;
use crate::store::Artifact;
use crate::text::{chunk_text, clean_text};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{info, warn};

pub const LANGUAGES: &[&str] = &[
    "en", "fr", "es", "de", "it", "pt", "ru", "zh", "ja", "ko", "ar", "hi",
];
pub const SOURCE_LANGUAGES: &[&str] = &[
    "auto", "en", "fr", "es", "de", "it", "pt", "ru", "zh", "ja", "ko", "ar", "hi",
];
pub const OUTPUT_FORMATS: &[&str] = &["txt", "pdf"];

const MAX_CHUNK_CHARS: usize = 3_999;

fn output_kind(options: &NormalizedOptions) -> MediaKind {
    match options.choice("outputFormat") {
        Some("pdf") => MediaKind::Pdf,
        _ => MediaKind::Txt,
    }
}

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "translate",
        aliases: &[],
        summary: "Translate the document text",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("targetLanguage", LANGUAGES)
                .aliases(&["target_language"])
                .required(),
            OptionField::choice("sourceLanguage", SOURCE_LANGUAGES)
                .aliases(&["source_language"])
                .default_value("auto"),
            OptionField::choice("outputFormat", OUTPUT_FORMATS)
                .aliases(&["output_format"])
                .default_value("txt"),
        ],
        rules: vec![CrossRule {
            violated: |o| o.choice("sourceLanguage") == o.choice("targetLanguage"),
            message: "sourceLanguage and targetLanguage must differ",
        }],
        output_kind,
        output_kinds: &[MediaKind::Txt, MediaKind::Pdf],
        display_prefix: "translated_",
        best_effort: true,
        report_sizes: false,
        routine: Arc::new(Translate),
    }
}

/// Write `text` as the requested output kind.
async fn emit_text(ctx: &RoutineContext<'_>, text: String) -> Result<Artifact, RoutineError> {
    let bytes = match ctx.output_kind {
        MediaKind::Pdf => {
            codec::blocking("PDF writing", move || codec::pdf::write_text_pdf(None, &text)).await?
        }
        _ => text.into_bytes(),
    };
    ctx.emit(&bytes)
}

pub struct Translate;

#[async_trait]
impl Routine for Translate {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let provider = Arc::clone(ctx.engines.llm()?);
        let target = ctx.choice("targetLanguage")?;
        let source = ctx.choice("sourceLanguage")?;

        let text = document_text(ctx).await?;
        let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
        let total = chunks.len();
        info!("Translating {} chunks {} → {}", total, source, target);

        let prompt = prompts::translate_prompt(Some(source), target);
        let settings = &ctx.engines.llm_settings;
        let translated: Vec<String> = stream::iter(chunks.into_iter().enumerate().map(|(idx, chunk)| {
            let provider = Arc::clone(&provider);
            let messages = codec::llm::text_messages(&prompt, &chunk);
            async move {
                let label = format!("chunk {}/{}", idx + 1, total);
                codec::llm::chat(&provider, &messages, settings, &label).await
            }
        }))
        .buffered(settings.concurrency.max(1))
        .try_collect()
        .await?;

        let body = clean_text(&translated.join("\n\n"));
        if body.is_empty() {
            return Err(RoutineError::processing("model returned an empty translation"));
        }
        emit_text(ctx, body).await
    }

    /// The untranslated text under an explicit notice.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        warn!("Translation failed ({}); returning original text", cause);
        let target = prompts::language_name(ctx.choice("targetLanguage")?);
        let original = document_text(ctx)
            .await
            .unwrap_or_else(|_| "No text could be extracted from this document.\n".to_string());
        let body = format!(
            "[Translation to {target} is unavailable. The original text follows.]\n\n{original}"
        );
        emit_text(ctx, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptionError;
    use crate::routines::testing::{options, Harness};

    #[test]
    fn target_is_required_and_must_differ() {
        let spec = operation();
        let err = spec.normalize(&Default::default()).unwrap_err();
        assert_eq!(err, OptionError::Missing { key: "targetLanguage".into() });

        let raw = [
            ("target_language".to_string(), Some("fr".to_string())),
            ("sourceLanguage".to_string(), Some("FR".to_string())),
        ]
        .into_iter()
        .collect();
        assert!(matches!(spec.normalize(&raw), Err(OptionError::Constraint(_))));
    }

    #[tokio::test]
    async fn offline_pdf_output_carries_notice() {
        let input = codec::pdf::write_text_pdf(None, "Bonjour tout le monde.").unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(&spec, &[("targetLanguage", "de"), ("outputFormat", "pdf")]);
        let ctx = harness.context(&spec, &opts);
        assert_eq!(ctx.output_kind, MediaKind::Pdf);

        let err = Translate.run(&ctx).await.unwrap_err();
        let out = Translate.fallback(&ctx, &err).await.unwrap();
        let bytes = std::fs::read(out.path()).unwrap();
        let pages = codec::pdf::page_texts(&bytes).unwrap();
        assert!(pages[0].contains("Translation to German is unavailable"));
        assert!(pages[0].contains("Bonjour tout le monde."));
    }
}
