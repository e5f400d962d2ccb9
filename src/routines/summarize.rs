//! `summarize`: a model-written summary of the document text.

use super::{document_text, Routine, RoutineContext};
use crate::codec;
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::OptionField;
use crate::prompts;
use crate::registry::OperationSpec;
use crate::store::Artifact;
use crate::text::{clean_text, sentences, truncate_chars, word_count};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const LENGTHS: &[&str] = &["short", "medium", "long"];

/// Characters of document text sent to the model.
const MAX_INPUT_CHARS: usize = 10_000;

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "summarize",
        aliases: &[],
        summary: "Summarise the document text",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("length", LENGTHS).default_value("medium"),
            OptionField::choice("language", super::translate::LANGUAGES).default_value("en"),
        ],
        rules: vec![],
        output_kind: |_| MediaKind::Txt,
        output_kinds: &[MediaKind::Txt],
        display_prefix: "summary_",
        best_effort: true,
        report_sizes: false,
        routine: Arc::new(Summarize),
    }
}

/// `(target words, extractive sentence count)` for a length.
fn targets(length: &str) -> (usize, usize) {
    match length {
        "short" => (150, 3),
        "long" => (600, 10),
        _ => (300, 5),
    }
}

fn extractive(text: &str, count: usize) -> String {
    let picked: Vec<&str> = sentences(text).into_iter().take(count).collect();
    let mut out = picked.join(" ").replace('\n', " ");
    out.push('\n');
    out
}

pub struct Summarize;

#[async_trait]
impl Routine for Summarize {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let provider = Arc::clone(ctx.engines.llm()?);
        let (words, _) = targets(ctx.choice("length")?);
        let language = ctx.choice("language")?;

        let text = document_text(ctx).await?;
        let input = truncate_chars(&text, MAX_INPUT_CHARS);
        info!(
            "Summarising {} words into ~{} ({})",
            word_count(input),
            words,
            language
        );

        let messages =
            codec::llm::text_messages(&prompts::summary_prompt(words, language), input);
        let summary = codec::llm::chat(&provider, &messages, &ctx.engines.llm_settings, "summary")
            .await?;
        let summary = clean_text(&summary);
        if summary.is_empty() {
            return Err(RoutineError::processing("model returned an empty summary"));
        }
        ctx.emit(summary.as_bytes())
    }

    /// The document's leading sentences.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        warn!("Summarisation failed ({}); using leading sentences", cause);
        let (_, count) = targets(ctx.choice("length")?);
        let body = match document_text(ctx).await {
            Ok(text) => extractive(&text, count),
            Err(_) => "No text could be extracted from this document.\n".to_string(),
        };
        ctx.emit(body.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing::{options, Harness};

    #[test]
    fn extractive_takes_leading_sentences() {
        let text = "One. Two. Three. Four.";
        assert_eq!(extractive(text, 3), "One. Two. Three.\n");
        assert_eq!(targets("long"), (600, 10));
    }

    #[tokio::test]
    async fn offline_summary_is_extractive() {
        let body = "The plant opened in May. Output doubled by June. Staff grew to 40. \
                    A second line is planned. Costs stayed flat. Demand is strong.";
        let input = codec::pdf::write_text_pdf(None, body).unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(&spec, &[("length", "short")]);
        let ctx = harness.context(&spec, &opts);

        let err = Summarize.run(&ctx).await.unwrap_err();
        assert!(matches!(err, RoutineError::DependencyUnavailable { .. }));
        let out = Summarize.fallback(&ctx, &err).await.unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert!(text.starts_with("The plant opened in May."), "got: {text}");
        assert!(!text.contains("Costs stayed flat"));
    }
}
