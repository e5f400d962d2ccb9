//! `compress`: make a PDF smaller.
//!
//! | mode     | JPEG quality | re-encode images | strip metadata | max image edge |
//! |----------|--------------|------------------|----------------|----------------|
//! | whatsapp | 60           | yes              | yes            | 1600 px        |
//! | balanced | 75           | yes              | yes            | none           |
//! | print    | 85           | no               | no             | none           |
//!
//! `quality` scales the JPEG quality by 0.7 / 1.0 / 1.3, clamped to 10–100.
//! When the rewrite is not smaller the original bytes are emitted, so the
//! result never grows.

use super::{Routine, RoutineContext};
use crate::codec::{self, pdf::CompressionProfile};
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::OptionField;
use crate::registry::OperationSpec;
use crate::store::Artifact;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const MODES: &[&str] = &["whatsapp", "print", "balanced"];
pub const QUALITIES: &[&str] = &["low", "medium", "high"];

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "compress",
        aliases: &[],
        summary: "Reduce PDF file size",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("mode", MODES).default_value("whatsapp"),
            OptionField::choice("quality", QUALITIES).default_value("medium"),
        ],
        rules: vec![],
        output_kind: |_| MediaKind::Pdf,
        output_kinds: &[MediaKind::Pdf],
        display_prefix: "compressed_",
        best_effort: true,
        report_sizes: true,
        routine: Arc::new(Compress),
    }
}

/// Profile for a mode/quality pair.
pub fn profile(mode: &str, quality: &str) -> CompressionProfile {
    let (base, recompress_images, strip_metadata, max_image_edge) = match mode {
        "print" => (85u32, false, false, None),
        "balanced" => (75, true, true, None),
        _ => (60, true, true, Some(1600)),
    };
    let percent = match quality {
        "low" => 70,
        "high" => 130,
        _ => 100,
    };
    let scaled = ((base * percent + 50) / 100).clamp(10, 100);
    CompressionProfile {
        jpeg_quality: scaled as u8,
        recompress_images,
        strip_metadata,
        max_image_edge,
    }
}

pub struct Compress;

#[async_trait]
impl Routine for Compress {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let profile = profile(ctx.choice("mode")?, ctx.choice("quality")?);
        let original = ctx.input_bytes().await?;

        let (original, rewritten) = codec::blocking("compression", move || {
            let rewritten = codec::pdf::compress(&original, &profile)?;
            Ok((original, rewritten))
        })
        .await?;

        let best = if rewritten.len() < original.len() {
            info!(
                "Compressed {} → {} bytes ({:.1}% saved)",
                original.len(),
                rewritten.len(),
                100.0 * (1.0 - rewritten.len() as f64 / original.len() as f64)
            );
            &rewritten
        } else {
            info!("Rewrite not smaller; keeping original bytes");
            &original
        };
        ctx.emit(best)
    }

    /// A byte copy of the input.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        warn!("Compression failed ({}); returning the original document", cause);
        let original = ctx.input_bytes().await?;
        ctx.emit(&original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing::{options, Harness};

    #[test]
    fn mode_table() {
        let p = profile("whatsapp", "medium");
        assert_eq!(p.jpeg_quality, 60);
        assert_eq!(p.max_image_edge, Some(1600));
        assert!(p.strip_metadata);

        let p = profile("print", "high");
        assert_eq!(p.jpeg_quality, 100);
        assert!(!p.recompress_images);
        assert!(!p.strip_metadata);

        assert_eq!(profile("balanced", "low").jpeg_quality, 53);
    }

    #[tokio::test]
    async fn result_is_never_larger() {
        let input = codec::pdf::write_text_pdf(None, "Hello compression.").unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(&spec, &[("mode", "print")]);
        let ctx = harness.context(&spec, &opts);

        let out = Compress.run(&ctx).await.unwrap();
        assert!(out.size().unwrap() <= input.len() as u64);
        assert!(harness.scope.owns(&out));
        assert!(harness.input.path().exists(), "input must not be deleted");
    }

    #[tokio::test]
    async fn fallback_copies_input() {
        let harness = Harness::new(b"%PDF-1.4 not really a pdf");
        let spec = operation();
        let opts = options(&spec, &[]);
        let ctx = harness.context(&spec, &opts);

        let err = Compress.run(&ctx).await.unwrap_err();
        assert!(err.allows_fallback());
        let out = Compress.fallback(&ctx, &err).await.unwrap();
        assert_eq!(std::fs::read(out.path()).unwrap(), b"%PDF-1.4 not really a pdf");
    }
}
