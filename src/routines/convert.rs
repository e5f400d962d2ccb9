//! `convert`: PDF to Word, Excel or an image of the first page.

use super::{page_texts, Routine, RoutineContext};
use crate::codec::{self, ooxml::Block, ooxml::Cell};
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::{NormalizedOptions, OptionField};
use crate::registry::OperationSpec;
use crate::store::Artifact;
use crate::text::clean_text;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const FORMATS: &[&str] = &["docx", "xlsx", "img", "png", "jpg", "jpeg"];

/// Longest rendered edge, whatever the DPI.
const MAX_RENDER_EDGE: u32 = 10_000;
const PLACEHOLDER_SIZE: (u32, u32) = (800, 600);

fn output_kind(options: &NormalizedOptions) -> MediaKind {
    match options.choice("format") {
        Some("docx") => MediaKind::Docx,
        Some("xlsx") => MediaKind::Xlsx,
        Some("jpg" | "jpeg") => MediaKind::Jpeg,
        _ => MediaKind::Png,
    }
}

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "convert",
        aliases: &[],
        summary: "Convert PDF to docx, xlsx or an image",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("format", FORMATS).required(),
            OptionField::integer("dpi", 72, 600).default_value("200"),
            OptionField::integer("quality", 1, 100).default_value("95"),
        ],
        rules: vec![],
        output_kind,
        output_kinds: &[MediaKind::Docx, MediaKind::Xlsx, MediaKind::Png, MediaKind::Jpeg],
        display_prefix: "converted_",
        best_effort: true,
        report_sizes: false,
        routine: Arc::new(Convert),
    }
}

fn docx_blocks(pages: &[String]) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(pages.len() * 2);
    for (idx, text) in pages.iter().enumerate() {
        blocks.push(Block::Heading(format!("Page {}", idx + 1)));
        let text = clean_text(text);
        blocks.extend(
            text.split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Block::Paragraph(p.to_string())),
        );
    }
    blocks
}

fn xlsx_rows(pages: &[String]) -> Vec<Vec<Cell>> {
    let mut rows = vec![vec![
        Cell::Text("Page".into()),
        Cell::Text("Line".into()),
        Cell::Text("Text".into()),
    ]];
    for (page, text) in pages.iter().enumerate() {
        let lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        for (line, content) in lines.enumerate() {
            rows.push(vec![
                Cell::Number(page as i64 + 1),
                Cell::Number(line as i64 + 1),
                Cell::Text(content.to_string()),
            ]);
        }
    }
    rows
}

pub struct Convert;

#[async_trait]
impl Routine for Convert {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let bytes = match ctx.output_kind {
            MediaKind::Docx | MediaKind::Xlsx => {
                let pages = page_texts(ctx).await?;
                if pages.iter().all(|p| p.trim().is_empty()) {
                    return Err(RoutineError::processing("document has no extractable text"));
                }
                info!("Converting {} pages to {}", pages.len(), ctx.output_kind);
                let kind = ctx.output_kind;
                codec::blocking("office encoding", move || match kind {
                    MediaKind::Docx => codec::ooxml::write_docx(&docx_blocks(&pages)),
                    _ => codec::ooxml::write_xlsx("Extracted text", &xlsx_rows(&pages)),
                })
                .await?
            }
            kind => {
                let dpi = ctx.integer("dpi")? as u32;
                let quality = ctx.integer("quality")? as u8;
                let library = ctx.engines.pdfium_library.clone();
                let path = ctx.input.path().to_path_buf();
                codec::blocking("rasterisation", move || {
                    let pages = codec::pdfium::render_pages(
                        library.as_deref(),
                        &path,
                        dpi,
                        MAX_RENDER_EDGE,
                        Some(1),
                    )?;
                    let first = &pages[0];
                    match kind {
                        MediaKind::Jpeg => codec::image::encode_jpeg(first, quality),
                        _ => codec::image::encode_png(first),
                    }
                })
                .await?
            }
        };
        ctx.emit(&bytes)
    }

    /// A document stating nothing could be extracted, or a blank page.
    async fn fallback(
        &self,
        ctx: &RoutineContext<'_>,
        cause: &RoutineError,
    ) -> Result<Artifact, RoutineError> {
        warn!("Conversion failed ({}); producing placeholder", cause);
        let kind = ctx.output_kind;
        let bytes = codec::blocking("placeholder", move || match kind {
            MediaKind::Docx => codec::ooxml::write_docx(&[
                Block::Heading("Conversion unavailable".into()),
                Block::Paragraph("The content of this document could not be extracted.".into()),
            ]),
            MediaKind::Xlsx => codec::ooxml::write_xlsx(
                "Extracted text",
                &[vec![Cell::Text(
                    "The content of this document could not be extracted.".into(),
                )]],
            ),
            MediaKind::Jpeg => {
                let (w, h) = PLACEHOLDER_SIZE;
                codec::image::encode_jpeg(&codec::image::blank_page(w, h), 90)
            }
            _ => {
                let (w, h) = PLACEHOLDER_SIZE;
                codec::image::encode_png(&codec::image::blank_page(w, h))
            }
        })
        .await?;
        ctx.emit(&bytes)
    }
}
