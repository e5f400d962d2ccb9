//! PDF structure editing through lopdf.
//!
//! lopdf is pure Rust, so compression, watermarking, text extraction and
//! text-PDF generation work on any host without the pdfium library.
//! Functions take and return owned bytes and are blocking.

use crate::codec::image::{encode_jpeg, fit_within};
use crate::error::RoutineError;
use image::{DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

const A4: (f32, f32) = (595.0, 842.0);
const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

fn load(bytes: &[u8]) -> Result<Document, RoutineError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| RoutineError::processing(format!("unreadable PDF structure ({e})")))?;
    if doc.trailer.has(b"Encrypt") {
        return Err(RoutineError::UnsupportedInput(
            "document is encrypted".into(),
        ));
    }
    Ok(doc)
}

fn save(doc: &mut Document) -> Result<Vec<u8>, RoutineError> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| RoutineError::processing(format!("could not write PDF ({e})")))?;
    Ok(buf)
}

fn integer(n: i64) -> Object {
    Object::Integer(n)
}

fn real(n: f32) -> Object {
    Object::Real(n)
}

fn name(n: &str) -> Object {
    Object::Name(n.as_bytes().to_vec())
}

/// Encode `s` for a standard Type 1 font with WinAnsiEncoding. Characters
/// outside Latin-1 become `?`.
fn pdf_text(s: &str) -> Object {
    let bytes = s
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

fn standard_font(base: &str) -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", name("Font"));
    font.set("Subtype", name("Type1"));
    font.set("BaseFont", name(base));
    font.set("Encoding", name("WinAnsiEncoding"));
    font
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Follow one level of indirection.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    resolve(doc, obj).as_dict().ok().cloned()
}

/// Look up a page attribute, walking up the page tree for inherited ones.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| {
            let values: Vec<f32> = resolve(doc, &obj)
                .as_array()
                .ok()?
                .iter()
                .filter_map(|o| number(resolve(doc, o)))
                .collect();
            <[f32; 4]>::try_from(values).ok()
        })
        .unwrap_or(LETTER)
}

// ── Compression ──────────────────────────────────────────────────────────

/// How aggressively [`compress`] rewrites a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionProfile {
    pub jpeg_quality: u8,
    pub recompress_images: bool,
    pub strip_metadata: bool,
    /// Longest edge for re-encoded images; `None` keeps dimensions.
    pub max_image_edge: Option<u32>,
}

/// Rewrite a PDF to be smaller.
///
/// Flate-compresses unfiltered streams, drops unreferenced objects and
/// empty streams and, depending on the profile, re-encodes JPEG images and
/// strips document metadata. The result may still be larger than the
/// input; callers compare sizes.
pub fn compress(bytes: &[u8], profile: &CompressionProfile) -> Result<Vec<u8>, RoutineError> {
    let mut doc = load(bytes)?;

    if profile.strip_metadata {
        doc.trailer.remove(b"Info");
        if let Ok(root) = doc.trailer.get(b"Root").and_then(Object::as_reference) {
            if let Ok(catalog) = doc.get_object_mut(root).and_then(Object::as_dict_mut) {
                catalog.remove(b"Metadata");
            }
        }
    }

    if profile.recompress_images {
        let mut rewritten = 0usize;
        for (id, object) in doc.objects.iter_mut() {
            if let Object::Stream(stream) = object {
                if recompress_jpeg(stream, profile) {
                    debug!("Re-encoded image {} {}", id.0, id.1);
                    rewritten += 1;
                }
            }
        }
        debug!("Re-encoded {} images", rewritten);
    }

    let pruned = doc.prune_objects();
    let emptied = doc.delete_zero_length_streams();
    debug!(
        "Pruned {} unreferenced objects and {} empty streams",
        pruned.len(),
        emptied.len()
    );
    doc.compress();
    save(&mut doc)
}

fn is_name(obj: Result<&Object, lopdf::Error>, expected: &[u8]) -> bool {
    match obj {
        Ok(Object::Name(n)) => n == expected,
        Ok(Object::Array(items)) => {
            items.len() == 1 && matches!(&items[0], Object::Name(n) if n == expected)
        }
        _ => false,
    }
}

/// Re-encode one DCT image stream in place when that makes it smaller.
fn recompress_jpeg(stream: &mut Stream, profile: &CompressionProfile) -> bool {
    let dict = &stream.dict;
    if !is_name(dict.get(b"Subtype"), b"Image") || !is_name(dict.get(b"Filter"), b"DCTDecode") {
        return false;
    }
    let gray = is_name(dict.get(b"ColorSpace"), b"DeviceGray");
    if !gray && !is_name(dict.get(b"ColorSpace"), b"DeviceRGB") {
        return false;
    }

    let decoded = match image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg) {
        Ok(img) => img,
        Err(e) => {
            warn!("Skipping undecodable JPEG image: {}", e);
            return false;
        }
    };
    let decoded = if gray {
        DynamicImage::ImageLuma8(decoded.to_luma8())
    } else {
        decoded
    };
    let resized = match profile.max_image_edge {
        Some(edge) => fit_within(decoded, edge),
        None => decoded,
    };
    let Ok(encoded) = encode_jpeg(&resized, profile.jpeg_quality) else {
        return false;
    };
    if encoded.len() >= stream.content.len() {
        return false;
    }

    stream.dict.set("Width", integer(i64::from(resized.width())));
    stream.dict.set("Height", integer(i64::from(resized.height())));
    stream.dict.set("BitsPerComponent", integer(8));
    stream.dict.remove(b"DecodeParms");
    stream.set_content(encoded);
    true
}

// ── Watermark ────────────────────────────────────────────────────────────

/// Where a watermark is drawn, as fractions of the page size plus rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    Center,
    Corner,
    Diagonal,
    Bottom,
}

impl WatermarkPosition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "center" => Some(Self::Center),
            "corner" => Some(Self::Corner),
            "diagonal" => Some(Self::Diagonal),
            "bottom" => Some(Self::Bottom),
            _ => None,
        }
    }

    /// `(x_factor, y_factor, rotation_degrees)`.
    fn placement(self) -> (f32, f32, f32) {
        match self {
            Self::Center => (0.5, 0.5, 45.0),
            Self::Corner => (0.1, 0.9, 0.0),
            Self::Diagonal => (0.2, 0.8, 45.0),
            Self::Bottom => (0.5, 0.1, 0.0),
        }
    }
}

const WATERMARK_FONT: &str = "PdfopsWmFont";
const WATERMARK_STATE: &str = "PdfopsWmGs";
const WATERMARK_SIZE: f32 = 36.0;

fn watermark_ops(text: &str, media: [f32; 4], position: WatermarkPosition) -> Vec<Operation> {
    let (fx, fy, degrees) = position.placement();
    let x = media[0] + (media[2] - media[0]) * fx;
    let y = media[1] + (media[3] - media[1]) * fy;
    let (sin, cos) = degrees.to_radians().sin_cos();
    // Helvetica-Bold averages roughly 0.6 em per glyph.
    let half_width = text.chars().count() as f32 * WATERMARK_SIZE * 0.6 / 2.0;

    vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("gs", vec![name(WATERMARK_STATE)]),
        Operation::new("rg", vec![real(0.7), real(0.7), real(0.7)]),
        Operation::new(
            "cm",
            vec![real(cos), real(sin), real(-sin), real(cos), real(x), real(y)],
        ),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![name(WATERMARK_FONT), real(WATERMARK_SIZE)]),
        Operation::new("Td", vec![real(-half_width), real(-WATERMARK_SIZE / 3.0)]),
        Operation::new("Tj", vec![pdf_text(text)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Draw `text` on every page, semi-transparent grey Helvetica-Bold.
///
/// The existing page content is wrapped in `q … Q` so its graphics state
/// cannot leak into the overlay.
pub fn watermark(
    bytes: &[u8],
    text: &str,
    position: WatermarkPosition,
) -> Result<Vec<u8>, RoutineError> {
    let mut doc = load(bytes)?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(RoutineError::processing("document has no pages"));
    }

    let font_id = doc.add_object(standard_font("Helvetica-Bold"));
    let mut state = Dictionary::new();
    state.set("Type", name("ExtGState"));
    state.set("ca", real(0.3));
    state.set("CA", real(0.3));
    let state_id = doc.add_object(state);
    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

    for page_id in pages {
        let media = media_box(&doc, page_id);
        let overlay = Content {
            operations: watermark_ops(text, media, position),
        }
        .encode()
        .map_err(|e| RoutineError::processing(format!("could not encode overlay ({e})")))?;
        let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay));

        let mut resources = inherited(&doc, page_id, b"Resources")
            .and_then(|obj| resolve_dict(&doc, &obj))
            .unwrap_or_default();
        for (key, entry, id) in [
            ("Font", WATERMARK_FONT, font_id),
            ("ExtGState", WATERMARK_STATE, state_id),
        ] {
            let mut sub = resources
                .get(key.as_bytes())
                .ok()
                .and_then(|obj| resolve_dict(&doc, obj))
                .unwrap_or_default();
            sub.set(entry, Object::Reference(id));
            resources.set(key, Object::Dictionary(sub));
        }

        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| RoutineError::processing(format!("malformed page ({e})")))?;
        let mut contents = vec![Object::Reference(open_id)];
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
                _ => contents.push(Object::Reference(*id)),
            },
            Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
            _ => {}
        }
        contents.push(Object::Reference(overlay_id));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| RoutineError::processing(format!("malformed page ({e})")))?;
        page.set("Contents", Object::Array(contents));
        page.set("Resources", Object::Dictionary(resources));
    }

    doc.compress();
    save(&mut doc)
}

// ── Text ─────────────────────────────────────────────────────────────────

/// Text of every page via lopdf's content-stream reader.
///
/// Pages whose text cannot be decoded yield an empty string rather than an
/// error; scanned documents simply have no text layer.
pub fn page_texts(bytes: &[u8]) -> Result<Vec<String>, RoutineError> {
    let doc = load(bytes)?;
    let texts = doc
        .get_pages()
        .keys()
        .map(|&number| {
            doc.extract_text(&[number]).unwrap_or_else(|e| {
                debug!("No text on page {}: {}", number, e);
                String::new()
            })
        })
        .collect();
    Ok(texts)
}

const FONT_SIZE: f32 = 11.0;
const LEADING: f32 = 14.0;
const MARGIN: f32 = 56.0;
const WRAP_COLUMNS: usize = 88;

/// Greedy word wrap at `columns` characters; long words are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > columns {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                lines.push(word.drain(..columns).collect());
            }
            let word: String = word.into_iter().collect();
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > columns {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    lines
}

/// Lay out plain text on A4 pages in Helvetica.
///
/// An optional bold title opens the first page. Empty text still yields one
/// page.
pub fn write_text_pdf(title: Option<&str>, text: &str) -> Result<Vec<u8>, RoutineError> {
    let (width, height) = A4;
    let per_page = ((height - 2.0 * MARGIN) / LEADING) as usize;

    let mut lines: Vec<(bool, String)> = Vec::new();
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        lines.extend(wrap(title, WRAP_COLUMNS).into_iter().map(|l| (true, l)));
        lines.push((false, String::new()));
    }
    lines.extend(wrap(text, WRAP_COLUMNS).into_iter().map(|l| (false, l)));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(standard_font("Helvetica"));
    let bold_id = doc.add_object(standard_font("Helvetica-Bold"));
    let mut fonts = Dictionary::new();
    fonts.set("F1", Object::Reference(regular_id));
    fonts.set("F2", Object::Reference(bold_id));
    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));

    let chunks: Vec<&[(bool, String)]> = if lines.is_empty() {
        vec![&[]]
    } else {
        lines.chunks(per_page.max(1)).collect()
    };

    let mut kids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut operations = Vec::new();
        for (row, (bold, line)) in chunk.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let y = height - MARGIN - LEADING * (row as f32 + 1.0);
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![name(if *bold { "F2" } else { "F1" }), real(FONT_SIZE)],
                ),
                Operation::new("Td", vec![real(MARGIN), real(y)]),
                Operation::new("Tj", vec![pdf_text(line)]),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations }
            .encode()
            .map_err(|e| RoutineError::processing(format!("could not encode page ({e})")))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let mut page = Dictionary::new();
        page.set("Type", name("Page"));
        page.set("Parent", Object::Reference(pages_id));
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources.clone()));
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", name("Pages"));
    pages.set("Count", integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    pages.set(
        "MediaBox",
        Object::Array(vec![integer(0), integer(0), real(width), real(height)]),
    );
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", name("Catalog"));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    save(&mut doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        write_text_pdf(Some("Quarterly report"), "Revenue grew.\nCosts fell.").unwrap()
    }

    #[test]
    fn text_pdf_round_trips_through_extraction() {
        let bytes = sample();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let texts = page_texts(&bytes).unwrap();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Revenue grew."), "got: {:?}", texts[0]);
        assert!(texts[0].contains("Quarterly report"));
    }

    #[test]
    fn long_text_spans_several_pages() {
        let body = "line of text\n".repeat(200);
        let bytes = write_text_pdf(None, &body).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.get_pages().len() >= 4);
    }

    #[test]
    fn empty_text_still_has_a_page() {
        let doc = Document::load_mem(&write_text_pdf(None, "").unwrap()).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn wrap_splits_on_words_and_overlong_tokens() {
        let lines = wrap("aaa bbb ccc", 7);
        assert_eq!(lines, vec!["aaa bbb", "ccc"]);
        let lines = wrap("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn watermark_adds_overlay_to_every_page() {
        let body = "x\n".repeat(120);
        let input = write_text_pdf(None, &body).unwrap();
        let output = watermark(&input, "CONFIDENTIAL", WatermarkPosition::Diagonal).unwrap();
        let doc = Document::load_mem(&output).unwrap();
        for page_id in doc.get_pages().into_values() {
            let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
            let contents = page.get(b"Contents").unwrap().as_array().unwrap();
            assert!(contents.len() >= 3);
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(WATERMARK_FONT.as_bytes()));
            assert!(fonts.has(b"F1"), "existing fonts must be kept");
        }
    }

    #[test]
    fn compress_keeps_document_readable() {
        let input = sample();
        let profile = CompressionProfile {
            jpeg_quality: 60,
            recompress_images: true,
            strip_metadata: true,
            max_image_edge: Some(1600),
        };
        let output = compress(&input, &profile).unwrap();
        let texts = page_texts(&output).unwrap();
        assert!(texts[0].contains("Costs fell."));
    }

    #[test]
    fn garbage_is_a_processing_failure() {
        let err = compress(b"%PDF-1.4 garbage", &CompressionProfile {
            jpeg_quality: 75,
            recompress_images: false,
            strip_metadata: false,
            max_image_edge: None,
        })
        .unwrap_err();
        assert!(matches!(err, RoutineError::ProcessingFailure(_)));
    }

    #[test]
    fn positions_parse() {
        assert_eq!(WatermarkPosition::parse("corner"), Some(WatermarkPosition::Corner));
        assert_eq!(WatermarkPosition::parse("top"), None);
    }
}
