//! PDF rasterisation and text layer access through pdfium.
//!
//! pdfium is a native library bound at runtime. Binding order: the
//! configured path, then `PDFIUM_LIB_PATH`, then the system library. A
//! missing library is a [`RoutineError::DependencyUnavailable`], which lets
//! best-effort operations fall back instead of failing.
//!
//! All functions here are blocking; call them through
//! [`crate::codec::blocking`].
//!
//! Page sizes vary wildly (an A0 poster at 300 DPI is ~14 000 px wide), so
//! renders are capped at `max_edge` pixels on the longest side regardless
//! of the requested DPI.

use crate::error::RoutineError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEPENDENCY: &str = "pdfium";

/// Bind the pdfium library.
pub fn bind(library: Option<&Path>) -> Result<Pdfium, RoutineError> {
    let explicit: Option<PathBuf> = library
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) => {
            let file = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", file.display());
            Pdfium::bind_to_library(&file)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RoutineError::unavailable(DEPENDENCY, format!("library not loadable ({e:?})")))?;

    Ok(Pdfium::new(bindings))
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, RoutineError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.contains("Password") || detail.contains("password") {
            RoutineError::UnsupportedInput("document is password protected".into())
        } else {
            RoutineError::processing(format!("pdfium could not open the document ({detail})"))
        }
    })
}

/// Render up to `limit` pages (all when `None`) at `dpi`.
pub fn render_pages(
    library: Option<&Path>,
    pdf_path: &Path,
    dpi: u32,
    max_edge: u32,
    limit: Option<usize>,
) -> Result<Vec<DynamicImage>, RoutineError> {
    let pdfium = bind(library)?;
    let document = open(&pdfium, pdf_path)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    let wanted = limit.map_or(total, |l| l.min(total));
    info!("Rendering {} of {} pages at {} DPI", wanted, total, dpi);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_edge as i32)
        .set_maximum_height(max_edge as i32);

    let mut images = Vec::with_capacity(wanted);
    for (idx, page) in pages.iter().take(wanted).enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            RoutineError::processing(format!("rasterisation of page {} failed ({e:?})", idx + 1))
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    if images.is_empty() {
        return Err(RoutineError::processing("document has no pages"));
    }
    Ok(images)
}

/// Text layer of every page, in page order.
pub fn page_texts(library: Option<&Path>, pdf_path: &Path) -> Result<Vec<String>, RoutineError> {
    let pdfium = bind(library)?;
    let document = open(&pdfium, pdf_path)?;
    document
        .pages()
        .iter()
        .enumerate()
        .map(|(idx, page)| {
            page.text().map(|t| t.all()).map_err(|e| {
                RoutineError::processing(format!("text of page {} unreadable ({e:?})", idx + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_dependency_failure() {
        let err = bind(Some(Path::new("/nonexistent/libpdfium.so"))).unwrap_err();
        assert!(err.allows_fallback());
        assert!(matches!(
            err,
            RoutineError::DependencyUnavailable { dependency: "pdfium", .. }
        ));
    }
}
