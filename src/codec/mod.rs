//! Narrow capability interface to the external codecs and engines.
//!
//! | Module    | Engine                  | Used by                         |
//! |-----------|-------------------------|---------------------------------|
//! | `pdf`     | lopdf (pure Rust)       | compress, secure, text PDFs     |
//! | `pdfium`  | pdfium shared library   | convert (images), OCR, text     |
//! | `image`   | image crate             | PNG/JPEG encoding, VLM payloads |
//! | `ooxml`   | zip                     | docx / xlsx writing             |
//! | `llm`     | edgequake-llm providers | OCR, summarize, translate       |
//! | `qpdf`    | `qpdf` executable       | password encryption             |
//!
//! Every CPU-bound codec call runs on the blocking pool through
//! [`blocking`] and works on owned data: it reads its input from a path and
//! returns bytes, which the caller then stages into its request scope. A
//! blocking task that outlives a cancelled request therefore never writes
//! into a scope directory that is being torn down.

pub mod image;
pub mod llm;
pub mod ooxml;
pub mod pdf;
pub mod pdfium;
pub mod qpdf;

use crate::error::RoutineError;

/// Run `f` on tokio's blocking pool.
///
/// pdfium and the image codecs are CPU-bound and must not stall the async
/// worker threads.
pub(crate) async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, RoutineError>
where
    F: FnOnce() -> Result<T, RoutineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RoutineError::processing(format!("{what} task panicked: {e}")))?
}
