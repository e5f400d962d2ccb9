//! Input validation: gate a document before anything touches the disk.
//!
//! A document is accepted only when its file name extension names the
//! expected kind, its declared MIME type (if any) is compatible with that
//! kind, and its leading bytes carry the kind's signature. Every check runs
//! on the in-memory bytes so a rejected upload is never staged.

use crate::media::MediaKind;
use std::path::Path;
use thiserror::Error;

/// Why a document was rejected. Messages use the display name only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Empty document")]
    Empty,

    #[error("Document is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("File name has no extension; expected .{expected}")]
    MissingExtension { expected: &'static str },

    #[error("Unsupported file type '.{found}'; expected .{expected}")]
    ExtensionMismatch {
        found: String,
        expected: &'static str,
    },

    #[error("Declared content type '{declared}' does not match {expected}")]
    MimeMismatch { declared: String, expected: MediaKind },

    #[error("Content is not a valid {expected} document")]
    SignatureMismatch { expected: MediaKind },
}

/// Check `bytes` against the `expected` kind.
///
/// `file_name` is caller-supplied and only inspected for its extension.
pub fn validate(
    file_name: &str,
    declared_mime: Option<&str>,
    bytes: &[u8],
    expected: MediaKind,
    max_bytes: u64,
) -> Result<(), ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or(ValidationError::MissingExtension {
            expected: expected.extension(),
        })?;
    if MediaKind::from_extension(ext) != Some(expected) {
        return Err(ValidationError::ExtensionMismatch {
            found: ext.to_string(),
            expected: expected.extension(),
        });
    }

    if let Some(mime) = declared_mime.filter(|m| !m.trim().is_empty()) {
        if !expected.accepts_mime(mime) {
            return Err(ValidationError::MimeMismatch {
                declared: mime.to_string(),
                expected,
            });
        }
    }

    if let Some(magic) = expected.signature() {
        if !bytes.starts_with(magic) {
            return Err(ValidationError::SignatureMismatch { expected });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1024;

    fn pdf(name: &str, bytes: &[u8]) -> Result<(), ValidationError> {
        validate(name, None, bytes, MediaKind::Pdf, LIMIT)
    }

    #[test]
    fn accepts_well_formed_pdf() {
        assert_eq!(pdf("report.pdf", b"%PDF-1.7\n..."), Ok(()));
        assert_eq!(pdf("REPORT.PDF", b"%PDF-1.4"), Ok(()));
    }

    #[test]
    fn rejects_pdf_extension_without_header() {
        assert_eq!(
            pdf("fake.pdf", b"<html>not a pdf</html>"),
            Err(ValidationError::SignatureMismatch {
                expected: MediaKind::Pdf
            })
        );
    }

    #[test]
    fn rejects_wrong_or_missing_extension() {
        assert!(matches!(
            pdf("doc.docx", b"%PDF-1.4"),
            Err(ValidationError::ExtensionMismatch { .. })
        ));
        assert!(matches!(
            pdf("noext", b"%PDF-1.4"),
            Err(ValidationError::MissingExtension { .. })
        ));
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(pdf("a.pdf", b""), Err(ValidationError::Empty));
        let big = vec![b'%'; LIMIT as usize + 1];
        assert!(matches!(
            pdf("a.pdf", &big),
            Err(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn mime_is_cross_checked_when_declared() {
        let ok = validate(
            "a.pdf",
            Some("application/pdf"),
            b"%PDF-1.4",
            MediaKind::Pdf,
            LIMIT,
        );
        assert_eq!(ok, Ok(()));
        let bad = validate("a.pdf", Some("image/png"), b"%PDF-1.4", MediaKind::Pdf, LIMIT);
        assert!(matches!(bad, Err(ValidationError::MimeMismatch { .. })));
        let blank = validate("a.pdf", Some("  "), b"%PDF-1.4", MediaKind::Pdf, LIMIT);
        assert_eq!(blank, Ok(()));
    }

    #[test]
    fn path_traversal_names_only_contribute_their_extension() {
        assert_eq!(pdf("../../etc/passwd.pdf", b"%PDF-1.4"), Ok(()));
        let msg = pdf("../../secret/x.exe", b"%PDF").unwrap_err().to_string();
        assert!(!msg.contains("secret"), "got: {msg}");
    }
}
