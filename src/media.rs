//! Media kinds understood by the dispatcher.
//!
//! A [`MediaKind`] is the declared kind of an artifact at rest. It fixes the
//! file extension used for on-disk names, the content type reported to the
//! caller and, where one exists, the leading-byte signature used by the
//! input validator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a staged input or produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Docx,
    Xlsx,
    Png,
    Jpeg,
    Txt,
}

impl MediaKind {
    /// Every kind, in content-type table order.
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Pdf,
        MediaKind::Docx,
        MediaKind::Xlsx,
        MediaKind::Png,
        MediaKind::Jpeg,
        MediaKind::Txt,
    ];

    /// Canonical file extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Pdf => "pdf",
            MediaKind::Docx => "docx",
            MediaKind::Xlsx => "xlsx",
            MediaKind::Png => "png",
            MediaKind::Jpeg => "jpg",
            MediaKind::Txt => "txt",
        }
    }

    /// Fixed content-type table.
    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Pdf => "application/pdf",
            MediaKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            MediaKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            MediaKind::Png => "image/png",
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Txt => "text/plain",
        }
    }

    /// Leading bytes every well-formed document of this kind starts with.
    ///
    /// Plain text has no signature.
    pub fn signature(self) -> Option<&'static [u8]> {
        match self {
            MediaKind::Pdf => Some(b"%PDF"),
            MediaKind::Docx | MediaKind::Xlsx => Some(b"PK\x03\x04"),
            MediaKind::Png => Some(b"\x89PNG\r\n\x1a\n"),
            MediaKind::Jpeg => Some(&[0xFF, 0xD8, 0xFF]),
            MediaKind::Txt => None,
        }
    }

    /// Resolve a kind from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<MediaKind> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaKind::Pdf),
            "docx" => Some(MediaKind::Docx),
            "xlsx" => Some(MediaKind::Xlsx),
            "png" => Some(MediaKind::Png),
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "txt" => Some(MediaKind::Txt),
            _ => None,
        }
    }

    /// Whether a caller-declared MIME type is compatible with this kind.
    ///
    /// `application/octet-stream` is what many upload clients send when they
    /// do not know better, so it is accepted for every kind.
    pub fn accepts_mime(self, mime: &str) -> bool {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/octet-stream" || essence == self.content_type()
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Pdf => "pdf",
            MediaKind::Docx => "docx",
            MediaKind::Xlsx => "xlsx",
            MediaKind::Png => "png",
            MediaKind::Jpeg => "jpeg",
            MediaKind::Txt => "txt",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_table() {
        assert_eq!(MediaKind::Pdf.content_type(), "application/pdf");
        assert_eq!(
            MediaKind::Xlsx.content_type(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(MediaKind::Txt.content_type(), "text/plain");
        assert_eq!(MediaKind::Png.content_type(), "image/png");
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(MediaKind::from_extension("PDF"), Some(MediaKind::Pdf));
        assert_eq!(MediaKind::from_extension("JpEg"), Some(MediaKind::Jpeg));
        assert_eq!(MediaKind::from_extension("exe"), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_extension() {
        for kind in MediaKind::ALL {
            assert_eq!(MediaKind::from_extension(kind.extension()), Some(kind));
        }
    }

    #[test]
    fn mime_cross_check() {
        assert!(MediaKind::Pdf.accepts_mime("application/pdf"));
        assert!(MediaKind::Pdf.accepts_mime("Application/PDF; charset=binary"));
        assert!(MediaKind::Pdf.accepts_mime("application/octet-stream"));
        assert!(!MediaKind::Pdf.accepts_mime("image/png"));
    }

    #[test]
    fn serialises_lowercase() {
        let json = serde_json::to_string(&MediaKind::Docx).unwrap();
        assert_eq!(json, "\"docx\"");
    }
}
