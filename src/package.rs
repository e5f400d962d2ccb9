//! Result packaging: turn a live result artifact into the caller-facing
//! response.
//!
//! The body is read while the artifact is still owned by its scope, so a
//! packaged result never points at a file that cleanup is about to remove.

use crate::error::StorageError;
use crate::media::MediaKind;
use crate::registry::OperationSpec;
use crate::store::Artifact;
use serde::Serialize;
use std::collections::BTreeMap;

/// Base name used when the caller supplied none.
const FALLBACK_STEM: &str = "document";

/// A successful operation response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagedResult {
    #[serde(skip)]
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
    pub output_kind: MediaKind,
    pub metadata: BTreeMap<String, String>,
}

impl PackagedResult {
    /// Whether a best-effort fallback produced this result.
    pub fn is_placeholder(&self) -> bool {
        self.metadata.get("isPlaceholder").map(String::as_str) == Some("true")
    }

    /// Transport headers for HTTP-like callers.
    ///
    /// Metadata keys become `X-Pdfops-<Key>` headers, e.g. `originalSize`
    /// becomes `X-Pdfops-Original-Size`.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), self.content_type.to_string()),
            (
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{}\"", self.filename),
            ),
            (
                "Cache-Control".to_string(),
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            ("Pragma".to_string(), "no-cache".to_string()),
            ("Expires".to_string(), "0".to_string()),
        ];
        headers.extend(
            self.metadata
                .iter()
                .map(|(k, v)| (format!("X-Pdfops-{}", header_case(k)), v.clone())),
        );
        headers
    }
}

/// `originalSize` → `Original-Size`.
fn header_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (idx, ch) in key.chars().enumerate() {
        if idx == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Reduce an untrusted caller-supplied name to a safe file stem.
///
/// Only the last path segment survives; quotes and control characters are
/// dropped and the extension is removed.
pub fn display_stem(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | ':' | '*' | '?' | '<' | '>' | '|'))
        .collect();
    let stem = match cleaned.rfind('.') {
        Some(0) | None => cleaned.as_str(),
        Some(dot) => &cleaned[..dot],
    };
    let stem = stem.trim().trim_matches('.');
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// Build the response for `artifact`.
///
/// `original_size` feeds the size metadata of operations that report it.
pub fn package(
    artifact: &Artifact,
    spec: &OperationSpec,
    display_name: &str,
    original_size: u64,
    is_placeholder: bool,
) -> Result<PackagedResult, StorageError> {
    let body = std::fs::read(artifact.path()).map_err(|e| StorageError::io("read result", e))?;
    let kind = artifact.kind();

    let mut metadata = BTreeMap::new();
    metadata.insert("isPlaceholder".to_string(), is_placeholder.to_string());
    if spec.report_sizes {
        let result_size = body.len() as u64;
        metadata.insert("originalSize".to_string(), original_size.to_string());
        metadata.insert("resultSize".to_string(), result_size.to_string());
        let saved = if original_size == 0 {
            0.0
        } else {
            (1.0 - result_size as f64 / original_size as f64) * 100.0
        };
        metadata.insert("compressionRatio".to_string(), format!("{saved:.1}%"));
    }

    Ok(PackagedResult {
        body,
        content_type: kind.content_type(),
        filename: format!(
            "{}{}.{}",
            spec.display_prefix,
            display_stem(display_name),
            kind.extension()
        ),
        output_kind: kind,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::compress;
    use crate::store::ArtifactStore;

    #[test]
    fn stem_strips_paths_and_extension() {
        assert_eq!(display_stem("report.pdf"), "report");
        assert_eq!(display_stem("../../etc/passwd"), "passwd");
        assert_eq!(display_stem("C:\\Users\\me\\scan.final.PDF"), "scan.final");
        assert_eq!(display_stem("a\"b\n.pdf"), "ab");
        assert_eq!(display_stem(""), "document");
        assert_eq!(display_stem("/"), "document");
        assert_eq!(display_stem(".pdf"), "pdf");
    }

    #[test]
    fn header_names() {
        assert_eq!(header_case("originalSize"), "Original-Size");
        assert_eq!(header_case("isPlaceholder"), "Is-Placeholder");
    }

    #[test]
    fn compress_reports_sizes() {
        let store = ArtifactStore::open(None).unwrap();
        let scope = store.open_scope().unwrap();
        let out = scope.stage(&[b'x'; 60], MediaKind::Pdf).unwrap();

        let result = package(&out, &compress::operation(), "dir/in.pdf", 100, false).unwrap();
        assert_eq!(result.filename, "compressed_in.pdf");
        assert_eq!(result.content_type, "application/pdf");
        assert_eq!(result.metadata["originalSize"], "100");
        assert_eq!(result.metadata["resultSize"], "60");
        assert_eq!(result.metadata["compressionRatio"], "40.0%");
        assert!(!result.is_placeholder());

        let headers = result.response_headers();
        assert!(headers.contains(&(
            "Content-Disposition".to_string(),
            "attachment; filename=\"compressed_in.pdf\"".to_string()
        )));
        assert!(headers.iter().any(|(k, v)| k == "X-Pdfops-Result-Size" && v == "60"));
        scope.close();
    }

    #[test]
    fn body_is_not_serialised() {
        let store = ArtifactStore::open(None).unwrap();
        let scope = store.open_scope().unwrap();
        let out = scope.stage(b"hello", MediaKind::Txt).unwrap();
        let spec = crate::routines::summarize::operation();

        let result = package(&out, &spec, "notes.pdf", 10, true).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["filename"], "summary_notes.txt");
        assert_eq!(json["outputKind"], "txt");
        assert_eq!(json["metadata"]["isPlaceholder"], "true");
        assert!(json.get("body").is_none());
        assert!(json["metadata"].get("originalSize").is_none());
        scope.close();
    }
}
