//! Document sources: read a user-supplied path or URL into memory.
//!
//! The returned file name is for display only. Nothing derived from it ever
//! becomes an on-disk path; staging gives every artifact its own random
//! name.

use crate::error::SourceError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A document read from its source, not yet validated.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` (a local path or an HTTP/HTTPS URL).
///
/// Downloads are bounded by `timeout_secs` and stop as soon as they exceed
/// `max_bytes`.
pub async fn load_document(
    input: &str,
    timeout_secs: u64,
    max_bytes: u64,
) -> Result<LoadedDocument, SourceError> {
    if is_url(input) {
        download(input, timeout_secs, max_bytes).await
    } else {
        read_local(input).await
    }
}

async fn read_local(input: &str) -> Result<LoadedDocument, SourceError> {
    let path = Path::new(input);
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => SourceError::PermissionDenied {
            input: input.to_string(),
        },
        _ => SourceError::NotFound {
            input: input.to_string(),
        },
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(LoadedDocument { file_name, bytes })
}

async fn download(url: &str, timeout_secs: u64, max_bytes: u64) -> Result<LoadedDocument, SourceError> {
    info!("Downloading document from: {}", url);
    let failed = |reason: String| SourceError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            SourceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    let too_large = || SourceError::TooLarge {
        url: url.to_string(),
        limit: max_bytes,
    };
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(too_large());
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    let file_name = file_name_from_url(url);
    info!("Downloaded {} bytes as '{}'", bytes.len(), file_name);
    Ok(LoadedDocument { file_name, bytes })
}

/// Last non-empty path segment of `url`, or `downloaded.pdf`.
fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_file_names() {
        assert_eq!(file_name_from_url("https://x.org/a/report.pdf?v=2"), "report.pdf");
        assert_eq!(file_name_from_url("https://x.org/a/"), "downloaded.pdf");
        assert_eq!(file_name_from_url("https://x.org"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_file_is_read_with_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let doc = load_document(path.to_str().unwrap(), 5, 1024).await.unwrap();
        assert_eq!(doc.file_name, "scan.pdf");
        assert_eq!(doc.bytes, b"%PDF-1.4");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = tokio_test::block_on(load_document("/nonexistent/file.pdf", 5, 1024)).unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }
}
