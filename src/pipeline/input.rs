//! Upload intake: load a receipt from a path or URL and classify it.
//!
//! The kind is decided by magic bytes, never by the file name alone: phones
//! happily save HEIC data under `.jpg`. The extension only decides whether a
//! mismatch is reported as a corrupt file (it claims to be a receipt type) or
//! as an unsupported one.

use crate::error::ScanError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Supported receipt formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Pdf,
    Png,
    Jpeg,
}

impl UploadKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            UploadKind::Pdf => "application/pdf",
            UploadKind::Png => "image/png",
            UploadKind::Jpeg => "image/jpeg",
        }
    }

    /// Detect the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(UploadKind::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(UploadKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(UploadKind::Jpeg)
        } else {
            None
        }
    }

    fn from_extension(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(UploadKind::Pdf),
            "png" => Some(UploadKind::Png),
            "jpg" | "jpeg" => Some(UploadKind::Jpeg),
            _ => None,
        }
    }
}

/// A receipt file held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name or URL, for messages.
    pub name: String,
    pub kind: UploadKind,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Classify in-memory bytes.
    ///
    /// # Errors
    /// [`ScanError::CorruptUpload`] for an empty file or one whose extension
    /// names a supported type its content does not match;
    /// [`ScanError::UnsupportedUpload`] otherwise.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ScanError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(ScanError::CorruptUpload {
                name,
                detail: "file is empty".into(),
            });
        }

        match UploadKind::sniff(&bytes) {
            Some(kind) => {
                debug!("Upload '{}' detected as {}", name, kind.mime_type());
                Ok(Self { name, kind, bytes })
            }
            None => {
                let magic = bytes.iter().take(4).copied().collect();
                match UploadKind::from_extension(&name) {
                    Some(claimed) => Err(ScanError::CorruptUpload {
                        detail: format!(
                            "content does not look like {} (first bytes: {:02x?})",
                            claimed.mime_type(),
                            magic
                        ),
                        name,
                    }),
                    None => Err(ScanError::UnsupportedUpload { name, magic }),
                }
            }
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a receipt from a local path or an HTTP(S) URL.
pub async fn resolve_upload(input: &str, timeout_secs: u64) -> Result<Upload, ScanError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    Upload::from_bytes(input, bytes)
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ScanError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ScanError::PermissionDenied { path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ScanError::FileNotFound { path }),
        Err(e) => Err(ScanError::CorruptUpload {
            name: path_str.to_string(),
            detail: e.to_string(),
        }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ScanError> {
    info!("Downloading receipt from: {}", url);

    let failed = |reason: String| ScanError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/ticket.jpg"));
        assert!(is_url("http://example.com/ticket.pdf"));
        assert!(!is_url("/tmp/ticket.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniff_known_formats() {
        assert_eq!(UploadKind::sniff(b"%PDF-1.7\n"), Some(UploadKind::Pdf));
        assert_eq!(UploadKind::sniff(PNG_MAGIC), Some(UploadKind::Png));
        assert_eq!(UploadKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(UploadKind::Jpeg));
        assert_eq!(UploadKind::sniff(b"GIF89a"), None);
    }

    #[test]
    fn content_wins_over_extension() {
        let up = Upload::from_bytes("scan.jpg", PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(up.kind, UploadKind::Png);
    }

    #[test]
    fn mismatched_extension_is_corrupt() {
        let err = Upload::from_bytes("ticket.pdf", b"hello world".to_vec()).unwrap_err();
        assert!(matches!(err, ScanError::CorruptUpload { .. }), "got {err:?}");
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = Upload::from_bytes("notes.txt", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, ScanError::UnsupportedUpload { .. }), "got {err:?}");
    }

    #[test]
    fn empty_file_is_corrupt() {
        let err = Upload::from_bytes("ticket.png", Vec::new()).unwrap_err();
        assert!(matches!(err, ScanError::CorruptUpload { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_upload("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, ScanError::FileNotFound { .. }));
    }
}
