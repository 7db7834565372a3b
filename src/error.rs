//! Error types for the gastoscan library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ScanError`]: the current step cannot proceed at all (missing API
//!   key, unreadable upload, pdfium not available). Configuration errors are
//!   fatal at startup; upload errors end the flow for that one receipt.
//!
//! * [`ExtractionFailure`]: **Recoverable**: the generation call failed or
//!   returned something that is not an expense record. No record is
//!   produced and the user may retry or fill the form by hand.
//!
//! * [`SheetError`]: **Recoverable**: appending the row failed. The pending
//!   record stays in the [`crate::session::Session`] so the save can be
//!   retried without extracting again.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the current step of a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The Gemini credential is not set.
    #[error("GEMINI_API_KEY is not set.\nExport it before starting: export GEMINI_API_KEY=...")]
    MissingApiKey,

    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Upload errors ─────────────────────────────────────────────────────
    /// Upload was not found at the given path.
    #[error("Receipt file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The upload is neither a PDF nor a PNG/JPEG image.
    #[error("Unsupported receipt '{name}': expected a PDF, PNG or JPEG file (first bytes: {magic:02x?})")]
    UnsupportedUpload { name: String, magic: Vec<u8> },

    /// The upload claims a supported type but cannot be decoded.
    #[error("Could not read receipt '{name}': {detail}")]
    CorruptUpload { name: String, detail: String },

    /// The PDF has no pages to rasterise.
    #[error("PDF '{name}' has no pages")]
    EmptyPdf { name: String },

    /// pdfium-render returned an error while drawing the first page.
    #[error("Rasterisation failed for '{name}': {detail}")]
    RasterisationFailed { name: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF receipts need the pdfium shared library. You can:\n\
  • Install it system-wide (libpdfium.so / libpdfium.dylib / pdfium.dll).\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium or to the directory containing it.\n\
  • Upload a photo (PNG/JPEG) of the receipt instead.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an extraction produced no record.
///
/// Returned as the `Err` side of [`crate::scan::Scanner::extract`]. Never
/// fatal: the caller reports it and lets the user retry.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionFailure {
    /// The generation call itself failed (network, quota, bad model name).
    #[error("Model '{model}' failed: {detail}")]
    Service { model: String, detail: String },

    /// The model answered with nothing once fences were removed.
    #[error("Model '{model}' returned an empty response")]
    EmptyResponse { model: String },

    /// The answer is not JSON.
    #[error("Response is not valid JSON ({detail}). Received: {excerpt}")]
    MalformedJson { detail: String, excerpt: String },

    /// The answer is JSON but not an object.
    #[error("Response JSON is a {found}, expected an object")]
    NotAnObject { found: String },

    /// Extraction was requested before any receipt was loaded.
    #[error("No receipt loaded; upload a photo or PDF first")]
    NoReceipt,
}

/// Failures while appending a row to the spreadsheet.
#[derive(Debug, Error)]
pub enum SheetError {
    /// No service-account credential was configured.
    #[error("Saving is disabled: GCP_SERVICE_ACCOUNT_JSON is not set")]
    NotConfigured,

    /// The credential blob is not a service-account key.
    #[error("Invalid service-account credential: {0}")]
    InvalidCredentials(String),

    /// Token exchange failed or the API rejected the token.
    #[error("Google authentication failed: {detail}\nShare the spreadsheet with {client_email} (Editor).")]
    Auth { client_email: String, detail: String },

    /// No spreadsheet with that name is visible to the service account.
    #[error("Spreadsheet '{name}' not found.\nShare it with {client_email} or set GASTOSCAN_SPREADSHEET_ID.")]
    SpreadsheetNotFound { name: String, client_email: String },

    /// The spreadsheet has no worksheet with that name.
    #[error("Worksheet '{worksheet}' not found in spreadsheet {spreadsheet_id}")]
    WorksheetNotFound {
        spreadsheet_id: String,
        worksheet: String,
    },

    /// Any other HTTP or transport failure.
    #[error("Failed to append row: {0}")]
    AppendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_mentions_variable() {
        assert!(ScanError::MissingApiKey.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn unsupported_upload_shows_magic_in_hex() {
        let e = ScanError::UnsupportedUpload {
            name: "notes.txt".into(),
            magic: vec![0x68, 0x69],
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
        assert!(msg.contains("68"), "got: {msg}");
    }

    #[test]
    fn malformed_json_display() {
        let e = ExtractionFailure::MalformedJson {
            detail: "expected value at line 1 column 1".into(),
            excerpt: "Lo siento".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("not valid JSON"));
        assert!(msg.contains("Lo siento"));
    }

    #[test]
    fn auth_error_names_service_account() {
        let e = SheetError::Auth {
            client_email: "bot@project.iam.gserviceaccount.com".into(),
            detail: "invalid_grant".into(),
        };
        assert!(e.to_string().contains("bot@project.iam.gserviceaccount.com"));
    }

    #[test]
    fn extraction_failure_serializes() {
        let e = ExtractionFailure::EmptyResponse {
            model: "gemini-2.0-flash".into(),
        };
        let json = serde_json::to_string(&e).expect("serialize");
        assert!(json.contains("EmptyResponse"));
    }
}
