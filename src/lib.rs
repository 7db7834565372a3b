//! # gastoscan
//!
//! Turn a photo or PDF of a receipt into an expense row.
//!
//! A receipt is submitted as a single image to a Gemini vision model together
//! with a fixed Spanish instruction. The answer is stripped of Markdown code
//! fences and parsed as a JSON object, which pre-fills an editable form. When
//! the user confirms, the form becomes one row appended to a Google Sheets
//! worksheet.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (photo / PDF)
//!  │
//!  ├─ 1. Input    read the file or download the URL, sniff magic bytes
//!  ├─ 2. Render   PDF only: rasterise page 1 via pdfium (spawn_blocking)
//!  ├─ 3. Model    list models, pick by preference, fall back on failure
//!  ├─ 4. Extract  one vision call, strip fences, strict JSON parse
//!  ├─ 5. Form     bind the record, defaults for anything missing
//!  └─ 6. Save     append one row in the configured column order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gastoscan::{ScanConfig, Scanner, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // GEMINI_API_KEY is required; GCP_SERVICE_ACCOUNT_JSON enables saving.
//!     let scanner = Scanner::new(ScanConfig::from_env()?);
//!     let mut session = Session::new();
//!
//!     scanner.load(&mut session, "ticket.jpg").await?;
//!     match scanner.extract(&mut session).await {
//!         Ok(record) => println!("{record:?}"),
//!         Err(e) => eprintln!("fill the form by hand: {e}"),
//!     }
//!
//!     let form = session.form();
//!     if scanner.can_save() {
//!         scanner.save(&mut session, &form).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `gastoscan` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod form;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod scan;
pub mod session;
pub mod sheets;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ModelPreference, ScanConfig, ScanConfigBuilder, SheetConfig};
pub use error::{ExtractionFailure, ScanError, SheetError};
pub use form::{Category, Currency, ExpenseForm, SheetColumn};
pub use pipeline::encode::{Receipt, ReceiptSource};
pub use pipeline::models::{ModelInfo, Resolution};
pub use record::ExpenseRecord;
pub use scan::{Scanner, ScannerBuilder};
pub use session::Session;
pub use sheets::{AppendedRow, SheetAppender, TokenSource};
