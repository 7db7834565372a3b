//! Pipeline stages for receipt extraction.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the network-facing ones can be replaced by fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ models ──▶ llm ──▶ postprocess
//! (path/URL) (PDF p.1)  (payload)  (resolve)  (Gemini)  (fences + JSON)
//! ```
//!
//! 1. [`input`]: read the upload and classify it by magic bytes
//! 2. [`render`]: rasterise page 1 of a PDF; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: the single image payload (original photo bytes or page PNG)
//! 4. [`models`]: list available models and pick one by preference
//! 5. [`llm`]: one generation call per extraction, no retries
//! 6. [`postprocess`]: strip fences and parse the JSON record

pub mod encode;
pub mod input;
pub mod llm;
pub mod models;
pub mod postprocess;
pub mod render;
