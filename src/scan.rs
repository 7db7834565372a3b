//! The scanning workflow: load → resolve model → extract → save.
//!
//! [`Scanner`] holds the long-lived collaborators (model catalog,
//! generation service, PDF renderer, spreadsheet appender) and is shared by
//! every session; all per-user state lives in the [`Session`] passed to each
//! call. Each step completes before the next one starts.

use crate::config::ScanConfig;
use crate::error::{ExtractionFailure, ScanError, SheetError};
use crate::form::ExpenseForm;
use crate::pipeline::encode::{encode_page, Receipt, ReceiptSource};
use crate::pipeline::input::{resolve_upload, Upload, UploadKind};
use crate::pipeline::llm::{extract_record, GenerationService, ProviderGeneration};
use crate::pipeline::models::{
    resolve_with_catalog, GeminiModelCatalog, ModelCatalog, ModelInfo, Resolution,
};
use crate::pipeline::render::{render_first_page, FirstPageRenderer, PdfiumRenderer};
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use crate::record::ExpenseRecord;
use crate::session::Session;
use crate::sheets::{AppendedRow, GoogleSheetsAppender, SheetAppender};
use image::ImageFormat;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for scanning receipts.
pub struct Scanner {
    config: ScanConfig,
    catalog: Arc<dyn ModelCatalog>,
    generation: Arc<dyn GenerationService>,
    renderer: Arc<dyn FirstPageRenderer>,
    sheet: Option<Arc<dyn SheetAppender>>,
    sheet_problem: Option<String>,
}

impl Scanner {
    /// Wire the production collaborators from `config`.
    ///
    /// An unusable spreadsheet credential does not fail construction: saving
    /// reports the problem instead, and extraction keeps working.
    pub fn new(config: ScanConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start from `config` and replace individual collaborators.
    pub fn builder(config: ScanConfig) -> ScannerBuilder {
        ScannerBuilder {
            config,
            catalog: None,
            generation: None,
            renderer: None,
            sheet: None,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// True when rows can be appended.
    pub fn can_save(&self) -> bool {
        self.sheet.is_some()
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Load a receipt from a path or URL into the session.
    ///
    /// Replaces any previous receipt and pending record.
    pub async fn load<'s>(
        &self,
        session: &'s mut Session,
        input: &str,
    ) -> Result<&'s Receipt, ScanError> {
        let upload = resolve_upload(input, self.config.download_timeout_secs).await?;
        let receipt = self.prepare(upload).await?;
        Ok(session.set_receipt(receipt))
    }

    /// Load a receipt already held in memory.
    pub async fn load_bytes<'s>(
        &self,
        session: &'s mut Session,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<&'s Receipt, ScanError> {
        let upload = Upload::from_bytes(name, bytes)?;
        let receipt = self.prepare(upload).await?;
        Ok(session.set_receipt(receipt))
    }

    /// Turn an upload into the single image to submit.
    ///
    /// Photos keep their original bytes; only PDFs are rasterised, and only
    /// their first page.
    async fn prepare(&self, upload: Upload) -> Result<Receipt, ScanError> {
        let Upload { name, kind, bytes } = upload;

        match kind {
            UploadKind::Png | UploadKind::Jpeg => {
                let format = if kind == UploadKind::Png {
                    ImageFormat::Png
                } else {
                    ImageFormat::Jpeg
                };
                let decode_name = name.clone();
                let (bytes, width, height) = tokio::task::spawn_blocking(move || {
                    image::load_from_memory_with_format(&bytes, format)
                        .map(|img| (img.width(), img.height()))
                        .map(|(w, h)| (bytes, w, h))
                        .map_err(|e| ScanError::CorruptUpload {
                            name: decode_name,
                            detail: e.to_string(),
                        })
                })
                .await
                .map_err(|e| ScanError::Internal(format!("Decode task panicked: {}", e)))??;

                info!("Loaded image receipt '{}' ({}x{})", name, width, height);
                Ok(Receipt {
                    name,
                    source: ReceiptSource::Image,
                    mime_type: kind.mime_type(),
                    bytes,
                    width,
                    height,
                })
            }
            UploadKind::Pdf => {
                let page = render_first_page(
                    Arc::clone(&self.renderer),
                    &name,
                    bytes,
                    self.config.max_rendered_pixels,
                )
                .await?;
                let png = encode_page(&page).map_err(|e| ScanError::RasterisationFailed {
                    name: name.clone(),
                    detail: format!("PNG encoding failed: {}", e),
                })?;

                info!(
                    "Loaded PDF receipt '{}', page 1 at {}x{}",
                    name,
                    page.width(),
                    page.height()
                );
                Ok(Receipt {
                    name,
                    source: ReceiptSource::PdfFirstPage,
                    mime_type: UploadKind::Png.mime_type(),
                    bytes: png,
                    width: page.width(),
                    height: page.height(),
                })
            }
        }
    }

    // ── Model ────────────────────────────────────────────────────────────

    /// Models the credential can see, unfiltered.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, String> {
        self.catalog.list_models().await
    }

    /// Pick the model for the next extraction.
    ///
    /// A configured fixed model wins. Otherwise the session cache is used
    /// unless `resolve_per_call` is set, in which case listing runs every
    /// time. Only a model picked from a successful listing is cached. Never
    /// fails.
    pub async fn resolve_model(&self, session: &mut Session) -> Resolution {
        if let Some(ref model) = self.config.model {
            return Resolution::Fixed {
                model: model.clone(),
            };
        }

        if !self.config.resolve_per_call {
            if let Some(model) = session.cached_model() {
                debug!("Using session model '{}'", model);
                return Resolution::Fixed {
                    model: model.to_string(),
                };
            }
        }

        let resolution = resolve_with_catalog(
            self.catalog.as_ref(),
            &self.config.model_preferences,
            &self.config.fallback_model,
        )
        .await;
        match resolution {
            Resolution::Preferred { .. } | Resolution::FirstAvailable { .. } => {
                session.cache_model(resolution.model());
            }
            // A fallback is not cached, so the next call lists again.
            Resolution::Fallback { .. } | Resolution::Fixed { .. } => {}
        }
        resolution
    }

    // ── Extraction ───────────────────────────────────────────────────────

    /// Extract an expense record from the session's receipt.
    ///
    /// Resolves the model with [`Scanner::resolve_model`], then runs
    /// [`Scanner::extract_with`].
    pub async fn extract(&self, session: &mut Session) -> Result<ExpenseRecord, ExtractionFailure> {
        if session.receipt().is_none() {
            return Err(ExtractionFailure::NoReceipt);
        }
        let resolution = self.resolve_model(session).await;
        self.extract_with(session, &resolution).await
    }

    /// Extract with an already resolved model.
    ///
    /// On success the record becomes the session's pending record; on
    /// failure the pending record is cleared. Either way the session is
    /// left consistent and the caller may retry. A service failure also
    /// drops the cached model so the retry resolves again.
    pub async fn extract_with(
        &self,
        session: &mut Session,
        resolution: &Resolution,
    ) -> Result<ExpenseRecord, ExtractionFailure> {
        let receipt = match session.receipt() {
            Some(r) => r.clone(),
            None => return Err(ExtractionFailure::NoReceipt),
        };

        let model = resolution.model();
        let prompt = self
            .config
            .prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT);

        let result = extract_record(self.generation.as_ref(), model, prompt, &receipt).await;
        if let Err(ExtractionFailure::Service { .. }) = result {
            if session.cached_model() == Some(model) {
                session.clear_model();
            }
        }
        session.set_pending(result.as_ref().ok().cloned());
        result
    }

    // ── Save ─────────────────────────────────────────────────────────────

    /// Append `form` as one row and clear the session's pending record.
    ///
    /// On failure the session is untouched so the save can be retried.
    pub async fn save(
        &self,
        session: &mut Session,
        form: &ExpenseForm,
    ) -> Result<AppendedRow, SheetError> {
        let sheet = match (&self.sheet, &self.sheet_problem) {
            (Some(sheet), _) => sheet,
            (None, Some(problem)) => return Err(SheetError::InvalidCredentials(problem.clone())),
            (None, None) => return Err(SheetError::NotConfigured),
        };
        let columns = self
            .config
            .sheet
            .as_ref()
            .map(|s| s.columns.clone())
            .unwrap_or_else(|| crate::form::SheetColumn::DEFAULT_LAYOUT.to_vec());

        let row = form.to_row(&columns);
        match sheet.append_row(&row).await {
            Ok(appended) => {
                session.mark_saved();
                Ok(appended)
            }
            Err(e) => {
                warn!("Save failed, keeping pending record: {}", e);
                Err(e)
            }
        }
    }
}

/// Builder for [`Scanner`]; unset collaborators get production defaults.
pub struct ScannerBuilder {
    config: ScanConfig,
    catalog: Option<Arc<dyn ModelCatalog>>,
    generation: Option<Arc<dyn GenerationService>>,
    renderer: Option<Arc<dyn FirstPageRenderer>>,
    sheet: Option<Arc<dyn SheetAppender>>,
}

impl ScannerBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn generation(mut self, generation: Arc<dyn GenerationService>) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn FirstPageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn sheet(mut self, sheet: Arc<dyn SheetAppender>) -> Self {
        self.sheet = Some(sheet);
        self
    }

    pub fn build(self) -> Scanner {
        let config = self.config;

        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(GeminiModelCatalog::new(config.api_key.clone())));
        let generation = self.generation.unwrap_or_else(|| {
            Arc::new(ProviderGeneration::new(
                config.api_key.clone(),
                config.temperature,
                config.max_tokens,
            ))
        });
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(PdfiumRenderer::new()));

        let (sheet, sheet_problem) = match (self.sheet, config.sheet.as_ref()) {
            (Some(sheet), _) => (Some(sheet), None),
            (None, Some(sheet_config)) => match GoogleSheetsAppender::new(sheet_config) {
                Ok(appender) => (Some(Arc::new(appender) as Arc<dyn SheetAppender>), None),
                Err(e) => {
                    warn!("Saving disabled: {}", e);
                    (None, Some(e.to_string()))
                }
            },
            (None, None) => (None, None),
        };

        Scanner {
            config,
            catalog,
            generation,
            renderer,
            sheet,
            sheet_problem,
        }
    }
}
