//! PDF rasterisation: draw the first page of a receipt PDF via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. Rendering happens on
//! the blocking pool so the runtime's worker threads never stall.
//!
//! Only page 1 is ever drawn: a receipt is one page, and multi-page
//! documents are out of scope.

use crate::error::ScanError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Something that can turn PDF bytes into an image of the first page.
pub trait FirstPageRenderer: Send + Sync {
    /// Rasterise page 1, longest edge capped at `max_pixels`.
    fn render_first_page(&self, name: &str, pdf: &[u8], max_pixels: u32)
        -> Result<DynamicImage, ScanError>;
}

/// Renderer backed by a pdfium shared library.
///
/// The library is located through `PDFIUM_LIB_PATH` (a file or the directory
/// holding it) and otherwise through the system loader.
#[derive(Debug, Default, Clone)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ScanError> {
        let bindings = match self.library_path {
            Some(ref path) => {
                let lib = if path.is_dir() {
                    path.join(platform_library_name())
                } else {
                    path.clone()
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(lib.to_string_lossy().to_string())
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ScanError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

fn platform_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "pdfium.dll"
    } else if cfg!(target_os = "macos") {
        "libpdfium.dylib"
    } else {
        "libpdfium.so"
    }
}

impl FirstPageRenderer for PdfiumRenderer {
    fn render_first_page(
        &self,
        name: &str,
        pdf: &[u8],
        max_pixels: u32,
    ) -> Result<DynamicImage, ScanError> {
        let pdfium = self.bind()?;

        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            let detail = if err_str.to_lowercase().contains("password") {
                "PDF is password-protected".to_string()
            } else {
                err_str
            };
            ScanError::CorruptUpload {
                name: name.to_string(),
                detail,
            }
        })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(ScanError::EmptyPdf {
                name: name.to_string(),
            });
        }
        info!("PDF loaded: {} pages, rendering page 1", total_pages);

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let page = pages.get(0).map_err(|e| ScanError::RasterisationFailed {
            name: name.to_string(),
            detail: format!("{:?}", e),
        })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ScanError::RasterisationFailed {
                name: name.to_string(),
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!("Rendered page 1 → {}x{} px", image.width(), image.height());
        Ok(image)
    }
}

/// Run `renderer` on the blocking pool.
pub async fn render_first_page(
    renderer: Arc<dyn FirstPageRenderer>,
    name: &str,
    pdf: Vec<u8>,
    max_pixels: u32,
) -> Result<DynamicImage, ScanError> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || renderer.render_first_page(&name, &pdf, max_pixels))
        .await
        .map_err(|e| ScanError::Internal(format!("Render task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_name_matches_platform() {
        let name = platform_library_name();
        assert!(name.contains("pdfium"));
    }

    #[test]
    fn bad_library_path_reports_binding_failure() {
        let renderer = PdfiumRenderer::with_library_path("/definitely/not/libpdfium.so");
        let err = renderer
            .render_first_page("ticket.pdf", b"%PDF-1.4", 1000)
            .unwrap_err();
        assert!(matches!(err, ScanError::PdfiumBindingFailed(_)), "got {err:?}");
    }
}
