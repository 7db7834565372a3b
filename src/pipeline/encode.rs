//! The prepared receipt image and its request encoding.
//!
//! Photos are sent exactly as uploaded: re-encoding a phone JPEG as PNG
//! triples the payload without adding detail. Only a rasterised PDF page
//! is encoded here, as lossless PNG so small print stays crisp.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Where the submitted image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ReceiptSource {
    /// Uploaded PNG/JPEG, bytes untouched.
    Image,
    /// First page of an uploaded PDF, rasterised to PNG.
    PdfFirstPage,
}

/// The single image that will be sent for extraction.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Upload name or URL.
    pub name: String,
    pub source: ReceiptSource,
    pub mime_type: &'static str,
    /// Image payload: original upload bytes, or the PNG of page 1.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Receipt {
    /// File extension matching [`Receipt::mime_type`], for writing previews.
    pub fn extension(&self) -> &'static str {
        match self.mime_type {
            "image/jpeg" => "jpg",
            _ => "png",
        }
    }

    /// Base64 image attachment for the generation request.
    ///
    /// `detail: "high"` keeps fine print legible on providers that tile images.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = STANDARD.encode(&self.bytes);
        debug!("Encoded receipt → {} bytes base64", b64.len());
        ImageData::new(b64, self.mime_type).with_detail("high")
    }
}

/// Encode a rasterised page as PNG bytes.
pub fn encode_page(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded page → {} bytes PNG", buf.len());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_page(&img).expect("encode should succeed");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn image_data_round_trips_payload() {
        let receipt = Receipt {
            name: "ticket.jpg".into(),
            source: ReceiptSource::Image,
            mime_type: "image/jpeg",
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3],
            width: 1,
            height: 1,
        };
        let data = receipt.to_image_data();
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&data.data).expect("valid base64"), receipt.bytes);
        assert_eq!(receipt.extension(), "jpg");
    }
}
