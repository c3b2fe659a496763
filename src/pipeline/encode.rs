//! Image encoding: raw bytes or `DynamicImage` → base64 attachment.
//!
//! Both the OCR REST call and the vision classifier accept images as base64
//! strings embedded in a JSON body. [`ImageAttachment`] is the provider-neutral
//! form; it converts into `edgequake_llm::ImageData` or a `data:` URL as each
//! client needs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A base64-encoded image ready for an API request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Standard base64, no `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

impl ImageAttachment {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// `data:<mime>;base64,<data>` as used by OpenAI-style `image_url` parts.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

impl From<&ImageAttachment> for ImageData {
    fn from(img: &ImageAttachment) -> Self {
        // "high" keeps small print legible; forms are mostly small print.
        ImageData::new(img.data.clone(), img.mime_type.clone()).with_detail("high")
    }
}

/// Encode an image section as a base64 PNG.
///
/// Sections are cropped from an already-compressed image, so lossless PNG
/// avoids a second round of JPEG artefacts on text edges.
pub fn encode_png(img: &DynamicImage) -> Result<ImageAttachment, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let attachment = ImageAttachment::from_bytes(&buf, "image/png");
    debug!("Encoded section → {} bytes base64", attachment.data.len());
    Ok(attachment)
}

/// Best-effort MIME sniffing from magic bytes. Falls back to JPEG.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Tiff) => "image/tiff",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(sniff_mime(&decoded), "image/png");
    }

    #[test]
    fn data_url_has_prefix() {
        let a = ImageAttachment::from_bytes(b"abc", "image/jpeg");
        assert_eq!(a.to_data_url(), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn converts_to_provider_image() {
        let a = ImageAttachment::from_bytes(b"abc", "image/png");
        let img: ImageData = (&a).into();
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(img.data, "YWJj");
    }
}
