//! Image preparation: re-compression and vertical splitting.
//!
//! Both operations are CPU-bound and synchronous; async callers run them
//! inside `tokio::task::spawn_blocking`. Neither ever fails: a compression
//! error hands back the original bytes, and an unreadable image becomes a
//! single full-buffer section.

use crate::config::{CompressionOptions, ImageFormat};
use crate::pipeline::encode::sniff_mime;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

/// Output of [`compress`].
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// `original_len / new_len`; `0.0` when compression fell back to the
    /// original bytes.
    pub compression_ratio: f64,
}

/// Resize (only if needed) and re-encode an image.
///
/// Aspect ratio is preserved; the image is shrunk until it fits inside
/// `max_width × max_height`.
pub fn compress(bytes: &[u8], options: &CompressionOptions) -> CompressedImage {
    match try_compress(bytes, options) {
        Ok(out) => {
            debug!(
                "Compressed {} → {} bytes (ratio {:.2})",
                bytes.len(),
                out.bytes.len(),
                out.compression_ratio
            );
            out
        }
        Err(e) => {
            warn!("Image compression failed, using original bytes: {}", e);
            CompressedImage {
                bytes: bytes.to_vec(),
                mime_type: sniff_mime(bytes).to_string(),
                compression_ratio: 0.0,
            }
        }
    }
}

fn try_compress(bytes: &[u8], options: &CompressionOptions) -> Result<CompressedImage, image::ImageError> {
    let mut img = image::load_from_memory(bytes)?;
    if img.width() > options.max_width || img.height() > options.max_height {
        img = img.resize(options.max_width, options.max_height, FilterType::Lanczos3);
    }

    let mut buf = Vec::new();
    match options.format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, options.quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
    }

    let ratio = if buf.is_empty() {
        0.0
    } else {
        bytes.len() as f64 / buf.len() as f64
    };
    Ok(CompressedImage {
        bytes: buf,
        mime_type: options.format.mime_type().to_string(),
        compression_ratio: ratio,
    })
}

// ── Splitting ────────────────────────────────────────────────────────────

/// One vertical slice of a tall image.
#[derive(Debug, Clone)]
pub struct ImageSection {
    /// 0-based position in the section list.
    pub index: usize,
    pub total: usize,
    /// First source row covered by this section.
    pub y_start: u32,
    pub height: u32,
    /// Rows shared with the following section; 0 for the last one.
    pub overlap_with_next: u32,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageSection {
    /// One past the last source row covered.
    pub fn y_end(&self) -> u32 {
        self.y_start + self.height
    }
}

/// Compute `(y_start, height)` for each section of an image `height` rows tall.
///
/// Sections after the first start `sectionHeight - overlap` rows after the
/// previous one; the last section runs to the bottom edge, so every row is
/// covered and each boundary is duplicated in both neighbours.
pub fn plan_sections(height: u32, max_height: u32, overlap: u32) -> Vec<(u32, u32)> {
    if height <= max_height || max_height == 0 {
        return vec![(0, height)];
    }
    let n = height.div_ceil(max_height);
    let section_height = height.saturating_sub(overlap) / n + overlap;
    let step = section_height - overlap;
    if step == 0 {
        return vec![(0, height)];
    }

    (0..n)
        .map(|i| {
            let start = i * step;
            if i + 1 == n {
                (start, height - start)
            } else {
                (start, section_height)
            }
        })
        .collect()
}

/// Split an image into overlapping vertical sections.
///
/// Images no taller than `max_height` come back as one section holding the
/// original bytes. Split sections are PNG-encoded crops.
pub fn split(bytes: &[u8], max_height: u32, overlap: u32) -> Vec<ImageSection> {
    let dims = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|r| r.into_dimensions().ok());

    let Some((width, height)) = dims else {
        warn!("Could not read image metadata; treating as a single section (height 0)");
        return vec![whole(bytes, 0)];
    };

    let plan = plan_sections(height, max_height, overlap);
    if plan.len() == 1 {
        debug!("Image {}x{} fits in one section", width, height);
        return vec![whole(bytes, height)];
    }

    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Could not decode image for splitting ({}); using a single section", e);
            return vec![whole(bytes, height)];
        }
    };

    let total = plan.len();
    let mut sections = Vec::with_capacity(total);
    for (index, &(y_start, h)) in plan.iter().enumerate() {
        let overlap_with_next = plan
            .get(index + 1)
            .map_or(0, |&(next_start, _)| (y_start + h).saturating_sub(next_start));
        let crop = img.crop_imm(0, y_start, width, h);
        let mut buf = Vec::new();
        if let Err(e) = crop.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png) {
            warn!("Could not encode section {} ({}); using a single section", index + 1, e);
            return vec![whole(bytes, height)];
        }
        debug!(
            "Section {}/{}: y={}..{} ({}px)",
            index + 1,
            total,
            y_start,
            y_start + h,
            h
        );
        sections.push(ImageSection {
            index,
            total,
            y_start,
            height: h,
            overlap_with_next,
            bytes: buf,
            mime_type: "image/png".to_string(),
        });
    }
    sections
}

fn whole(bytes: &[u8], height: u32) -> ImageSection {
    ImageSection {
        index: 0,
        total: 1,
        y_start: 0,
        height,
        overlap_with_next: 0,
        bytes: bytes.to_vec(),
        mime_type: sniff_mime(bytes).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([250, 250, 250])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn assert_covers(plan: &[(u32, u32)], height: u32, overlap: u32) {
        assert_eq!(plan[0].0, 0);
        let last = plan[plan.len() - 1];
        assert_eq!(last.0 + last.1, height, "last section must reach the bottom");
        for pair in plan.windows(2) {
            let (a_start, a_h) = pair[0];
            let (b_start, _) = pair[1];
            assert!(b_start <= a_start + a_h, "gap between sections");
        }
        let sum: u32 = plan.iter().map(|(_, h)| h).sum();
        assert_eq!(sum - overlap * (plan.len() as u32 - 1), height);
    }

    #[test]
    fn short_image_is_one_section() {
        assert_eq!(plan_sections(3000, 4000, 200), vec![(0, 3000)]);
        assert_eq!(plan_sections(4000, 4000, 200), vec![(0, 4000)]);
    }

    #[test]
    fn tall_image_sections_match_formula() {
        let plan = plan_sections(10_000, 4000, 200);
        assert_eq!(plan, vec![(0, 3466), (3266, 3466), (6532, 3468)]);
        assert_covers(&plan, 10_000, 200);
    }

    #[test]
    fn coverage_holds_across_heights() {
        for height in [4001, 5555, 8000, 8001, 12_345, 31_999] {
            for (max, overlap) in [(4000, 200), (1000, 0), (1500, 499)] {
                let plan = plan_sections(height, max, overlap);
                assert_eq!(plan.len() as u32, height.div_ceil(max));
                assert_covers(&plan, height, overlap);
            }
        }
    }

    #[test]
    fn split_crops_real_image() {
        let bytes = png(20, 250);
        let sections = split(&bytes, 100, 10);
        assert_eq!(sections.len(), 3);
        for s in &sections {
            let img = image::load_from_memory(&s.bytes).unwrap();
            assert_eq!(img.width(), 20);
            assert_eq!(img.height(), s.height);
            assert_eq!(s.total, 3);
        }
        assert_eq!(sections.last().unwrap().y_end(), 250);
    }

    #[test]
    fn sections_record_overlap_with_next() {
        let sections = split(&png(20, 250), 100, 10);
        let overlaps: Vec<_> = sections.iter().map(|s| s.overlap_with_next).collect();
        assert_eq!(overlaps, vec![10, 10, 0]);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].y_end() - pair[1].y_start, pair[0].overlap_with_next);
        }
        assert_eq!(split(&png(20, 50), 100, 10)[0].overlap_with_next, 0);
    }

    #[test]
    fn split_small_image_keeps_original_bytes() {
        let bytes = png(20, 50);
        let sections = split(&bytes, 100, 10);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].bytes, bytes);
        assert_eq!(sections[0].height, 50);
    }

    #[test]
    fn split_garbage_falls_back_to_single_section() {
        let sections = split(b"not an image", 100, 10);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].height, 0);
        assert_eq!(sections[0].bytes, b"not an image");
    }

    #[test]
    fn compress_shrinks_wide_image_preserving_aspect() {
        let bytes = png(400, 200);
        let opts = CompressionOptions {
            max_width: 100,
            max_height: 1000,
            quality: 80,
            format: ImageFormat::Jpeg,
        };
        let out = compress(&bytes, &opts);
        assert_eq!(out.mime_type, "image/jpeg");
        let img = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
        assert!(out.compression_ratio > 0.0);
    }

    #[test]
    fn compress_failure_returns_original() {
        let out = compress(b"garbage", &CompressionOptions::default());
        assert_eq!(out.bytes, b"garbage");
        assert_eq!(out.compression_ratio, 0.0);
    }
}
