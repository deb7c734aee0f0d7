//! JPEG normalization of uploaded product images.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use metrics::counter;

use crate::application::catalog::media::{ImageError, ImageNormalizer, NormalizedImage, Upload};

pub const DEFAULT_MAX_DIMENSION: u32 = 800;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Refuse to decode images whose header claims more pixels than this.
const MAX_SOURCE_PIXELS: u64 = 64 * 1024 * 1024;

/// Converts any decodable upload to RGB, shrinks it to fit a square bound
/// while keeping its aspect ratio, and re-encodes it as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegNormalizer {
    max_dimension: u32,
    quality: u8,
}

impl Default for JpegNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION, DEFAULT_JPEG_QUALITY)
    }
}

impl JpegNormalizer {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImageError> {
        let size = imagesize::blob_size(bytes).map_err(|err| ImageError::Decode(err.to_string()))?;
        let pixels = (size.width as u64).saturating_mul(size.height as u64);
        if pixels == 0 || pixels > MAX_SOURCE_PIXELS {
            return Err(ImageError::Decode(format!(
                "unsupported dimensions {}x{}",
                size.width, size.height
            )));
        }

        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| ImageError::Decode(err.to_string()))?
            .decode()
            .map_err(|err| ImageError::Decode(err.to_string()))
    }
}

impl ImageNormalizer for JpegNormalizer {
    fn normalize(&self, upload: &Upload) -> Result<NormalizedImage, ImageError> {
        let decoded = match self.decode(&upload.bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                counter!("catalogue_image_normalized_total", "outcome" => "rejected").increment(1);
                return Err(err);
            }
        };

        let mut rgb = decoded.to_rgb8();
        if rgb.width() > self.max_dimension || rgb.height() > self.max_dimension {
            rgb = DynamicImage::ImageRgb8(rgb)
                .resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
                .to_rgb8();
        }
        let (width, height) = rgb.dimensions();

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|err| ImageError::Encode(err.to_string()))?;

        counter!("catalogue_image_normalized_total", "outcome" => "stored").increment(1);
        Ok(NormalizedImage {
            file_name: jpeg_name(&upload.file_name),
            bytes: Bytes::from(encoded),
            width,
            height,
        })
    }
}

fn jpeg_name(original: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("image");
    format!("{stem}.jpg")
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn png(width: u32, height: u32) -> Upload {
        let pixels = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 128]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(pixels)
            .write_to(&mut buffer, ImageFormat::Png)
            .expect("png encodes");
        Upload {
            file_name: "swatch.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from(buffer.into_inner()),
        }
    }

    #[test]
    fn large_images_shrink_to_fit_and_become_jpeg() {
        let normalized = JpegNormalizer::default()
            .normalize(&png(1600, 400))
            .expect("normalized");

        assert_eq!((normalized.width, normalized.height), (800, 200));
        assert_eq!(normalized.file_name, "swatch.jpg");
        assert_eq!(&normalized.bytes[..3], &[0xFF, 0xD8, 0xFF]);

        let decoded = image::load_from_memory(&normalized.bytes).expect("decodes");
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let normalized = JpegNormalizer::default()
            .normalize(&png(120, 90))
            .expect("normalized");
        assert_eq!((normalized.width, normalized.height), (120, 90));
    }

    #[test]
    fn undecodable_bytes_are_a_decode_error() {
        let upload = Upload {
            file_name: "notes.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            bytes: Bytes::from_static(b"definitely not an image"),
        };
        let err = JpegNormalizer::default()
            .normalize(&upload)
            .expect_err("text is rejected");
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn names_keep_the_stem() {
        assert_eq!(jpeg_name("front.view.PNG"), "front.view.jpg");
        assert_eq!(jpeg_name(""), "image.jpg");
    }
}
