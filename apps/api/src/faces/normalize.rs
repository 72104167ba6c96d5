//! Image normalization for the face-matching pipeline.
//!
//! Uploaded photos are converted to grayscale and replicated back into
//! three channels before embedding extraction, so comparisons are
//! invariant to color and lighting casts. Only the matching pipeline sees
//! the normalized derivative; the original upload is what gets stored as
//! the profile photo.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::errors::AppError;

const JPEG_QUALITY: u8 = 90;

/// Decodes raw upload bytes, flattens to grayscale, replicates the gray
/// channel across RGB, and re-encodes as JPEG for the embedding extractor.
///
/// Fails with `AppError::ImageDecode` on corrupt or unsupported input.
pub fn normalize_photo(bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let decoded = image::load_from_memory(bytes)?;
    let gray = decoded.to_luma8();

    let (width, height) = gray.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (x, y, pixel) in gray.enumerate_pixels() {
        let v = pixel.0[0];
        rgb.put_pixel(x, y, Rgb([v, v, v]));
    }

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// Decodes image bytes into the RGB pixel buffer the face engine consumes.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, AppError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn color_png() -> Vec<u8> {
        let mut img = RgbImage::new(4, 4);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 60) as u8, (y * 60) as u8, 200]);
        }
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn normalized_output_is_jpeg_with_equal_channels() {
        let normalized = normalize_photo(&color_png()).unwrap();

        assert_eq!(
            image::guess_format(&normalized).unwrap(),
            ImageFormat::Jpeg
        );

        let rgb = decode_rgb(&normalized).unwrap();
        for pixel in rgb.pixels() {
            assert_eq!(pixel.0[0], pixel.0[1]);
            assert_eq!(pixel.0[1], pixel.0[2]);
        }
    }

    #[test]
    fn normalize_preserves_dimensions() {
        let normalized = normalize_photo(&color_png()).unwrap();
        let rgb = decode_rgb(&normalized).unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
    }

    #[test]
    fn corrupt_bytes_fail_with_decode_error() {
        let err = normalize_photo(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AppError::ImageDecode(_)));
    }

    #[test]
    fn empty_input_fails_with_decode_error() {
        let err = normalize_photo(&[]).unwrap_err();
        assert!(matches!(err, AppError::ImageDecode(_)));
    }
}
