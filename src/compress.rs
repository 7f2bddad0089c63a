//! Shrinks reference images before they are embedded in provider requests.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

/// Budget applied to every reference image sent to a provider.
pub const REFERENCE_MAX_KB: usize = 200;

const FIRST_QUALITY: u8 = 80;
const FALLBACK_QUALITY: u8 = 60;

/// Re-encodes `data` as JPEG when it is larger than `max_size_kb`.
///
/// Tries quality 80 first and then quality 60, returning the second
/// attempt whatever its size. Input that cannot be decoded, or fails to
/// encode, is handed back unchanged.
pub fn compress_image(data: &[u8], max_size_kb: usize) -> Vec<u8> {
    let budget = max_size_kb * 1024;
    if data.len() <= budget {
        return data.to_vec();
    }

    let decoded = match image::load_from_memory(data) {
        Ok(img) => img,
        Err(e) => {
            log::debug!("Reference image not decodable, sending as is: {}", e);
            return data.to_vec();
        }
    };

    match encode_jpeg(&decoded, FIRST_QUALITY) {
        Some(first) if first.len() <= budget => {
            log::debug!(
                "Compressed reference image {}KB -> {}KB (q{})",
                data.len() / 1024,
                first.len() / 1024,
                FIRST_QUALITY
            );
            first
        }
        _ => match encode_jpeg(&decoded, FALLBACK_QUALITY) {
            Some(second) => {
                log::debug!(
                    "Compressed reference image {}KB -> {}KB (q{})",
                    data.len() / 1024,
                    second.len() / 1024,
                    FALLBACK_QUALITY
                );
                second
            }
            None => data.to_vec(),
        },
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    match img.to_rgb8().write_with_encoder(encoder) {
        Ok(()) => Some(out),
        Err(e) => {
            log::warn!("JPEG encoding at quality {} failed: {}", quality, e);
            None
        }
    }
}

/// Best-effort mime type for raw image bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    match image::guess_format(data).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient_bmp(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Bmp).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_small_input_is_untouched() {
        let data = gradient_bmp(8, 8);
        assert!(data.len() < 1024);
        assert_eq!(compress_image(&data, 1), data);
    }

    #[test]
    fn test_oversized_image_falls_back_to_quality_60() {
        let data = gradient_bmp(256, 256);
        let decoded = image::load_from_memory(&data).unwrap();
        let q60 = encode_jpeg(&decoded, FALLBACK_QUALITY).unwrap();

        // A zero budget cannot be met by either quality, so the q60 attempt wins.
        let compressed = compress_image(&data, 0);
        assert!(compressed.len() < data.len());
        assert_eq!(compressed, q60);
        assert_eq!(sniff_mime(&compressed), Some("image/jpeg"));
    }

    #[test]
    fn test_generous_budget_keeps_quality_80() {
        let data = gradient_bmp(128, 128);
        let decoded = image::load_from_memory(&data).unwrap();
        let q80 = encode_jpeg(&decoded, FIRST_QUALITY).unwrap();
        let budget_kb = q80.len() / 1024 + 1;
        assert!(data.len() > budget_kb * 1024);

        assert_eq!(compress_image(&data, budget_kb), q80);
    }

    #[test]
    fn test_undecodable_input_is_returned_unchanged() {
        let garbage = vec![0xABu8; 4096];
        assert_eq!(compress_image(&garbage, 1), garbage);
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&gradient_bmp(2, 2)), Some("image/bmp"));
        assert_eq!(sniff_mime(b"not an image"), None);
    }
}
