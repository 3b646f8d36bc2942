use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::config;
use crate::error::{ErrorKind, Result};

use super::SelectedFile;

/// Shrinks large files before upload.
///
/// Files up to `compress_threshold` bytes come back untouched. Larger ones
/// are decoded, scaled down to fit the configured bounds and re-encoded in
/// their original type. A file that can't be decoded is an error, the
/// original is never sent in its place.
pub fn compress_if_needed(file: SelectedFile, settings: &config::Upload) -> Result<SelectedFile> {
    if file.size <= settings.compress_threshold {
        return Ok(file);
    }

    let format = image_format(&file.content_type)?;
    let image = image::load_from_memory_with_format(&file.bytes, format)?;

    let (width, height) = scaled_dimensions(
        image.width(),
        image.height(),
        settings.max_width,
        settings.max_height,
    );
    let image = if (width, height) != (image.width(), image.height()) {
        image.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        image
    };

    let bytes = encode(&image, format, settings.quality)?;
    tracing::debug!(
        file = %file.name,
        before = file.size,
        after = bytes.len(),
        width,
        height,
        "compressed image"
    );

    Ok(SelectedFile {
        size: bytes.len() as u64,
        bytes,
        ..file
    })
}

/// Largest dimensions fitting `max_width` x `max_height` with the source
/// aspect ratio. Never scales up.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let scaled = |side: u32, max: u32| ((side as f64 * ratio).round() as u32).clamp(1, max);

    (scaled(width, max_width), scaled(height, max_height))
}

fn image_format(content_type: &mime::Mime) -> Result<ImageFormat> {
    match content_type.essence_str().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/png" => Ok(ImageFormat::Png),
        "image/webp" => Ok(ImageFormat::WebP),
        other => Err(ErrorKind::UnsupportedImageType(other.to_string()).into()),
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = vec![];
    match format {
        ImageFormat::Jpeg => {
            // jpeg has no alpha channel
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(
                &mut bytes,
                quality.clamp(1, 100),
            ))?;
        }
        ImageFormat::Png => {
            image.write_with_encoder(PngEncoder::new_with_quality(
                &mut bytes,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))?;
        }
        // the webp encoder is lossless only, quality doesn't apply
        ImageFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut bytes))?;
        }
        other => {
            return Err(ErrorKind::UnsupportedImageType(format!("{:?}", other)).into());
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{GenericImageView, Rgb, RgbImage};

    use super::*;
    use crate::config::MIB;

    /// Pseudo random pixels so the encoder can't squeeze the image.
    fn noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut seed: u32 = 0x2545_f491;
        let image = RgbImage::from_fn(width, height, |_, _| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let [r, g, b, _] = seed.to_le_bytes();
            Rgb([r, g, b])
        });
        let mut bytes = vec![];
        DynamicImage::ImageRgb8(image)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 100))
            .unwrap();
        bytes
    }

    #[test]
    fn dimensions_within_bounds_are_kept() {
        assert_eq!(scaled_dimensions(800, 600, 1440, 1080), (800, 600));
        assert_eq!(scaled_dimensions(1440, 1080, 1440, 1080), (1440, 1080));
    }

    #[test]
    fn dimensions_scale_by_tighter_side() {
        assert_eq!(scaled_dimensions(1600, 1200, 1440, 1080), (1440, 1080));
        assert_eq!(scaled_dimensions(2880, 1080, 1440, 1080), (1440, 540));
        assert_eq!(scaled_dimensions(1000, 2160, 1440, 1080), (500, 1080));
        assert_eq!(scaled_dimensions(100_000, 10, 1440, 1080), (1440, 1));
    }

    #[test]
    fn small_files_pass_through() {
        let settings = config::Upload::default();
        let bytes = vec![7u8; (MIB + MIB / 2) as usize];
        let file = SelectedFile::with_type("small.jpg", "image/jpeg", bytes.clone());
        let id = file.id;

        let out = compress_if_needed(file, &settings).unwrap();
        assert_eq!(out.bytes, bytes);
        assert_eq!(out.id, id);
    }

    #[test]
    fn large_files_are_downscaled() {
        let settings = config::Upload::default();
        let bytes = noisy_jpeg(1600, 1200);
        assert!(bytes.len() as u64 > 2 * MIB);
        let file = SelectedFile::with_type("big.jpg", "image/jpeg", bytes.clone());

        let out = compress_if_needed(file, &settings).unwrap();
        assert_ne!(out.bytes, bytes);
        assert_eq!(out.name, "big.jpg");
        assert_eq!(out.content_type, mime::IMAGE_JPEG);
        assert_eq!(out.size, out.bytes.len() as u64);

        let decoded = image::load(Cursor::new(&out.bytes), ImageFormat::Jpeg).unwrap();
        let (width, height) = decoded.dimensions();
        assert!(width <= 1440 && height <= 1080);
        assert_eq!((width, height), (1440, 1080));
    }

    #[test]
    fn undecodable_large_file_fails() {
        let settings = config::Upload::default();
        let file = SelectedFile::with_type("broken.jpg", "image/jpeg", vec![1u8; 3 * MIB as usize]);
        let err = compress_if_needed(file, &settings).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ImageError(_)));
    }

    #[test]
    fn png_keeps_its_type() {
        let settings = config::Upload {
            compress_threshold: 0,
            ..Default::default()
        };
        let mut bytes = vec![];
        DynamicImage::ImageRgb8(RgbImage::new(2000, 100))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let file = SelectedFile::with_type("wide.png", "image/png", bytes);

        let out = compress_if_needed(file, &settings).unwrap();
        let decoded = image::load(Cursor::new(&out.bytes), ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (1440, 72));
    }
}
