// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp),
// GIF/TIFF via the image crate. Also reads the EXIF orientation used by auto-orient.

use crate::engine::common::run_with_panic_policy;
use crate::error::SqueezeError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};

type DecoderResult<T> = std::result::Result<T, SqueezeError>;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(SqueezeError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            SqueezeError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            SqueezeError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(SqueezeError::dimension_exceeds_limit(
                width.max(height) as u32,
                MAX_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            SqueezeError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image =
            RgbImage::from_raw(width_u32, height_u32, flat_pixels).ok_or_else(|| {
                SqueezeError::decode_failed("mozjpeg: failed to create image from raw data")
            })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Decode remaining formats (GIF first frame, TIFF) with the image crate.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| SqueezeError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| SqueezeError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| SqueezeError::decode_failed("png: missing header info"))?;

        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(SqueezeError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| SqueezeError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| SqueezeError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| SqueezeError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| SqueezeError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| SqueezeError::decode_failed("png: failed to build LumaA image"))?,
            other => {
                return Err(SqueezeError::decode_failed(format!(
                    "png: unsupported colorspace {:?}",
                    other
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated files fall back to the image crate (first frame).
pub fn decode_webp_libwebp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            SqueezeError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                SqueezeError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| SqueezeError::decode_failed("webp: decode failed"))?;

        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Unified decode entrypoint: detect once, then route to the fastest decoder we carry.
pub fn decode_image(bytes: &[u8]) -> DecoderResult<(DynamicImage, Option<ImageFormat>)> {
    let detected = detect_format(bytes);
    let img = match detected {
        Some(ImageFormat::Jpeg) => decode_jpeg_mozjpeg(bytes)?,
        Some(ImageFormat::Png) => decode_png_zune(bytes)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes)?,
        Some(ImageFormat::Gif) | Some(ImageFormat::Tiff) => decode_with_image_crate(bytes)?,
        // libavif is built encode-only (rav1e), so AVIF input has no decoder
        Some(other) => {
            return Err(SqueezeError::unsupported_format(format!(
                "{other:?} input is not supported"
            )))
        }
        None => return Err(SqueezeError::decode_failed("unrecognized image data")),
    };
    Ok((img, detected))
}

/// Check if image dimensions are within safe limits.
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(SqueezeError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(SqueezeError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Read dimensions from the header without decoding pixels.
pub fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    (1..=8).contains(&orientation).then_some(orientation)
}
