// src/engine/encoder.rs
//
// Single-pass encoder: JPEG (mozjpeg), PNG (quantize + oxipng), WebP (libwebp),
// AVIF (libavif), TIFF (LZW) and GIF, at one fixed quality.

use crate::codecs::avif::{AvifEncoder, AvifImage, AvifSettings};
use crate::engine::common::run_with_panic_policy;
use crate::engine::io::{embed_metadata, ImageMetadata};
use crate::error::SqueezeError;
use crate::ops::OutputFormat;
use color_quant::NeuQuant;
use image::codecs::gif::GifEncoder;
use image::{DynamicImage, Frame, GenericImageView, ImageFormat, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};

use crate::engine::MAX_DIMENSION;

type EncoderResult<T> = std::result::Result<T, SqueezeError>;

/// WebP effort level (libwebp `method`, 0-6).
pub const WEBP_METHOD: i32 = 5;
/// AVIF effort level (libavif `speed`, 0 slowest - 10 fastest).
pub const AVIF_SPEED: i32 = 6;
/// oxipng preset used for every PNG; 6 is the strongest non-zopfli level.
pub const PNG_OXIPNG_PRESET: u8 = 6;

/// Request toggles that affect the encoder, independent of quality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeFlags {
    pub lossless: bool,
    pub progressive: bool,
}

/// Fully-resolved per-format encoder options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatOptions {
    Jpeg { quality: u8, progressive: bool },
    Png { quality: u8 },
    WebP { quality: u8, lossless: bool },
    Avif { quality: u8 },
    Tiff,
    Gif,
}

impl FormatOptions {
    /// The one place where a resolved format becomes encoder options.
    pub fn new(format: OutputFormat, quality: u8, flags: EncodeFlags) -> Self {
        let quality = quality.clamp(1, 100);
        match format {
            OutputFormat::Jpeg => Self::Jpeg {
                quality,
                progressive: flags.progressive,
            },
            OutputFormat::Png => Self::Png { quality },
            OutputFormat::WebP => Self::WebP {
                quality,
                lossless: flags.lossless,
            },
            OutputFormat::Avif => Self::Avif { quality },
            OutputFormat::Tiff => Self::Tiff,
            OutputFormat::Gif => Self::Gif,
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            Self::Jpeg { .. } => OutputFormat::Jpeg,
            Self::Png { .. } => OutputFormat::Png,
            Self::WebP { .. } => OutputFormat::WebP,
            Self::Avif { .. } => OutputFormat::Avif,
            Self::Tiff => OutputFormat::Tiff,
            Self::Gif => OutputFormat::Gif,
        }
    }

    /// Quality the encoder will actually use, if it uses one.
    pub fn quality(&self) -> Option<u8> {
        match self {
            Self::Jpeg { quality, .. }
            | Self::Png { quality }
            | Self::WebP { quality, .. }
            | Self::Avif { quality } => Some(*quality),
            Self::Tiff | Self::Gif => None,
        }
    }
}

/// Encode `img` with `options`, then embed retained metadata where the container allows.
pub fn encode_with_options(
    img: &DynamicImage,
    options: &FormatOptions,
    metadata: &ImageMetadata,
) -> EncoderResult<Vec<u8>> {
    let encoded = match *options {
        FormatOptions::Jpeg {
            quality,
            progressive,
        } => encode_jpeg(img, quality, progressive)?,
        FormatOptions::Png { quality } => encode_png(img, quality)?,
        FormatOptions::WebP { quality, lossless } => encode_webp(img, quality, lossless)?,
        FormatOptions::Avif { quality } => return encode_avif(img, quality, metadata.icc.as_deref()),
        FormatOptions::Tiff => return encode_tiff(img),
        FormatOptions::Gif => return encode_gif(img),
    };
    embed_metadata(encoded, options.format(), metadata)
}

/// Encode to JPEG using mozjpeg. Huffman optimization is always on; progressive
/// scans (with scan optimization) only when requested.
pub fn encode_jpeg(img: &DynamicImage, quality: u8, progressive: bool) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let quality = quality.clamp(1, 100);

        // Zero-copy when already RGB8
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(SqueezeError::encode_failed(
                "jpeg",
                "width or height is zero",
            ));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(SqueezeError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }
        if pixels.len() != (w as usize) * (h as usize) * 3 {
            return Err(SqueezeError::corrupted_image());
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        if progressive {
            // re-runs jpeg_set_defaults; must come before the settings below
            comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
            comp.set_progressive_mode();
            comp.set_optimize_scans(true);
        }
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_optimize_coding(true);
        if !progressive {
            // max-compression profile without its progressive scan script
            comp.set_optimize_scans(false);
        }

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                SqueezeError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    SqueezeError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                SqueezeError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Palette size for lossy PNG, or `None` for lossless output at quality 100.
pub fn png_palette_size(quality: u8) -> Option<usize> {
    if quality >= 100 {
        return None;
    }
    let colors = (quality as f32 * 256.0 / 100.0).round() as usize;
    Some(colors.clamp(16, 256))
}

/// Map every pixel to its nearest entry in a NeuQuant palette.
fn quantize_rgba(rgba: &RgbaImage, colors: usize) -> RgbaImage {
    let nq = NeuQuant::new(10, colors, rgba.as_raw());
    let palette = nq.color_map_rgba();
    let mut quantized = rgba.clone();
    for px in quantized.chunks_exact_mut(4) {
        let idx = nq.index_of(px) * 4;
        if let Some(entry) = palette.get(idx..idx + 4) {
            px.copy_from_slice(entry);
        }
    }
    quantized
}

/// Encode to PNG: palette-quantize below quality 100, then run oxipng at
/// maximum effort with palette and color-type reduction.
pub fn encode_png(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let (w, h) = img.dimensions();
        let source: Cow<'_, DynamicImage> = match png_palette_size(quality) {
            Some(colors) if (w as usize) * (h as usize) > colors => Cow::Owned(
                DynamicImage::ImageRgba8(quantize_rgba(&img.to_rgba8(), colors)),
            ),
            _ => Cow::Borrowed(img),
        };

        let mut buf = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| SqueezeError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(PNG_OXIPNG_PRESET);
        options.palette_reduction = true;
        options.color_type_reduction = true;
        // Metadata is embedded afterwards by io::embed_metadata
        options.strip = oxipng::StripChunks::None;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            SqueezeError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// WebP spatial noise shaping / filter strength follow the quality band.
fn webp_sns_strength(quality: u8) -> i32 {
    match quality {
        85.. => 50,
        70..=84 => 70,
        _ => 80,
    }
}

fn webp_filter_strength(quality: u8) -> i32 {
    match quality {
        80.. => 20,
        60..=79 => 30,
        _ => 40,
    }
}

/// Encode to WebP with libwebp. `lossless` replaces the quality-driven lossy path.
pub fn encode_webp(img: &DynamicImage, quality: u8, lossless: bool) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = img.dimensions();
        // Only carry an alpha plane when the source actually has one
        let has_alpha = img.color().has_alpha();
        let pixels: Cow<'_, [u8]> = match img {
            DynamicImage::ImageRgb8(rgb) => Cow::Borrowed(rgb.as_raw().as_slice()),
            DynamicImage::ImageRgba8(rgba) => Cow::Borrowed(rgba.as_raw().as_slice()),
            _ if has_alpha => Cow::Owned(img.to_rgba8().into_raw()),
            _ => Cow::Owned(img.to_rgb8().into_raw()),
        };
        let encoder = if has_alpha {
            webp::Encoder::from_rgba(&pixels, w, h)
        } else {
            webp::Encoder::from_rgb(&pixels, w, h)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| SqueezeError::internal_panic("failed to create WebPConfig"))?;

        config.quality = quality.clamp(1, 100) as f32;
        config.method = WEBP_METHOD;
        if lossless {
            config.lossless = 1;
            config.exact = 1;
        } else {
            config.pass = 1;
            config.sns_strength = webp_sns_strength(quality);
            config.autofilter = 1;
            config.filter_strength = webp_filter_strength(quality);
        }

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            SqueezeError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;

        Ok(mem.to_vec())
    })
}

/// Encode to AVIF with libavif at a fixed mid effort level. ICC is embedded natively.
pub fn encode_avif(img: &DynamicImage, quality: u8, icc: Option<&[u8]>) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:avif", || {
        let (width, height) = img.dimensions();
        let has_alpha = img.color().has_alpha();

        let rgba: Cow<'_, RgbaImage> = match img {
            DynamicImage::ImageRgba8(rgba_img) => Cow::Borrowed(rgba_img),
            _ => Cow::Owned(img.to_rgba8()),
        };

        let mut image = AvifImage::new_srgb_420(width, height)?;
        if let Some(icc) = icc {
            image.set_icc_profile(icc)?;
        }
        image.fill_from_rgba(rgba.as_raw(), has_alpha)?;

        let max_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(2, 8) as i32;

        let mut encoder = AvifEncoder::new(AvifSettings {
            quality: quality.clamp(1, 100),
            speed: AVIF_SPEED,
            max_threads,
        })?;
        encoder.encode_single(&image)
    })
}

/// Encode to TIFF with LZW compression. Quality has no effect on LZW.
pub fn encode_tiff(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:tiff", || {
        let (w, h) = img.dimensions();
        let tiff_err =
            |e: tiff::TiffError| SqueezeError::encode_failed("tiff", format!("TIFF encode failed: {e}"));

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).map_err(tiff_err)?;
            if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                encoder
                    .write_image_with_compression::<colortype::RGBA8, _>(
                        w,
                        h,
                        Lzw::default(),
                        rgba.as_raw(),
                    )
                    .map_err(tiff_err)?;
            } else {
                let rgb = img.to_rgb8();
                encoder
                    .write_image_with_compression::<colortype::RGB8, _>(
                        w,
                        h,
                        Lzw::default(),
                        rgb.as_raw(),
                    )
                    .map_err(tiff_err)?;
            }
        }
        Ok(cursor.into_inner())
    })
}

/// Encode a single GIF frame. Quality is ignored; the palette comes from the encoder.
pub fn encode_gif(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:gif", || {
        let mut buf = Vec::new();
        {
            // Dropping the encoder writes the GIF trailer
            let mut encoder = GifEncoder::new_with_speed(&mut buf, 10);
            encoder
                .encode_frame(Frame::new(img.to_rgba8()))
                .map_err(|e| SqueezeError::encode_failed("gif", format!("GIF encode failed: {e}")))?;
        }
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::test_support::minimal_icc;
    use image::RgbImage;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, (x % 2 * 255) as u8])
        }))
    }

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// Walk JPEG segments up to the first SOFn marker.
    fn jpeg_frame_marker(jpeg: &[u8]) -> Option<u8> {
        let mut pos = 2;
        while pos + 4 <= jpeg.len() {
            if jpeg[pos] != 0xFF {
                return None;
            }
            let marker = jpeg[pos + 1];
            if (0xC0..=0xCF).contains(&marker) && ![0xC4, 0xC8, 0xCC].contains(&marker) {
                return Some(marker);
            }
            let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
            pos += 2 + len;
        }
        None
    }

    /// First 8-bit quantization table with destination 0, in zigzag order.
    fn jpeg_luma_table(jpeg: &[u8]) -> Option<Vec<u8>> {
        let mut pos = 2;
        while pos + 4 <= jpeg.len() {
            if jpeg[pos] != 0xFF {
                return None;
            }
            let marker = jpeg[pos + 1];
            let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
            if marker == 0xDA {
                return None;
            }
            if marker == 0xDB {
                let end = (pos + 2 + len).min(jpeg.len());
                let mut table = pos + 4;
                while table < end {
                    let precision = jpeg[table] >> 4;
                    let destination = jpeg[table] & 0x0F;
                    let size = if precision == 0 { 64 } else { 128 };
                    if destination == 0 && precision == 0 && table + 1 + size <= end {
                        return Some(jpeg[table + 1..table + 1 + size].to_vec());
                    }
                    table += 1 + size;
                }
            }
            pos += 2 + len;
        }
        None
    }

    mod options_tests {
        use super::*;

        #[test]
        fn test_format_options_cover_every_format() {
            let flags = EncodeFlags {
                lossless: true,
                progressive: true,
            };
            for format in OutputFormat::ALL {
                assert_eq!(FormatOptions::new(format, 70, flags).format(), format);
            }
            assert_eq!(
                FormatOptions::new(OutputFormat::Jpeg, 70, flags),
                FormatOptions::Jpeg {
                    quality: 70,
                    progressive: true
                }
            );
            assert_eq!(
                FormatOptions::new(OutputFormat::WebP, 0, flags),
                FormatOptions::WebP {
                    quality: 1,
                    lossless: true
                }
            );
            assert_eq!(FormatOptions::new(OutputFormat::Gif, 70, flags).quality(), None);
            assert_eq!(FormatOptions::new(OutputFormat::Tiff, 70, flags).quality(), None);
        }

        #[test]
        fn test_png_palette_size_mapping() {
            assert_eq!(png_palette_size(100), None);
            assert_eq!(png_palette_size(99), Some(253));
            assert_eq!(png_palette_size(50), Some(128));
            assert_eq!(png_palette_size(1), Some(16));
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_encode_jpeg_produces_valid_jpeg() {
            let img = create_test_image(100, 100);
            let result = encode_jpeg(&img, 80, false).unwrap();
            assert_eq!(&result[0..2], &[0xFF, 0xD8]);
            assert_eq!(&result[result.len() - 2..], &[0xFF, 0xD9]);
        }

        #[test]
        fn test_encode_jpeg_progressive_has_sof2() {
            let img = create_test_image(64, 64);
            let progressive = encode_jpeg(&img, 80, true).unwrap();
            let baseline = encode_jpeg(&img, 80, false).unwrap();
            assert_eq!(jpeg_frame_marker(&progressive), Some(0xC2));
            assert_ne!(jpeg_frame_marker(&baseline), Some(0xC2));
        }

        #[test]
        fn test_encode_jpeg_quality_affects_size() {
            let img = create_test_image(200, 200);
            for progressive in [false, true] {
                let high = encode_jpeg(&img, 95, progressive).unwrap();
                let low = encode_jpeg(&img, 30, progressive).unwrap();
                assert!(high.len() > low.len(), "progressive={progressive}");
            }
        }

        #[test]
        fn test_encode_jpeg_progressive_quality_changes_tables() {
            let img = create_test_image(128, 128);
            let low = encode_jpeg(&img, 30, true).unwrap();
            let high = encode_jpeg(&img, 95, true).unwrap();
            assert_ne!(jpeg_luma_table(&low), jpeg_luma_table(&high));
        }

        #[test]
        fn test_encode_jpeg_baseline_keeps_max_compression_profile() {
            let img = create_test_image(256, 256);
            let baseline = encode_jpeg(&img, 75, false).unwrap();
            let progressive = encode_jpeg(&img, 75, true).unwrap();
            assert_eq!(jpeg_frame_marker(&baseline), Some(0xC0));
            assert!(jpeg_luma_table(&baseline).is_some());
            assert_eq!(jpeg_luma_table(&baseline), jpeg_luma_table(&progressive));
            // same tables and trellis; only the scan script differs
            assert!(baseline.len() * 4 < progressive.len() * 5);
        }

        #[test]
        fn test_encode_png_lossless_and_quantized() {
            let img = create_test_image(64, 64);
            let lossless = encode_png(&img, 100).unwrap();
            let quantized = encode_png(&img, 20).unwrap();
            assert_eq!(&lossless[0..8], &PNG_MAGIC);
            assert_eq!(&quantized[0..8], &PNG_MAGIC);

            let decoded = image::load_from_memory(&lossless).unwrap().to_rgb8();
            assert_eq!(decoded.as_raw(), img.to_rgb8().as_raw());
        }

        #[test]
        fn test_encode_webp_produces_valid_webp() {
            let img = create_test_image(100, 100);
            for lossless in [false, true] {
                let result = encode_webp(&img, 80, lossless).unwrap();
                assert_eq!(&result[0..4], b"RIFF");
                assert_eq!(&result[8..12], b"WEBP");
            }
        }

        #[test]
        fn test_encode_webp_lossless_is_exact() {
            let img = create_test_image(32, 32);
            let result = encode_webp(&img, 75, true).unwrap();
            let decoded = image::load_from_memory(&result).unwrap().to_rgb8();
            assert_eq!(decoded.as_raw(), img.to_rgb8().as_raw());
        }

        #[test]
        fn test_encode_avif_produces_valid_avif() {
            let img = create_test_image(64, 64);
            let result = encode_avif(&img, 60, Some(&minimal_icc())).unwrap();
            assert!(result.len() > 12);
            assert_eq!(&result[4..8], b"ftyp");
        }

        #[test]
        fn test_encode_tiff_and_gif() {
            let img = create_test_image_rgba(40, 30);
            let tiff = encode_tiff(&img).unwrap();
            assert!(tiff.starts_with(b"II*\0") || tiff.starts_with(b"MM\0*"));
            let decoded = image::load_from_memory(&tiff).unwrap();
            assert_eq!(decoded.dimensions(), (40, 30));

            let gif = encode_gif(&img).unwrap();
            assert!(gif.starts_with(b"GIF8"));
            assert_eq!(gif.last(), Some(&0x3B));
        }

        #[test]
        fn test_encode_rgba_image_to_opaque_formats() {
            let img = create_test_image_rgba(50, 50);
            let jpeg = encode_jpeg(&img, 80, false).unwrap();
            assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
            let webp = encode_webp(&img, 80, false).unwrap();
            assert_eq!(&webp[8..12], b"WEBP");
        }

        #[test]
        fn test_encode_with_options_embeds_icc() {
            let img = create_test_image(32, 32);
            let metadata = ImageMetadata {
                icc: Some(minimal_icc()),
                ..Default::default()
            };
            let options = FormatOptions::new(OutputFormat::Jpeg, 80, EncodeFlags::default());
            let out = encode_with_options(&img, &options, &metadata).unwrap();
            assert!(out.windows(12).any(|w| w == b"ICC_PROFILE\0"));
        }

        #[test]
        fn test_non_search_encode_is_deterministic() {
            let img = create_test_image(120, 80);
            for options in [
                FormatOptions::new(OutputFormat::Jpeg, 75, EncodeFlags::default()),
                FormatOptions::new(OutputFormat::WebP, 75, EncodeFlags::default()),
            ] {
                let a = encode_with_options(&img, &options, &ImageMetadata::default()).unwrap();
                let b = encode_with_options(&img, &options, &ImageMetadata::default()).unwrap();
                assert_eq!(a, b);
            }
        }
    }
}
