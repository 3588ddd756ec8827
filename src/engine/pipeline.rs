// src/engine/pipeline.rs
//
// Pipeline builder and executor: auto-orient -> resize (never enlarges) -> flatten.
// Resizing runs through fast_image_resize with an image-crate fallback.

use crate::error::SqueezeError;
use crate::ops::{Background, Operation, ResizeFit};
use crate::request::EncodeRequest;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops, imageops::FilterType, DynamicImage, Rgba, RgbImage, RgbaImage};
use tracing::{debug, trace};

type PipelineResult<T> = std::result::Result<T, SqueezeError>;

/// Ordered transforms plus the metadata policy for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSpec {
    pub operations: Vec<Operation>,
    pub keep_metadata: bool,
}

impl PipelineSpec {
    /// True when the source orientation is applied to the pixels.
    pub fn reorients(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::AutoOrient { orientation } if *orientation > 1))
    }
}

/// Build the transform list for `request`. `orientation` is the source EXIF value, if any.
pub fn build_pipeline(request: &EncodeRequest, orientation: Option<u16>) -> PipelineSpec {
    let orientation = orientation.filter(|o| (1..=8).contains(o)).unwrap_or(1);
    let mut operations = vec![Operation::AutoOrient { orientation }];

    if let Some(resize) = request.resize() {
        operations.push(Operation::Resize {
            width: resize.width.map(|w| w.get()),
            height: resize.height.map(|h| h.get()),
            fit: resize.fit,
        });
    }

    if request.flatten_effective() {
        operations.push(Operation::Flatten {
            background: request.background(),
        });
    }

    PipelineSpec {
        operations,
        keep_metadata: request.keep_metadata(),
    }
}

/// Run every stage of `spec` over `img`.
pub fn apply_pipeline(img: DynamicImage, spec: &PipelineSpec) -> PipelineResult<DynamicImage> {
    let mut img = img;
    for op in &spec.operations {
        img = match *op {
            Operation::AutoOrient { orientation } => {
                trace!(orientation, "pipeline: auto-orient");
                apply_orientation(img, orientation)
            }
            Operation::Resize { width, height, fit } => {
                trace!(?width, ?height, ?fit, "pipeline: resize");
                apply_resize(img, width, height, fit)?
            }
            Operation::Flatten { background } => {
                trace!(?background, "pipeline: flatten");
                flatten(img, background)
            }
        };
    }
    Ok(img)
}

/// Apply EXIF orientation 1-8. Unknown values are treated as 1.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn scaled(dim: u32, scale: f64) -> u32 {
    ((dim as f64 * scale).round() as u32).clamp(1, dim.max(1))
}

/// Target dimensions for `Inside`: fit within the given axes, never enlarging.
pub fn calc_inside_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: Option<u32>,
    target_h: Option<u32>,
) -> (u32, u32) {
    let ratio_w = target_w.map(|w| w as f64 / orig_w as f64);
    let ratio_h = target_h.map(|h| h as f64 / orig_h as f64);
    let scale = match (ratio_w, ratio_h) {
        (Some(rw), Some(rh)) => rw.min(rh),
        (Some(r), None) | (None, Some(r)) => r,
        (None, None) => 1.0,
    }
    .min(1.0);
    if scale >= 1.0 {
        return (orig_w, orig_h);
    }
    (scaled(orig_w, scale), scaled(orig_h, scale))
}

/// Scaled dimensions for `Cover` before the centre crop.
fn calc_cover_dimensions(orig_w: u32, orig_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let scale = (target_w as f64 / orig_w as f64)
        .max(target_h as f64 / orig_h as f64)
        .min(1.0);
    if scale >= 1.0 {
        return (orig_w, orig_h);
    }
    let w = ((orig_w as f64 * scale).ceil() as u32).clamp(1, orig_w);
    let h = ((orig_h as f64 * scale).ceil() as u32).clamp(1, orig_h);
    (w, h)
}

fn crop_centered(img: DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let crop_w = target_w.min(img.width()).max(1);
    let crop_h = target_h.min(img.height()).max(1);
    if crop_w == img.width() && crop_h == img.height() {
        return img;
    }
    let x = (img.width() - crop_w) / 2;
    let y = (img.height() - crop_h) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}

fn pad_centered(img: DynamicImage, canvas_w: u32, canvas_h: u32) -> DynamicImage {
    if img.width() == canvas_w && img.height() == canvas_h {
        return img;
    }
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([0, 0, 0, 0]));
    let x = (canvas_w.saturating_sub(img.width()) / 2) as i64;
    let y = (canvas_h.saturating_sub(img.height()) / 2) as i64;
    imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

fn resize_to(img: DynamicImage, width: u32, height: u32) -> PipelineResult<DynamicImage> {
    if img.width() == width && img.height() == height {
        return Ok(img);
    }
    debug!(
        from_w = img.width(),
        from_h = img.height(),
        to_w = width,
        to_h = height,
        "resizing"
    );
    fast_resize_owned(img, width, height)
}

fn apply_resize(
    img: DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    fit: ResizeFit,
) -> PipelineResult<DynamicImage> {
    let (orig_w, orig_h) = (img.width(), img.height());
    if orig_w == 0 || orig_h == 0 {
        return Err(SqueezeError::resize_failed(
            (orig_w, orig_h),
            (width.unwrap_or(0), height.unwrap_or(0)),
            "source image has zero area",
        ));
    }

    match (fit, width, height) {
        (ResizeFit::Cover, Some(tw), Some(th)) => {
            let (w, h) = calc_cover_dimensions(orig_w, orig_h, tw, th);
            let resized = resize_to(img, w, h)?;
            Ok(crop_centered(resized, tw, th))
        }
        (ResizeFit::Contain, Some(tw), Some(th)) => {
            let (w, h) = calc_inside_dimensions(orig_w, orig_h, Some(tw), Some(th));
            let resized = resize_to(img, w, h)?;
            Ok(pad_centered(resized, tw.min(orig_w), th.min(orig_h)))
        }
        _ => {
            let (w, h) = calc_inside_dimensions(orig_w, orig_h, width, height);
            resize_to(img, w, h)
        }
    }
}

/// Composite onto an opaque background and drop alpha. Opaque images pass through.
pub fn flatten(img: DynamicImage, background: Background) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }
    let mut canvas = RgbaImage::from_pixel(img.width(), img.height(), Rgba(background.to_rgba()));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

/// Lanczos3 resize that takes ownership of the pixel buffer (zero-copy for RGB8/RGBA8).
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> PipelineResult<DynamicImage> {
    let src_width = img.width();
    let src_height = img.height();
    let fail = |reason: String| {
        SqueezeError::resize_failed((src_width, src_height), (dst_width, dst_height), reason)
    };

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(fail("invalid dimensions for resize".to_string()));
    }

    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other if other.color().has_alpha() => (PixelType::U8x4, other.to_rgba8().into_raw()),
        other => (PixelType::U8x3, other.to_rgb8().into_raw()),
    };

    resize_pixels(
        src_width, src_height, src_pixels, pixel_type, dst_width, dst_height,
    )
    .map_err(fail)
}

fn resize_pixels(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let required_bytes = (src_width as usize)
        .checked_mul(src_height as usize)
        .and_then(|n| n.checked_mul(pixel_type.size()))
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "source buffer too small: expected {required_bytes} bytes, got {}",
            src_pixels.len()
        ));
    }

    let primary = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => resize_with_fir(src_image, pixel_type, dst_width, dst_height),
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let mut aligned = fir::images::Image::new(src_width, src_height, pixel_type);
            aligned
                .buffer_mut()
                .copy_from_slice(&src_pixels[..required_bytes]);
            resize_with_fir(aligned, pixel_type, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    primary.or_else(|err| {
        resize_with_image_crate(
            &src_pixels,
            src_width,
            src_height,
            pixel_type,
            dst_width,
            dst_height,
        )
        .map_err(|fallback| format!("{err}; image crate fallback failed: {fallback}"))
    })
}

fn resize_with_fir(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);
    let premultiply = pixel_type == PixelType::U8x4;

    let mul_div = MulDiv::default();
    if premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let options =
        ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    fir::Resizer::new()
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(dst_width, dst_height, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "failed to build rgb image from resized data".to_string()),
        PixelType::U8x4 => RgbaImage::from_raw(dst_width, dst_height, pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| "failed to build rgba image from resized data".to_string()),
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}

fn resize_with_image_crate(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Lanczos3;
    match pixel_type {
        PixelType::U8x3 => {
            let rgb = RgbImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgb8(imageops::resize(
                &rgb, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgba8(imageops::resize(
                &rgba, dst_width, dst_height, filter,
            )))
        }
        _ => Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    }
}
