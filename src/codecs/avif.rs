// src/codecs/avif.rs
//
// RAII wrappers over the libavif encoder FFI. Every raw pointer is owned by
// exactly one wrapper and released in Drop, including on unwind.
#![deny(unsafe_op_in_unsafe_fn)]

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::SqueezeError;
use libavif_sys::*;
use std::ptr::NonNull;

type AvifResult<T> = std::result::Result<T, SqueezeError>;

fn avif_error(what: &str, code: avifResult) -> SqueezeError {
    SqueezeError::encode_failed("avif", format!("{what} failed: {code:?}"))
}

fn check(what: &str, code: avifResult) -> AvifResult<()> {
    if code == AVIF_RESULT_OK {
        Ok(())
    } else {
        Err(avif_error(what, code))
    }
}

fn validate_dimensions(width: u32, height: u32) -> AvifResult<()> {
    if width == 0 || height == 0 {
        return Err(SqueezeError::encode_failed(
            "avif",
            format!("dimensions must be non-zero ({width}x{height})"),
        ));
    }
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

/// Owned `avifImage`.
pub struct AvifImage {
    ptr: NonNull<avifImage>,
    width: u32,
    height: u32,
}

impl AvifImage {
    /// 8-bit YUV 4:2:0 image tagged as full-range BT.709 / sRGB.
    pub fn new_srgb_420(width: u32, height: u32) -> AvifResult<Self> {
        validate_dimensions(width, height)?;
        let raw = unsafe { avifImageCreate(width, height, 8, AVIF_PIXEL_FORMAT_YUV420) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| SqueezeError::encode_failed("avif", "avifImageCreate returned null"))?;
        unsafe {
            let image = ptr.as_ptr();
            (*image).colorPrimaries = AVIF_COLOR_PRIMARIES_BT709 as _;
            (*image).transferCharacteristics = AVIF_TRANSFER_CHARACTERISTICS_SRGB as _;
            (*image).matrixCoefficients = AVIF_MATRIX_COEFFICIENTS_BT709 as _;
            (*image).yuvRange = AVIF_RANGE_FULL;
        }
        Ok(Self { ptr, width, height })
    }

    pub fn set_icc_profile(&mut self, icc: &[u8]) -> AvifResult<()> {
        let code = unsafe { avifImageSetProfileICC(self.ptr.as_ptr(), icc.as_ptr(), icc.len()) };
        check("avifImageSetProfileICC", code)
    }

    /// Convert tightly packed RGBA8 pixels into the image's YUV (and alpha) planes.
    pub fn fill_from_rgba(&mut self, rgba: &[u8], keep_alpha: bool) -> AvifResult<()> {
        let row_bytes = self.width.checked_mul(4).ok_or_else(|| {
            SqueezeError::encode_failed("avif", "row bytes overflow for RGBA image")
        })?;
        let expected = row_bytes as usize * self.height as usize;
        if rgba.len() != expected {
            return Err(SqueezeError::corrupted_image());
        }

        let planes = if keep_alpha {
            AVIF_PLANES_YUV | AVIF_PLANES_A
        } else {
            AVIF_PLANES_YUV
        };
        let code = unsafe { avifImageAllocatePlanes(self.ptr.as_ptr(), planes as _) };
        check("avifImageAllocatePlanes", code)?;

        let mut rgb: avifRGBImage = unsafe { std::mem::zeroed() };
        unsafe {
            avifRGBImageSetDefaults(&mut rgb, self.ptr.as_ptr());
        }
        rgb.format = AVIF_RGB_FORMAT_RGBA;
        rgb.depth = 8;
        // libavif only reads from the RGB buffer during conversion
        rgb.pixels = rgba.as_ptr() as *mut u8;
        rgb.rowBytes = row_bytes;
        rgb.ignoreAlpha = if keep_alpha { AVIF_FALSE as _ } else { AVIF_TRUE as _ };

        let code = unsafe { avifImageRGBToYUV(self.ptr.as_ptr(), &rgb) };
        check("avifImageRGBToYUV", code)
    }
}

impl Drop for AvifImage {
    fn drop(&mut self) {
        unsafe { avifImageDestroy(self.ptr.as_ptr()) };
    }
}

/// Encoder knobs exposed to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AvifSettings {
    pub quality: u8,
    pub speed: i32,
    pub max_threads: i32,
}

/// Owned `avifEncoder`.
pub struct AvifEncoder {
    ptr: NonNull<avifEncoder>,
}

impl AvifEncoder {
    pub fn new(settings: AvifSettings) -> AvifResult<Self> {
        let raw = unsafe { avifEncoderCreate() };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            SqueezeError::encode_failed("avif", "avifEncoderCreate returned null")
        })?;
        let quality = settings.quality.min(100) as i32;
        unsafe {
            let encoder = ptr.as_ptr();
            (*encoder).quality = quality;
            (*encoder).qualityAlpha = quality;
            (*encoder).speed = settings.speed;
            (*encoder).maxThreads = settings.max_threads;
        }
        Ok(Self { ptr })
    }

    /// Encode a single still image and return the container bytes.
    pub fn encode_single(&mut self, image: &AvifImage) -> AvifResult<Vec<u8>> {
        let code = unsafe {
            avifEncoderAddImage(
                self.ptr.as_ptr(),
                image.ptr.as_ptr(),
                1,
                AVIF_ADD_IMAGE_FLAG_SINGLE as _,
            )
        };
        check("avifEncoderAddImage", code)?;

        let mut output = AvifOutput::new();
        let code = unsafe { avifEncoderFinish(self.ptr.as_ptr(), &mut output.data) };
        check("avifEncoderFinish", code)?;
        Ok(output.as_slice().to_vec())
    }
}

impl Drop for AvifEncoder {
    fn drop(&mut self) {
        unsafe { avifEncoderDestroy(self.ptr.as_ptr()) };
    }
}

/// Owned `avifRWData` output buffer.
struct AvifOutput {
    data: avifRWData,
}

impl AvifOutput {
    fn new() -> Self {
        Self {
            data: unsafe { std::mem::zeroed() },
        }
    }

    fn as_slice(&self) -> &[u8] {
        if self.data.data.is_null() || self.data.size == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.data.data, self.data.size) }
        }
    }
}

impl Drop for AvifOutput {
    fn drop(&mut self) {
        unsafe { avifRWDataFree(&mut self.data) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AvifSettings {
        AvifSettings {
            quality: 60,
            speed: 10,
            max_threads: 1,
        }
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        assert!(AvifImage::new_srgb_420(0, 10).is_err());
        assert!(AvifImage::new_srgb_420(10, 0).is_err());
    }

    #[test]
    fn test_rejects_dimension_limits() {
        let err = AvifImage::new_srgb_420(MAX_DIMENSION + 1, 1)
            .err()
            .expect("dimensions beyond limit should fail");
        assert!(matches!(err, SqueezeError::DimensionExceedsLimit { .. }));
    }

    #[test]
    fn test_fill_rejects_short_buffer() {
        let mut image = AvifImage::new_srgb_420(4, 4).unwrap();
        let err = image.fill_from_rgba(&[0u8; 10], false).unwrap_err();
        assert!(matches!(err, SqueezeError::CorruptedImage));
    }

    #[test]
    fn test_encode_single_produces_ftyp() {
        let mut image = AvifImage::new_srgb_420(16, 16).unwrap();
        let pixels = vec![128u8; 16 * 16 * 4];
        image.fill_from_rgba(&pixels, false).unwrap();
        let mut encoder = AvifEncoder::new(settings()).unwrap();
        let bytes = encoder.encode_single(&image).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }

    #[test]
    fn test_wrappers_drop_cleanly_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _image = AvifImage::new_srgb_420(2, 2).unwrap();
            let _encoder = AvifEncoder::new(settings()).unwrap();
            panic!("force unwind");
        });
        assert!(result.is_err());
    }
}
