// src/engine/io.rs
//
// Metadata carriage: ICC/EXIF extraction from the source container and
// re-embedding into JPEG/PNG/WebP output via img-parts.

use crate::engine::common::run_with_panic_policy;
use crate::error::SqueezeError;
use crate::ops::OutputFormat;
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::webp::WebP;
use img_parts::{Bytes, DynImage, ImageEXIF, ImageICC};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use tracing::warn;

type IoResult<T> = std::result::Result<T, SqueezeError>;

/// Metadata retained from the source for re-embedding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub icc: Option<Vec<u8>>,
    pub exif: Option<Vec<u8>>,
    /// Pixels were re-oriented, so a carried Orientation tag must become 1.
    pub reset_orientation: bool,
}

impl ImageMetadata {
    pub fn is_empty(&self) -> bool {
        self.icc.is_none() && self.exif.is_none()
    }
}

/// Extract ICC and EXIF from a JPEG, PNG or WebP container. Other inputs carry nothing.
pub fn extract_metadata(data: &[u8]) -> ImageMetadata {
    let image = match DynImage::from_bytes(Bytes::copy_from_slice(data)) {
        Ok(Some(image)) => image,
        _ => return ImageMetadata::default(),
    };
    ImageMetadata {
        icc: image
            .icc_profile()
            .map(|icc| icc.to_vec())
            .filter(|icc| validate_icc_profile(icc)),
        exif: image.exif().map(|exif| exif.to_vec()).filter(|e| !e.is_empty()),
        reset_orientation: false,
    }
}

/// ICC profiles start with a 128-byte header whose size field matches the payload.
pub(crate) fn validate_icc_profile(icc_data: &[u8]) -> bool {
    if icc_data.len() < 128 {
        return false;
    }

    let profile_size =
        u32::from_be_bytes([icc_data[0], icc_data[1], icc_data[2], icc_data[3]]) as usize;
    if profile_size != icc_data.len() {
        return false;
    }

    // Major version should be reasonable (typically 2, 4, or 5)
    if icc_data[8] > 10 {
        return false;
    }

    // CMM type, profile class, data color space and PCS are ASCII signatures
    let ascii = |range: std::ops::Range<usize>| {
        icc_data[range]
            .iter()
            .all(|&b| (32..=126).contains(&b) || b == 0)
    };
    ascii(4..8) && ascii(12..16) && ascii(16..20) && ascii(20..24)
}

/// Embed retained metadata into an encoded JPEG/PNG/WebP buffer.
/// Other formats are returned unchanged.
pub fn embed_metadata(
    encoded: Vec<u8>,
    format: OutputFormat,
    metadata: &ImageMetadata,
) -> IoResult<Vec<u8>> {
    if metadata.is_empty() {
        return Ok(encoded);
    }

    // PNG EXIF orientation cannot be rewritten, so it is only carried when unchanged.
    let carry_exif = !(metadata.reset_orientation && format == OutputFormat::Png);
    let exif = metadata.exif.as_deref().filter(|_| carry_exif);

    let with_parts = write_parts(encoded, format, metadata.icc.as_deref(), exif)?;
    if exif.is_none() || !metadata.reset_orientation {
        return Ok(with_parts);
    }

    match reset_orientation(&with_parts, format) {
        Ok(updated) => Ok(updated),
        Err(e) => {
            warn!(format = %format, error = %e, "orientation reset failed; dropping EXIF");
            write_parts(with_parts, format, metadata.icc.as_deref(), None)
        }
    }
}

fn write_parts(
    encoded: Vec<u8>,
    format: OutputFormat,
    icc: Option<&[u8]>,
    exif: Option<&[u8]>,
) -> IoResult<Vec<u8>> {
    let icc = icc.map(|b| Bytes::copy_from_slice(b));
    let exif = exif.map(|b| Bytes::copy_from_slice(b));
    let label = format.as_str();

    run_with_panic_policy("encode:embed_metadata", || {
        let parse_err = |e: img_parts::Error| {
            SqueezeError::encode_failed(label, format!("failed to parse output for metadata: {e}"))
        };
        let write_err = |e: std::io::Error| {
            SqueezeError::encode_failed(label, format!("failed to write metadata: {e}"))
        };

        let mut output = Vec::with_capacity(encoded.len() + 1024);
        match format {
            OutputFormat::Jpeg => {
                let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded)).map_err(parse_err)?;
                jpeg.set_icc_profile(icc);
                jpeg.set_exif(exif);
                jpeg.encoder().write_to(&mut output).map_err(write_err)?;
            }
            OutputFormat::Png => {
                let mut png = Png::from_bytes(Bytes::from(encoded)).map_err(parse_err)?;
                png.set_icc_profile(icc);
                png.set_exif(exif);
                png.encoder().write_to(&mut output).map_err(write_err)?;
            }
            OutputFormat::WebP => {
                let mut webp = WebP::from_bytes(Bytes::from(encoded)).map_err(parse_err)?;
                webp.set_icc_profile(icc);
                webp.set_exif(exif);
                webp.encoder().write_to(&mut output).map_err(write_err)?;
            }
            OutputFormat::Avif | OutputFormat::Tiff | OutputFormat::Gif => return Ok(encoded),
        }
        Ok(output)
    })
}

fn little_exif_type(format: OutputFormat) -> Option<FileExtension> {
    match format {
        OutputFormat::Jpeg => Some(FileExtension::JPEG),
        OutputFormat::WebP => Some(FileExtension::WEBP),
        _ => None,
    }
}

/// Rewrite the Orientation tag of an encoded buffer to 1 (top-left).
fn reset_orientation(encoded: &[u8], format: OutputFormat) -> std::io::Result<Vec<u8>> {
    let (Some(read_as), Some(write_as)) = (little_exif_type(format), little_exif_type(format))
    else {
        return Ok(encoded.to_vec());
    };
    let mut buffer = encoded.to_vec();
    let mut exif = Metadata::new_from_vec(&buffer, read_as)?;
    exif.set_tag(ExifTag::Orientation(vec![1]));
    exif.write_to_vec(&mut buffer, write_as)?;
    Ok(buffer)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn plain(format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10])))
            .write_to(&mut Cursor::new(&mut buf), format)
            .unwrap();
        buf
    }

    #[test]
    fn test_validate_icc_profile() {
        assert!(validate_icc_profile(&minimal_icc()));
        assert!(!validate_icc_profile(&[0u8; 64]));
        let mut wrong_size = minimal_icc();
        wrong_size[3] = 0x81;
        assert!(!validate_icc_profile(&wrong_size));
    }

    #[test]
    fn test_extract_nothing_from_plain_png() {
        let meta = extract_metadata(&plain(ImageFormat::Png));
        assert!(meta.is_empty());
        assert!(extract_metadata(b"garbage").is_empty());
    }

    #[test]
    fn test_icc_and_exif_round_trip_through_jpeg() {
        let meta = ImageMetadata {
            icc: Some(minimal_icc()),
            exif: Some(exif_with_orientation(1)),
            reset_orientation: false,
        };
        let out = embed_metadata(plain(ImageFormat::Jpeg), OutputFormat::Jpeg, &meta).unwrap();
        assert_eq!(&out[0..2], &[0xFF, 0xD8]);
        let back = extract_metadata(&out);
        assert_eq!(back.icc, meta.icc);
        assert_eq!(back.exif, meta.exif);
    }

    #[test]
    fn test_png_drops_exif_when_orientation_changed() {
        let meta = ImageMetadata {
            icc: Some(minimal_icc()),
            exif: Some(exif_with_orientation(6)),
            reset_orientation: true,
        };
        let out = embed_metadata(plain(ImageFormat::Png), OutputFormat::Png, &meta).unwrap();
        let back = extract_metadata(&out);
        assert_eq!(back.icc, meta.icc);
        assert_eq!(back.exif, None);
    }

    #[test]
    fn test_jpeg_orientation_never_survives_reset() {
        let meta = ImageMetadata {
            icc: None,
            exif: Some(exif_with_orientation(6)),
            reset_orientation: true,
        };
        let out = embed_metadata(plain(ImageFormat::Jpeg), OutputFormat::Jpeg, &meta).unwrap();
        let orientation = crate::engine::decoder::detect_exif_orientation(&out).unwrap_or(1);
        assert_eq!(orientation, 1);
    }

    #[test]
    fn test_formats_without_container_support_pass_through() {
        let meta = ImageMetadata {
            icc: Some(minimal_icc()),
            exif: None,
            reset_orientation: false,
        };
        let tiff = plain(ImageFormat::Tiff);
        assert_eq!(
            embed_metadata(tiff.clone(), OutputFormat::Tiff, &meta).unwrap(),
            tiff
        );
    }
}
