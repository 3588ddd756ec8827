// lib.rs
//
// imgsqueeze: an encoding decision engine.
//
// Given source image bytes and a loosely-typed set of caller options, decide
// the output format, quality and transforms, then produce encoded bytes,
// optionally searching quality to land near a requested byte size.

// jemalloc is not supported on Windows/MSVC
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod codecs;
pub mod engine;
pub mod error;
pub mod ops;
pub mod request;

use image::ImageReader;
use std::io::Cursor;

pub use engine::{Codec, EncodedResult, Engine, EngineConfig, JobLimits, NativeCodec};
pub use error::{ErrorCategory, Result, SqueezeError};
pub use ops::{Background, OutputFormat, Preset, Quality, RequestedFormat, ResizeFit};
pub use request::{EncodeRequest, EncodeRequestBuilder, FieldValue, RawOptions};

/// Encode one request with a default engine (no job limits).
pub fn encode(request: &EncodeRequest) -> Result<EncodedResult> {
    Engine::default().encode(request)
}

/// Header-only facts about a source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    pub orientation: Option<u16>,
}

/// Read dimensions, container format and EXIF orientation without decoding pixels.
pub fn inspect(data: &[u8]) -> Result<InspectMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| SqueezeError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().map(|f| format!("{f:?}").to_lowercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| SqueezeError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(InspectMetadata {
        width,
        height,
        format,
        orientation: engine::detect_exif_orientation(data),
    })
}

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Input containers the native codec can decode.
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpeg", "png", "webp", "gif", "tiff"]
}

/// Output formats the engine can produce.
pub fn supported_output_formats() -> Vec<&'static str> {
    OutputFormat::ALL.iter().map(OutputFormat::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    #[test]
    fn test_inspect_reads_header() {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(12, 7))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        let meta = inspect(&buf).unwrap();
        assert_eq!((meta.width, meta.height), (12, 7));
        assert_eq!(meta.format.as_deref(), Some("png"));
        assert_eq!(meta.orientation, None);
        assert!(inspect(b"not an image").is_err());
    }

    #[test]
    fn test_supported_formats() {
        assert_eq!(supported_output_formats().len(), 6);
        assert!(supported_output_formats().contains(&"avif"));
        assert!(!supported_input_formats().contains(&"avif"));
        assert!(!version().is_empty());
    }
}
