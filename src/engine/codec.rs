// src/engine/codec.rs
//
// The codec seam: decode + pipeline once, then encode the prepared image as
// many times as the search needs. NativeCodec is the in-crate implementation.

use crate::engine::decoder::{decode_image, detect_exif_orientation, probe_dimensions};
use crate::engine::encoder::{encode_with_options, FormatOptions};
use crate::engine::io::{extract_metadata, ImageMetadata};
use crate::engine::limits::JobLimits;
use crate::engine::pipeline::{apply_pipeline, PipelineSpec};
use crate::error::SqueezeError;
use image::{DynamicImage, GenericImageView};
use tracing::trace;

type CodecResult<T> = std::result::Result<T, SqueezeError>;

/// An image codec backend.
///
/// `build_pipeline` runs once per job; `encode_at` may run once per search
/// iteration against the same handle, so implementations must not mutate it.
pub trait Codec: Sync {
    type Handle: Send;

    /// EXIF orientation of the source, if it carries one.
    fn source_orientation(&self, bytes: &[u8]) -> Option<u16>;

    /// Decode `bytes` and apply every stage of `spec`.
    fn build_pipeline(&self, bytes: &[u8], spec: &PipelineSpec) -> CodecResult<Self::Handle>;

    /// Encode the prepared image once.
    fn encode_at(&self, handle: &Self::Handle, options: &FormatOptions) -> CodecResult<Vec<u8>>;
}

/// Decoded, transformed pixels plus whatever metadata the job retains.
#[derive(Clone, Debug)]
pub struct PreparedImage {
    pub image: DynamicImage,
    pub metadata: ImageMetadata,
}

/// Codec backed by the crate's own decoders and encoders.
#[derive(Clone, Debug, Default)]
pub struct NativeCodec {
    limits: JobLimits,
}

impl NativeCodec {
    pub fn new(limits: JobLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &JobLimits {
        &self.limits
    }
}

impl Codec for NativeCodec {
    type Handle = PreparedImage;

    fn source_orientation(&self, bytes: &[u8]) -> Option<u16> {
        detect_exif_orientation(bytes)
    }

    fn build_pipeline(&self, bytes: &[u8], spec: &PipelineSpec) -> CodecResult<PreparedImage> {
        self.limits.enforce_source_len(bytes.len())?;
        // Reject oversized inputs from the header before allocating pixels
        if let Some((w, h)) = probe_dimensions(bytes) {
            self.limits.enforce_pixels(w, h)?;
        }

        let (decoded, format) = decode_image(bytes)?;
        let (w, h) = decoded.dimensions();
        self.limits.enforce_pixels(w, h)?;
        trace!(?format, width = w, height = h, "decoded source");

        let image = apply_pipeline(decoded, spec)?;

        let metadata = if spec.keep_metadata {
            ImageMetadata {
                reset_orientation: spec.reorients(),
                ..extract_metadata(bytes)
            }
        } else {
            ImageMetadata::default()
        };

        Ok(PreparedImage { image, metadata })
    }

    fn encode_at(&self, handle: &PreparedImage, options: &FormatOptions) -> CodecResult<Vec<u8>> {
        encode_with_options(&handle.image, options, &handle.metadata)
    }
}
