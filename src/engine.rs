// src/engine.rs
//
// The encoding engine. A job runs in three phases:
// 1. Normalize the caller's request (request.rs)
// 2. Decode once and run the transform pipeline (pipeline.rs via codec.rs)
// 3. Encode once, or search quality for a target byte size (encoder.rs, search.rs)
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Larger images are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod api;
mod codec;
mod common;
mod decoder;
mod encoder;
mod io;
mod limits;
mod pipeline;
mod pool;
mod search;

pub use api::{Engine, EncodedResult, EngineConfig};
pub use codec::{Codec, NativeCodec, PreparedImage};
pub use common::run_with_panic_policy;
pub use decoder::{check_dimensions, decode_image, detect_exif_orientation, probe_dimensions};
pub use encoder::{
    encode_avif, encode_gif, encode_jpeg, encode_png, encode_tiff, encode_webp,
    encode_with_options, png_palette_size, EncodeFlags, FormatOptions,
};
pub use io::{embed_metadata, extract_metadata, ImageMetadata};
pub use limits::{JobLimits, LimitPolicy};
pub use pipeline::{
    apply_orientation, apply_pipeline, build_pipeline, calc_inside_dimensions, fast_resize_owned,
    flatten, PipelineSpec,
};
pub use pool::get_pool;
pub use search::{
    search_target_size, SearchAttempt, SearchOutcome, SEARCH_HIGH_FLOOR, SEARCH_ITERATIONS,
    SEARCH_LOW, SEARCH_STEP,
};
