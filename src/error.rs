// src/error.rs
//
// Unified error handling for imgsqueeze
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/encoding issues
// - ResourceLimit: Memory/time/dimension limits
// - InternalBug: Library bugs (should not happen)
//
// Ambiguous request fields never surface here: the normalizer resolves them
// to documented defaults. Only codec and limit failures reach the caller.

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used to decide how a failed job is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/time/dimension limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

/// imgsqueeze error types
#[derive(Debug, Clone, Error)]
pub enum SqueezeError {
    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Job limit exceeded: {reason}")]
    LimitExceeded { reason: Cow<'static, str> },

    // Transform Errors
    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

// Constructor Helpers
impl SqueezeError {
    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn limit_exceeded(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::LimitExceeded {
            reason: reason.into(),
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// Consistent with category(): UserError and ResourceLimit are recoverable,
    /// CodecError and InternalBug are not.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            // the caller handed in a container this build cannot read
            Self::UnsupportedFormat { .. } => ErrorCategory::UserError,

            // ResizeFailed is a processing failure during transformation, grouped
            // with encode/decode issues.
            Self::DecodeFailed { .. }
            | Self::CorruptedImage
            | Self::EncodeFailed { .. }
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::LimitExceeded { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, SqueezeError>;
