// src/engine/api.rs
//
// Engine: the public entry point. One job is decode -> pipeline -> encode,
// with the encode step either single-pass or a target-size search.

use crate::engine::codec::{Codec, NativeCodec};
use crate::engine::encoder::{EncodeFlags, FormatOptions};
use crate::engine::limits::JobLimits;
use crate::engine::pipeline::build_pipeline;
use crate::engine::pool;
use crate::engine::search::{search_target_size, SearchAttempt};
use crate::error::SqueezeError;
use crate::ops::OutputFormat;
use crate::request::EncodeRequest;
use rayon::prelude::*;
use std::time::Instant;
use tracing::debug;

type ApiResult<T> = std::result::Result<T, SqueezeError>;

/// Engine-wide configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub limits: JobLimits,
}

impl EngineConfig {
    pub fn with_limits(limits: JobLimits) -> Self {
        Self { limits }
    }
}

/// Encoded output of one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedResult {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Quality passed to the encoder; `None` for formats without a quality knob.
    pub quality: Option<u8>,
    /// Every search attempt in order. Empty for single-pass encodes.
    pub attempts: Vec<SearchAttempt>,
}

impl EncodedResult {
    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// The encoding decision engine.
///
/// ```no_run
/// use imgsqueeze::{Engine, EngineConfig, EncodeRequest, OutputFormat};
///
/// let source = std::fs::read("photo.jpg").unwrap();
/// let request = EncodeRequest::builder(source)
///     .format(OutputFormat::WebP)
///     .target_bytes(Some(50_000))
///     .build();
/// let result = Engine::new(EngineConfig::default()).encode(&request).unwrap();
/// assert!(result.byte_length() > 0);
/// ```
#[derive(Clone, Debug)]
pub struct Engine<C: Codec = NativeCodec> {
    codec: C,
    config: EngineConfig,
}

impl Engine<NativeCodec> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            codec: NativeCodec::new(config.limits.clone()),
            config,
        }
    }
}

impl Default for Engine<NativeCodec> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<C: Codec> Engine<C> {
    /// Engine over a caller-supplied codec backend.
    pub fn with_codec(codec: C, config: EngineConfig) -> Self {
        Self { codec, config }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one job.
    pub fn encode(&self, request: &EncodeRequest) -> ApiResult<EncodedResult> {
        let started = Instant::now();
        let format = request.resolved_format();
        let quality = request.quality();
        let target = request.target_bytes();
        debug!(
            format = %format,
            quality,
            target_bytes = target.map(|t| t.get()),
            "encode job"
        );

        let source = request.source().as_slice();
        let orientation = self.codec.source_orientation(source);
        let spec = build_pipeline(request, orientation);
        let handle = self.codec.build_pipeline(source, &spec)?;

        let flags = EncodeFlags {
            lossless: request.lossless(),
            progressive: request.progressive(),
        };

        match target {
            Some(target) if format.is_quality_sensitive() => {
                let deadline = self.config.limits.deadline_from(started);
                let outcome = search_target_size(quality, target, deadline, |q| {
                    self.codec
                        .encode_at(&handle, &FormatOptions::new(format, q, flags))
                })?;
                Ok(EncodedResult {
                    bytes: outcome.bytes,
                    format,
                    quality: Some(outcome.quality),
                    attempts: outcome.attempts,
                })
            }
            _ => {
                let options = FormatOptions::new(format, quality, flags);
                let bytes = self.codec.encode_at(&handle, &options)?;
                debug!(format = %format, size = bytes.len(), "single-pass encode");
                Ok(EncodedResult {
                    bytes,
                    format,
                    quality: options.quality(),
                    attempts: Vec::new(),
                })
            }
        }
    }

    /// Run independent jobs in parallel. Results keep input order.
    pub fn encode_batch(&self, requests: &[EncodeRequest]) -> Vec<ApiResult<EncodedResult>> {
        pool::install(|| {
            requests
                .par_iter()
                .map(|request| self.encode(request))
                .collect()
        })
    }
}
