// src/request.rs
//
// Parameter normalizer: turns loosely-typed caller fields into an immutable
// EncodeRequest. Nothing here fails - malformed input resolves to defaults.

use crate::ops::{Background, OutputFormat, Preset, Quality, RequestedFormat, ResizeFit};
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;

/// A raw, untyped field value as received from a form or query string.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl FieldValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Parse a numeric field. Absent, blank, unparsable or non-finite values yield `fallback`.
pub fn parse_number(field: Option<&FieldValue>, fallback: f64) -> f64 {
    let parsed = match field {
        Some(FieldValue::Number(n)) => Some(*n),
        Some(FieldValue::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(FieldValue::Text(s)) => s.trim().parse::<f64>().ok(),
        Some(FieldValue::Null) | None => None,
    };
    match parsed {
        Some(n) if n.is_finite() => n,
        _ => fallback,
    }
}

/// True only for `"true"`, `"1"`, `1` and `true`.
pub fn to_boolean(field: Option<&FieldValue>) -> bool {
    match field {
        Some(FieldValue::Bool(b)) => *b,
        Some(FieldValue::Number(n)) => *n == 1.0,
        Some(FieldValue::Text(s)) => s == "true" || s == "1",
        Some(FieldValue::Null) | None => false,
    }
}

/// Lowercase text after the last `.`; empty when there is no dot or nothing follows it.
pub fn get_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// Resolve the concrete output format. `Auto` follows the source extension,
/// and anything unrecognized lands on jpeg.
pub fn resolve_format(requested: RequestedFormat, source_extension: &str) -> OutputFormat {
    match requested {
        RequestedFormat::Format(format) => format,
        RequestedFormat::Auto => OutputFormat::from_name(&source_extension.to_ascii_lowercase())
            .unwrap_or(OutputFormat::Jpeg),
    }
}

/// Optional resize box. At least one axis is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: Option<NonZeroU32>,
    pub height: Option<NonZeroU32>,
    pub fit: ResizeFit,
}

impl ResizeSpec {
    /// `None` when neither axis is constrained.
    pub fn new(width: Option<u32>, height: Option<u32>, fit: ResizeFit) -> Option<Self> {
        let width = width.and_then(NonZeroU32::new);
        let height = height.and_then(NonZeroU32::new);
        if width.is_none() && height.is_none() {
            return None;
        }
        Some(Self { width, height, fit })
    }
}

/// Raw caller options. Every field is optional and loosely typed.
#[derive(Clone, Debug, Default)]
pub struct RawOptions {
    pub format: Option<FieldValue>,
    pub quality: Option<FieldValue>,
    pub preset: Option<FieldValue>,
    pub width: Option<FieldValue>,
    pub height: Option<FieldValue>,
    pub fit: Option<FieldValue>,
    pub target_bytes: Option<FieldValue>,
    pub keep_metadata: Option<FieldValue>,
    pub lossless: Option<FieldValue>,
    pub progressive: Option<FieldValue>,
    pub flatten: Option<FieldValue>,
    pub background: Option<FieldValue>,
}

/// One fully-resolved conversion job. Immutable once built.
#[derive(Clone, Debug)]
pub struct EncodeRequest {
    source: Arc<Vec<u8>>,
    requested_format: RequestedFormat,
    source_extension: String,
    quality: u8,
    target_bytes: Option<NonZeroU64>,
    resize: Option<ResizeSpec>,
    keep_metadata: bool,
    lossless: bool,
    progressive: bool,
    flatten: bool,
    background: Background,
}

fn positive_u32(field: Option<&FieldValue>) -> Option<u32> {
    let value = parse_number(field, 0.0);
    (value >= 1.0).then(|| value.min(u32::MAX as f64) as u32)
}

impl EncodeRequest {
    pub fn builder(source: impl Into<Arc<Vec<u8>>>) -> EncodeRequestBuilder {
        EncodeRequestBuilder::new(source.into())
    }

    /// Build a request from raw fields. `file_name` supplies the extension hint.
    pub fn from_raw(
        source: impl Into<Arc<Vec<u8>>>,
        file_name: &str,
        raw: &RawOptions,
    ) -> Self {
        let requested_format = RequestedFormat::parse(raw.format.as_ref().and_then(FieldValue::as_text));

        let quality = match raw.quality.as_ref() {
            Some(field) if !field.is_blank() => {
                let value = parse_number(Some(field), Preset::Balanced.quality() as f64);
                Quality::Explicit(value.round().clamp(1.0, 100.0) as u8)
            }
            _ => Quality::Preset(
                raw.preset
                    .as_ref()
                    .and_then(FieldValue::as_text)
                    .map(Preset::from_name)
                    .unwrap_or_default(),
            ),
        };

        let target = parse_number(raw.target_bytes.as_ref(), 0.0);
        let target_bytes = if target >= 1.0 {
            NonZeroU64::new(target.min(u64::MAX as f64) as u64)
        } else {
            None
        };

        let fit = raw
            .fit
            .as_ref()
            .and_then(FieldValue::as_text)
            .map(ResizeFit::from_name)
            .unwrap_or_default();

        let background = raw
            .background
            .as_ref()
            .and_then(FieldValue::as_text)
            .and_then(Background::parse_hex)
            .unwrap_or_default();

        Self::builder(source)
            .requested_format(requested_format)
            .source_extension(get_extension(file_name))
            .quality(quality)
            .target_bytes(target_bytes.map(NonZeroU64::get))
            .resize(
                positive_u32(raw.width.as_ref()),
                positive_u32(raw.height.as_ref()),
                fit,
            )
            .keep_metadata(to_boolean(raw.keep_metadata.as_ref()))
            .lossless(to_boolean(raw.lossless.as_ref()))
            .progressive(to_boolean(raw.progressive.as_ref()))
            .flatten(to_boolean(raw.flatten.as_ref()))
            .background(background)
            .build()
    }

    pub fn source(&self) -> &Arc<Vec<u8>> {
        &self.source
    }

    pub fn requested_format(&self) -> RequestedFormat {
        self.requested_format
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    pub fn resolved_format(&self) -> OutputFormat {
        resolve_format(self.requested_format, &self.source_extension)
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn target_bytes(&self) -> Option<NonZeroU64> {
        self.target_bytes
    }

    pub fn resize(&self) -> Option<ResizeSpec> {
        self.resize
    }

    pub fn keep_metadata(&self) -> bool {
        self.keep_metadata
    }

    pub fn lossless(&self) -> bool {
        self.lossless
    }

    pub fn progressive(&self) -> bool {
        self.progressive
    }

    pub fn flatten(&self) -> bool {
        self.flatten
    }

    pub fn background(&self) -> Background {
        self.background
    }

    /// Flatten only applies when the output cannot carry alpha.
    pub fn flatten_effective(&self) -> bool {
        self.flatten && !self.resolved_format().supports_alpha()
    }
}

/// Typed construction path for callers that already hold concrete values.
#[derive(Clone, Debug)]
pub struct EncodeRequestBuilder {
    request: EncodeRequest,
}

impl EncodeRequestBuilder {
    fn new(source: Arc<Vec<u8>>) -> Self {
        Self {
            request: EncodeRequest {
                source,
                requested_format: RequestedFormat::Auto,
                source_extension: String::new(),
                quality: Quality::default().resolve(),
                target_bytes: None,
                resize: None,
                keep_metadata: false,
                lossless: false,
                progressive: false,
                flatten: false,
                background: Background::default(),
            },
        }
    }

    pub fn requested_format(mut self, format: RequestedFormat) -> Self {
        self.request.requested_format = format;
        self
    }

    pub fn format(self, format: OutputFormat) -> Self {
        self.requested_format(RequestedFormat::Format(format))
    }

    pub fn source_extension(mut self, extension: impl Into<String>) -> Self {
        self.request.source_extension = extension.into().to_lowercase();
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.request.quality = quality.resolve();
        self
    }

    /// Zero means no target.
    pub fn target_bytes(mut self, target: Option<u64>) -> Self {
        self.request.target_bytes = target.and_then(NonZeroU64::new);
        self
    }

    pub fn resize(mut self, width: Option<u32>, height: Option<u32>, fit: ResizeFit) -> Self {
        self.request.resize = ResizeSpec::new(width, height, fit);
        self
    }

    pub fn keep_metadata(mut self, keep: bool) -> Self {
        self.request.keep_metadata = keep;
        self
    }

    pub fn lossless(mut self, lossless: bool) -> Self {
        self.request.lossless = lossless;
        self
    }

    pub fn progressive(mut self, progressive: bool) -> Self {
        self.request.progressive = progressive;
        self
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.request.flatten = flatten;
        self
    }

    pub fn background(mut self, background: Background) -> Self {
        self.request.background = background;
        self
    }

    pub fn build(self) -> EncodeRequest {
        self.request
    }
}
