// src/ops.rs
//
// Request vocabulary: output formats, quality presets, fit modes and the
// transform operations queued by the pipeline builder.
// These are cheap to create and copy - the expensive work happens in the codec.

/// Concrete output format. Never "auto": this is what a request resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
    Tiff,
    Gif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Avif,
        OutputFormat::Tiff,
        OutputFormat::Gif,
    ];

    /// Map a lowercase format or extension name. `jpg` is normalized to `jpeg`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "avif" => Some(Self::Avif),
            "tiff" => Some(Self::Tiff),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Avif => "avif",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            other => other.as_str(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Avif => "image/avif",
            Self::Tiff => "image/tiff",
            Self::Gif => "image/gif",
        }
    }

    /// Formats that can carry an alpha channel. Flattening is skipped for these.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, Self::Png | Self::WebP | Self::Avif | Self::Gif)
    }

    /// Whether the quality knob changes the encoded bytes at all.
    /// TIFF (LZW) and GIF ignore it.
    pub fn is_quality_sensitive(&self) -> bool {
        !matches!(self, Self::Tiff | Self::Gif)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format as requested by the caller, before resolution against the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RequestedFormat {
    #[default]
    Auto,
    Format(OutputFormat),
}

impl RequestedFormat {
    /// Empty or missing means `Auto`; an unknown name takes the jpeg path.
    pub fn parse(name: Option<&str>) -> Self {
        let name = match name.map(str::trim) {
            None | Some("") => return Self::Auto,
            Some(name) => name.to_ascii_lowercase(),
        };
        if name == "auto" {
            return Self::Auto;
        }
        Self::Format(OutputFormat::from_name(&name).unwrap_or(OutputFormat::Jpeg))
    }
}

/// Named quality shortcut.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Preset {
    Tiny,
    Small,
    #[default]
    Balanced,
    Crisp,
}

impl Preset {
    /// Unknown names fall back to `Balanced`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "tiny" => Self::Tiny,
            "small" => Self::Small,
            "crisp" => Self::Crisp,
            _ => Self::Balanced,
        }
    }

    pub fn quality(&self) -> u8 {
        match self {
            Self::Tiny => 45,
            Self::Small => 60,
            Self::Balanced => 75,
            Self::Crisp => 88,
        }
    }
}

/// Either a preset or an explicit slider value. Resolved once at request construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Preset(Preset),
    Explicit(u8),
}

impl Quality {
    pub fn resolve(&self) -> u8 {
        match self {
            Self::Preset(preset) => preset.quality(),
            Self::Explicit(value) => (*value).clamp(1, 100),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::Preset(Preset::Balanced)
    }
}

/// Resize strategy. Upscaling is never performed, whichever mode is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResizeFit {
    /// Shrink to fit within the box, preserving aspect ratio.
    #[default]
    Inside,
    /// Fill the box, cropping overflow from the center.
    Cover,
    /// Fit within the box and pad the remainder with transparency.
    Contain,
}

impl ResizeFit {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "cover" => Self::Cover,
            "contain" => Self::Contain,
            _ => Self::Inside,
        }
    }
}

/// Opaque RGB background used when flattening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Background {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Background {
    pub const WHITE: Background = Background {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Parse `#rgb` / `#rrggbb` (leading `#` optional). Anything else is `None`.
    pub fn parse_hex(value: &str) -> Option<Self> {
        let hex = value.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut it = hex.chars().map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
                Some(Self {
                    r: it.next()??,
                    g: it.next()??,
                    b: it.next()??,
                })
            }
            6 => Some(Self {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            _ => None,
        }
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }
}

impl Default for Background {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Transform stages, in the order the pipeline builder emits them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Apply an EXIF orientation (1-8). 1 is the identity.
    AutoOrient { orientation: u16 },

    /// Resize with optional width/height. Never enlarges.
    Resize {
        width: Option<u32>,
        height: Option<u32>,
        fit: ResizeFit,
    },

    /// Composite onto an opaque background and drop alpha.
    Flatten { background: Background },
}
