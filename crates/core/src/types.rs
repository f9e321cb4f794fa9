//! Shared primitive types used across the request, placement and job layers.

use serde::{Deserialize, Serialize};

/// A string-keyed, arbitrarily nested mapping of JSON values.
///
/// Contributor snapshots, Processing Instructions and wire payloads all
/// share this representation.
pub type Mapping = serde_json::Map<String, serde_json::Value>;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Stable identifier of a document layer.
///
/// Layer names are not unique, so anything that needs to find a layer again
/// later (anchors, the preview layer) holds one of these instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub uuid::Uuid);

impl LayerId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A rectangular pixel region of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Same origin, different extent.
    pub fn with_size(&self, size: Size) -> Self {
        Self {
            width: size.width,
            height: size.height,
            ..*self
        }
    }
}

/// Which part of the document a generation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMode {
    Canvas,
    Selection,
    Layer,
}

/// The kind of request submitted to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Generate from a text prompt (`txt2img`).
    TextToImage,
    /// Generate from an init image, optionally masked (`img2img`).
    ImageToImage,
    /// Post-processing such as upscaling (`extra-single-image`).
    Extra,
    /// Caption an image (`interrogate`).
    Interrogate,
}

impl RequestKind {
    /// Path of the endpoint under `/sdapi/v1/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::TextToImage => "txt2img",
            Self::ImageToImage => "img2img",
            Self::Extra => "extra-single-image",
            Self::Interrogate => "interrogate",
        }
    }

    /// Whether requests of this kind carry `width`/`height` and take part
    /// in size negotiation.
    pub fn has_dimensions(self) -> bool {
        matches!(self, Self::TextToImage | Self::ImageToImage)
    }

    /// Whether the normaliser should rewrite the payload for this kind.
    ///
    /// Interrogation payloads are sent untouched.
    pub fn is_normalized(self) -> bool {
        !matches!(self, Self::Interrogate)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// One poll of the remote service's progress endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Completion in `0.0..=1.0`.
    pub fraction: f64,
    /// Base64-encoded intermediate image, when the service sent one.
    pub preview_image: Option<String>,
    /// The service reported that the current job was interrupted or skipped.
    pub terminal: bool,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self {
            fraction: 0.0,
            preview_image: None,
            terminal: false,
        }
    }
}
