//! Processing Instructions: post-processing directives carried beside a
//! request but never sent over the wire.
//!
//! Contributors place instruction fragments under [`INSTRUCTIONS_KEY`] in
//! their snapshots. The request builder strips that key, merges the
//! fragments with the same rules as the payload itself, and hands the
//! result to the reconciler as a typed [`ProcessingInstructions`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{LayerId, Mapping, Size};

/// Reserved snapshot key holding an instructions fragment.
pub const INSTRUCTIONS_KEY: &str = "cyanic";

/// Records that the generation size differs from the placement size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResizeDirective {
    /// Dimensions the caller asked for; results are scaled back to these.
    pub original: Size,
    /// Dimensions actually sent to the remote service.
    pub negotiated: Size,
    /// `negotiated / original` along the axis that drove the negotiation.
    pub scale: f64,
}

/// Typed view over the merged instructions mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInstructions {
    /// Scale results back to the pre-negotiation size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeDirective>,

    /// Insert results immediately below this layer, inside its parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_layer: Option<LayerId>,

    /// Layers hidden for the duration of the job that must be shown again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restore_visibility: Vec<LayerId>,

    /// Place results at this size, independent of the generation size.
    ///
    /// Takes precedence over `resize`; used when the output is meant to be
    /// larger than the source region (upscaling).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_size: Option<Size>,

    /// Explicit name for result layers, overriding seed-based names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,

    /// Directives this crate does not interpret, kept for callers.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl ProcessingInstructions {
    /// Parse the merged instructions mapping.
    pub fn from_mapping(mapping: Mapping) -> Result<Self, CoreError> {
        serde_json::from_value(serde_json::Value::Object(mapping)).map_err(|e| {
            CoreError::Validation(format!("Invalid processing instructions: {e}"))
        })
    }

    pub fn to_mapping(&self) -> Mapping {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mapping)) => mapping,
            _ => Mapping::new(),
        }
    }

    /// Size that results should occupy in the document, if it differs from
    /// the generation size.
    pub fn placement_size(&self) -> Option<Size> {
        self.place_size.or(self.resize.map(|r| r.original))
    }
}

/// Build a one-key snapshot fragment carrying `instructions`.
pub fn instructions_fragment(instructions: &ProcessingInstructions) -> Mapping {
    let mut fragment = Mapping::new();
    fragment.insert(
        INSTRUCTIONS_KEY.to_string(),
        serde_json::Value::Object(instructions.to_mapping()),
    );
    fragment
}
