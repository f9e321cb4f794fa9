//! The contributor protocol and the built-in parameter sources.
//!
//! Every parameter source implements [`Contributor`]. The orchestrator
//! holds an ordered `Vec<Box<dyn Contributor>>` and asks each one for a
//! snapshot exactly once per submission.

mod image;
mod params;
mod prompt;
mod scripts;

pub use image::{InitImage, InpaintMask, Interrogation, Upscale, UpscaleMode, UPSCALED_LAYER_NAME};
pub use params::{Batch, ColorCorrection, Denoise, HiresFix, Refiner, Sampling, Seed};
pub use prompt::{PromptMode, Prompts};
pub use scripts::{AlwaysOnScript, ControlNet, ControlNetUnit, ALWAYS_ON_SCRIPTS_KEY};

use crate::types::Mapping;

/// A parameter source able to produce a fragment of a generation request.
///
/// A snapshot may be empty. It may also carry a Processing Instructions
/// fragment under [`crate::instructions::INSTRUCTIONS_KEY`]. Side effects
/// (such as recording prompt history) are allowed but must be idempotent
/// within one submission.
///
/// Contributors are collected on the caller's task and may be moved into a
/// job, hence `Send`.
pub trait Contributor: Send {
    /// Short name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn snapshot(&mut self) -> Mapping;
}

/// A contributor that always yields the same mapping.
#[derive(Debug, Clone, Default)]
pub struct Fixed {
    label: String,
    mapping: Mapping,
}

impl Fixed {
    pub fn new(label: impl Into<String>, mapping: Mapping) -> Self {
        Self {
            label: label.into(),
            mapping,
        }
    }

    /// Convenience for tests and ad-hoc fields: panics-free conversion from
    /// a JSON value, ignoring anything that is not an object.
    pub fn from_value(label: impl Into<String>, value: serde_json::Value) -> Self {
        let mapping = match value {
            serde_json::Value::Object(m) => m,
            _ => Mapping::new(),
        };
        Self::new(label, mapping)
    }
}

impl Contributor for Fixed {
    fn name(&self) -> &str {
        &self.label
    }

    fn snapshot(&mut self) -> Mapping {
        self.mapping.clone()
    }
}

/// Serialize a struct of request fields into a mapping.
///
/// `None` fields are expected to be skipped by the caller's serde
/// attributes; anything that fails to serialize yields an empty mapping.
pub(crate) fn to_mapping<T: serde::Serialize>(value: &T) -> Mapping {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(mapping)) => mapping,
        Ok(_) => Mapping::new(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize contributor fields");
            Mapping::new()
        }
    }
}
