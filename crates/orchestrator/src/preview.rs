//! The transient layer that shows in-progress images.
//!
//! The layer is created on the first preview of a job, repainted on every
//! later one, and removed when the job ends. It stays locked while it
//! exists so the user cannot paint on it by accident; the renderer unlocks
//! it around its own writes.

use cyanic_core::document::{Document, LayerKind};
use cyanic_core::imaging;
use cyanic_core::result::InsertPosition;
use cyanic_core::types::{LayerId, Region};

use crate::error::OrchestratorError;

/// Name of the preview layer.
pub const PREVIEW_LAYER_NAME: &str = "Preview";

/// Owns at most one preview layer.
#[derive(Debug, Default)]
pub struct PreviewRenderer {
    layer: Option<LayerId>,
}

impl PreviewRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer_id(&self) -> Option<LayerId> {
        self.layer
    }

    /// Paint a base64 preview image scaled to `region`, creating the layer
    /// if needed. Returns the layer painted.
    ///
    /// The image is decoded before the document is touched, so a bad image
    /// leaves the document unchanged.
    pub fn render<D: Document + ?Sized>(
        &mut self,
        document: &mut D,
        image: &str,
        region: Region,
    ) -> Result<LayerId, OrchestratorError> {
        let pixels = imaging::decode_to_rgba(image, Some(region.size()))?;

        let layer = match self.layer.and_then(|id| document.resolve_layer_id(id)) {
            Some(id) => id,
            None => {
                // The host may have deleted the old one.
                let id = document.create_layer(PREVIEW_LAYER_NAME, LayerKind::Paint, InsertPosition::Top)?;
                self.layer = Some(id);
                tracing::debug!(layer = %id, "Created preview layer");
                id
            }
        };

        document.set_layer_locked(layer, false)?;
        let painted = document.set_layer_pixels(layer, &pixels.rgba, region);
        document.set_layer_locked(layer, true)?;
        painted?;
        document.refresh();
        Ok(layer)
    }

    /// Remove the preview layer, if any. Safe to call repeatedly.
    ///
    /// Host errors are logged; the renderer forgets the layer either way
    /// unless removal failed on a layer that still exists.
    pub fn clear<D: Document + ?Sized>(&mut self, document: &mut D) {
        let Some(id) = self.layer else {
            return;
        };
        let Some(layer) = document.resolve_layer_id(id) else {
            self.layer = None;
            return;
        };

        if let Err(e) = document.set_layer_locked(layer, false) {
            tracing::warn!(layer = %layer, error = %e, "Cannot unlock preview layer");
        }
        match document.remove_layer(layer) {
            Ok(()) => {
                tracing::debug!(layer = %layer, "Removed preview layer");
                self.layer = None;
                document.refresh();
            }
            Err(e) => {
                tracing::warn!(layer = %layer, error = %e, "Cannot remove preview layer");
            }
        }
    }
}
