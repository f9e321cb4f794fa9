//! The host document as a capability the orchestrator drives.
//!
//! Implementations wrap whatever painting application hosts the
//! orchestrator. [`MemoryDocument`] is a complete in-process implementation
//! used by the headless host and by tests.

mod memory;

pub use memory::{MemoryDocument, MemoryLayer};

use crate::result::InsertPosition;
use crate::types::{LayerId, Region, RegionMode, Size};

/// Size of the document created when none is open.
pub const DEFAULT_DOCUMENT_SIZE: Size = Size {
    width: 512,
    height: 512,
};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("No document is open")]
    NoDocument,

    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Host error: {0}")]
    Host(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Paint,
    Group,
}

/// Operations the orchestrator needs from the host document.
///
/// Calls happen on the orchestrator's task only; the background request
/// never touches the document.
pub trait Document: Send {
    fn is_open(&self) -> bool;

    /// Open a new empty document of `size`.
    fn create_default(&mut self, size: Size) -> Result<(), DocumentError>;

    /// Bounds of the canvas, the selection or the active layer. An empty
    /// selection is reported as a zero-area region.
    fn region_bounds(&self, mode: RegionMode) -> Result<Region, DocumentError>;

    fn create_layer(
        &mut self,
        name: &str,
        kind: LayerKind,
        position: InsertPosition,
    ) -> Result<LayerId, DocumentError>;

    /// Paint tightly packed RGBA8 `pixels` covering `region`.
    fn set_layer_pixels(
        &mut self,
        id: LayerId,
        pixels: &[u8],
        region: Region,
    ) -> Result<(), DocumentError>;

    fn set_layer_locked(&mut self, id: LayerId, locked: bool) -> Result<(), DocumentError>;

    fn remove_layer(&mut self, id: LayerId) -> Result<(), DocumentError>;

    fn layer_visibility(&self, id: LayerId) -> Result<bool, DocumentError>;

    fn set_layer_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), DocumentError>;

    /// Confirm that `id` still names a layer of the open document.
    fn resolve_layer_id(&self, id: LayerId) -> Option<LayerId>;

    /// Redraw the document after a batch of changes.
    fn refresh(&mut self) {}
}

/// Make sure a document is open, creating a default one if not.
///
/// Returns `true` when a document had to be created.
pub fn ensure_open<D: Document + ?Sized>(document: &mut D) -> Result<bool, DocumentError> {
    if document.is_open() {
        return Ok(false);
    }
    tracing::info!(
        width = DEFAULT_DOCUMENT_SIZE.width,
        height = DEFAULT_DOCUMENT_SIZE.height,
        "No open document, creating default",
    );
    document.create_default(DEFAULT_DOCUMENT_SIZE)?;
    Ok(true)
}

/// The selection if it has area, else the whole canvas.
pub fn default_region<D: Document + ?Sized>(document: &D) -> Result<Region, DocumentError> {
    let selection = document.region_bounds(RegionMode::Selection)?;
    if !selection.is_empty() {
        return Ok(selection);
    }
    document.region_bounds(RegionMode::Canvas)
}
