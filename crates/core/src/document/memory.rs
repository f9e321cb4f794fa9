use std::collections::HashMap;

use super::{Document, DocumentError, LayerKind};
use crate::result::InsertPosition;
use crate::types::{LayerId, Region, RegionMode, Size};

/// One layer of a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLayer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub parent: Option<LayerId>,
    pub visible: bool,
    pub locked: bool,
    /// Last painted pixels and where they were painted.
    pub pixels: Option<(Region, Vec<u8>)>,
}

/// An in-process layer stack.
///
/// Child lists are ordered top first. Every successful mutating call bumps
/// [`MemoryDocument::mutation_count`].
#[derive(Debug, Default)]
pub struct MemoryDocument {
    size: Option<Size>,
    selection: Option<Region>,
    active: Option<LayerId>,
    layers: HashMap<LayerId, MemoryLayer>,
    root: Vec<LayerId>,
    children: HashMap<LayerId, Vec<LayerId>>,
    mutations: usize,
}

impl MemoryDocument {
    /// No document open.
    pub fn closed() -> Self {
        Self::default()
    }

    /// An open, empty document of `size`.
    pub fn open(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn set_selection(&mut self, selection: Option<Region>) {
        self.selection = selection;
    }

    pub fn set_active(&mut self, id: Option<LayerId>) {
        self.active = id;
    }

    /// Add a paint layer on top of the root without counting a mutation.
    pub fn seed_layer(&mut self, name: &str) -> LayerId {
        let id = self.insert(name, LayerKind::Paint, None);
        self.root.insert(0, id);
        id
    }

    pub fn layer(&self, id: LayerId) -> Option<&MemoryLayer> {
        self.layers.get(&id)
    }

    /// Layers in the root, top first.
    pub fn root_layers(&self) -> &[LayerId] {
        &self.root
    }

    /// Children of a group, top first.
    pub fn children_of(&self, group: LayerId) -> &[LayerId] {
        self.children.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn layers_named(&self, name: &str) -> Vec<&MemoryLayer> {
        self.layers.values().filter(|l| l.name == name).collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations
    }

    // ---- private helpers ----

    fn ensure_open(&self) -> Result<Size, DocumentError> {
        self.size.ok_or(DocumentError::NoDocument)
    }

    fn get_mut(&mut self, id: LayerId) -> Result<&mut MemoryLayer, DocumentError> {
        self.layers.get_mut(&id).ok_or(DocumentError::LayerNotFound(id))
    }

    fn siblings_mut(&mut self, parent: Option<LayerId>) -> &mut Vec<LayerId> {
        match parent {
            Some(group) => self.children.entry(group).or_default(),
            None => &mut self.root,
        }
    }

    fn insert(&mut self, name: &str, kind: LayerKind, parent: Option<LayerId>) -> LayerId {
        let id = LayerId::new_v4();
        self.layers.insert(
            id,
            MemoryLayer {
                id,
                name: name.to_string(),
                kind,
                parent,
                visible: true,
                locked: false,
                pixels: None,
            },
        );
        if kind == LayerKind::Group {
            self.children.insert(id, Vec::new());
        }
        id
    }

    fn remove_subtree(&mut self, id: LayerId) {
        if let Some(children) = self.children.remove(&id) {
            for child in children {
                self.remove_subtree(child);
            }
        }
        self.layers.remove(&id);
    }
}

impl Document for MemoryDocument {
    fn is_open(&self) -> bool {
        self.size.is_some()
    }

    fn create_default(&mut self, size: Size) -> Result<(), DocumentError> {
        *self = Self {
            mutations: self.mutations + 1,
            ..Self::open(size)
        };
        Ok(())
    }

    fn region_bounds(&self, mode: RegionMode) -> Result<Region, DocumentError> {
        let size = self.ensure_open()?;
        let canvas = Region::new(0, 0, size.width, size.height);
        Ok(match mode {
            RegionMode::Canvas => canvas,
            RegionMode::Selection => self.selection.unwrap_or(Region::new(0, 0, 0, 0)),
            RegionMode::Layer => self
                .active
                .and_then(|id| self.layers.get(&id))
                .and_then(|layer| layer.pixels.as_ref().map(|(region, _)| *region))
                .unwrap_or(canvas),
        })
    }

    fn create_layer(
        &mut self,
        name: &str,
        kind: LayerKind,
        position: InsertPosition,
    ) -> Result<LayerId, DocumentError> {
        self.ensure_open()?;
        let (parent, index) = match position {
            InsertPosition::Top => (None, 0),
            InsertPosition::Below(anchor) => {
                let parent = self
                    .layers
                    .get(&anchor)
                    .ok_or(DocumentError::LayerNotFound(anchor))?
                    .parent;
                let siblings = self.siblings_mut(parent);
                let at = siblings.iter().position(|l| *l == anchor).map_or(0, |i| i + 1);
                (parent, at)
            }
            InsertPosition::Into(group) => match self.layers.get(&group) {
                Some(layer) if layer.kind == LayerKind::Group => (Some(group), 0),
                Some(_) => {
                    return Err(DocumentError::Host(format!("Layer {group} is not a group")));
                }
                None => return Err(DocumentError::LayerNotFound(group)),
            },
        };
        let id = self.insert(name, kind, parent);
        self.siblings_mut(parent).insert(index, id);
        self.mutations += 1;
        Ok(id)
    }

    fn set_layer_pixels(
        &mut self,
        id: LayerId,
        pixels: &[u8],
        region: Region,
    ) -> Result<(), DocumentError> {
        self.ensure_open()?;
        let expected = region.width as usize * region.height as usize * 4;
        if region.is_empty() || pixels.len() != expected {
            return Err(DocumentError::InvalidRegion(format!(
                "{}x{} region needs {expected} bytes, got {}",
                region.width,
                region.height,
                pixels.len()
            )));
        }
        let layer = self.get_mut(id)?;
        if layer.locked {
            return Err(DocumentError::Host(format!("Layer {id} is locked")));
        }
        layer.pixels = Some((region, pixels.to_vec()));
        self.mutations += 1;
        Ok(())
    }

    fn set_layer_locked(&mut self, id: LayerId, locked: bool) -> Result<(), DocumentError> {
        self.get_mut(id)?.locked = locked;
        self.mutations += 1;
        Ok(())
    }

    fn remove_layer(&mut self, id: LayerId) -> Result<(), DocumentError> {
        let parent = self
            .layers
            .get(&id)
            .ok_or(DocumentError::LayerNotFound(id))?
            .parent;
        self.siblings_mut(parent).retain(|l| *l != id);
        self.remove_subtree(id);
        if self.active == Some(id) {
            self.active = None;
        }
        self.mutations += 1;
        Ok(())
    }

    fn layer_visibility(&self, id: LayerId) -> Result<bool, DocumentError> {
        self.layers
            .get(&id)
            .map(|l| l.visible)
            .ok_or(DocumentError::LayerNotFound(id))
    }

    fn set_layer_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), DocumentError> {
        self.get_mut(id)?.visible = visible;
        self.mutations += 1;
        Ok(())
    }

    fn resolve_layer_id(&self, id: LayerId) -> Option<LayerId> {
        self.layers.contains_key(&id).then_some(id)
    }
}
