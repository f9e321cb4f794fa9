//! Placing a Result Set into the document.
//!
//! [`cyanic_core::result::plan_placement`] decides what to create; this
//! module executes the plan. All images are decoded before the first
//! document call so a malformed image never leaves half a batch behind.

use cyanic_core::document::{Document, DocumentError, LayerKind};
use cyanic_core::imaging::{self, Pixels};
use cyanic_core::instructions::ProcessingInstructions;
use cyanic_core::result::{plan_placement, InsertPosition, PlannedLayer, ResultSet};
use cyanic_core::types::{LayerId, Region};

use crate::error::OrchestratorError;

/// Layers created for one Result Set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Result layers, top first.
    pub layers: Vec<LayerId>,
    pub group: Option<LayerId>,
}

/// Prune, decode and place `results`, then restore the visibility of any
/// layers the instructions name.
///
/// Visibility is restored even when nothing is placed or placement fails.
pub fn reconcile<D: Document + ?Sized>(
    document: &mut D,
    results: &ResultSet,
    region: Region,
    instructions: &ProcessingInstructions,
    grid: bool,
) -> Result<Placement, OrchestratorError> {
    let plan = plan_placement(results, region, instructions, grid);

    let placed = decode_all(&plan.layers, plan.target).and_then(|decoded| {
        let position = resolve_position(document, plan.position);
        place(document, &decoded, plan.group.as_deref(), position, plan.target)
    });

    restore_visibility(document, &plan.restore_visibility);
    if !plan.is_empty() || !plan.restore_visibility.is_empty() {
        document.refresh();
    }

    let placement = placed?;
    tracing::info!(
        layers = placement.layers.len(),
        grouped = placement.group.is_some(),
        x = plan.target.x,
        y = plan.target.y,
        width = plan.target.width,
        height = plan.target.height,
        "Placed results",
    );
    Ok(placement)
}

/// Show every layer in `layers` that still exists and is hidden.
pub fn restore_visibility<D: Document + ?Sized>(document: &mut D, layers: &[LayerId]) {
    for &id in layers {
        let Some(layer) = document.resolve_layer_id(id) else {
            tracing::debug!(layer = %id, "Layer to re-show no longer exists");
            continue;
        };
        match document.layer_visibility(layer) {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = document.set_layer_visibility(layer, true) {
                    tracing::warn!(layer = %layer, error = %e, "Cannot restore layer visibility");
                }
            }
            Err(e) => tracing::warn!(layer = %layer, error = %e, "Cannot read layer visibility"),
        }
    }
}

// ---- private helpers ----

struct DecodedLayer<'a> {
    name: &'a str,
    pixels: Pixels,
}

fn decode_all(layers: &[PlannedLayer], target: Region) -> Result<Vec<DecodedLayer<'_>>, OrchestratorError> {
    if !layers.is_empty() && target.is_empty() {
        return Err(OrchestratorError::Document(DocumentError::InvalidRegion(format!(
            "Cannot place results into a {}x{} region",
            target.width, target.height
        ))));
    }
    layers
        .iter()
        .enumerate()
        .map(|(index, layer)| {
            imaging::decode_to_rgba(&layer.image, Some(target.size()))
                .map(|pixels| DecodedLayer {
                    name: &layer.name,
                    pixels,
                })
                .map_err(|e| OrchestratorError::MalformedResponse(format!("Result image {index}: {e}")))
        })
        .collect()
}

/// An anchor that no longer exists falls back to the top of the document.
fn resolve_position<D: Document + ?Sized>(document: &D, position: InsertPosition) -> InsertPosition {
    match position {
        InsertPosition::Below(anchor) => match document.resolve_layer_id(anchor) {
            Some(layer) => InsertPosition::Below(layer),
            None => {
                tracing::warn!(anchor = %anchor, "Anchor layer is gone, placing results on top");
                InsertPosition::Top
            }
        },
        other => other,
    }
}

/// Create the group (if any) and the layers. On failure everything created
/// so far is removed again.
fn place<D: Document + ?Sized>(
    document: &mut D,
    decoded: &[DecodedLayer<'_>],
    group_name: Option<&str>,
    position: InsertPosition,
    target: Region,
) -> Result<Placement, OrchestratorError> {
    let mut placement = Placement::default();
    if decoded.is_empty() {
        return Ok(placement);
    }
    match create_layers(document, decoded, group_name, position, target, &mut placement) {
        Ok(()) => Ok(placement),
        Err(e) => {
            roll_back(document, &placement);
            Err(e)
        }
    }
}

fn create_layers<D: Document + ?Sized>(
    document: &mut D,
    decoded: &[DecodedLayer<'_>],
    group_name: Option<&str>,
    position: InsertPosition,
    target: Region,
    placement: &mut Placement,
) -> Result<(), OrchestratorError> {
    let mut next = match group_name {
        Some(name) => {
            let group = document.create_layer(name, LayerKind::Group, position)?;
            placement.group = Some(group);
            InsertPosition::Into(group)
        }
        None => position,
    };
    for layer in decoded {
        let id = document.create_layer(layer.name, LayerKind::Paint, next)?;
        placement.layers.push(id);
        document.set_layer_pixels(id, &layer.pixels.rgba, target)?;
        next = InsertPosition::Below(id);
    }
    Ok(())
}

fn roll_back<D: Document + ?Sized>(document: &mut D, placement: &Placement) {
    let created = match placement.group {
        Some(group) => vec![group],
        None => placement.layers.clone(),
    };
    for id in created {
        if let Err(e) = document.remove_layer(id) {
            tracing::warn!(layer = %id, error = %e, "Cannot remove partially placed layer");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use cyanic_core::document::MemoryDocument;
    use cyanic_core::imaging::encode_png_base64;
    use cyanic_core::instructions::ResizeDirective;
    use cyanic_core::result::{GenerationInfo, RESULTS_GROUP_NAME};
    use cyanic_core::types::{Mapping, Size};
    use serde_json::json;

    use super::*;

    fn png(width: u32, height: u32) -> String {
        encode_png_base64(&Pixels {
            size: Size::new(width, height),
            rgba: vec![200; (width * height * 4) as usize],
        })
        .unwrap()
    }

    fn shape(batch_size: u32, n_iter: u32) -> Option<Mapping> {
        match json!({"batch_size": batch_size, "n_iter": n_iter}) {
            serde_json::Value::Object(m) => Some(m),
            _ => None,
        }
    }

    fn seeded(images: Vec<String>, seeds: Vec<i64>, parameters: Option<Mapping>) -> ResultSet {
        ResultSet {
            images,
            info: Some(GenerationInfo {
                all_seeds: seeds,
                ..Default::default()
            }),
            parameters,
            caption: None,
        }
    }

    #[test]
    fn single_result_is_one_root_layer() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let results = seeded(vec![png(8, 8)], vec![7], shape(1, 1));
        let placement = reconcile(
            &mut doc,
            &results,
            Region::new(0, 0, 32, 32),
            &ProcessingInstructions::default(),
            true,
        )
        .unwrap();

        assert_eq!(placement.group, None);
        assert_eq!(doc.root_layers(), placement.layers.as_slice());
        let layer = doc.layer(placement.layers[0]).unwrap();
        assert_eq!(layer.name, "Seed: 7");
        assert_eq!(layer.pixels.as_ref().unwrap().0, Region::new(0, 0, 32, 32));
    }

    #[test]
    fn batch_is_grouped_in_order_after_grid_pruning() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let results = seeded(vec![png(8, 8), png(8, 8), png(8, 8)], vec![1, 2], shape(2, 1));
        let placement = reconcile(
            &mut doc,
            &results,
            Region::new(0, 0, 16, 16),
            &ProcessingInstructions::default(),
            true,
        )
        .unwrap();

        let group = placement.group.unwrap();
        assert_eq!(doc.layer(group).unwrap().name, RESULTS_GROUP_NAME);
        assert_eq!(doc.children_of(group), placement.layers.as_slice());
        let names: Vec<_> = placement
            .layers
            .iter()
            .map(|id| doc.layer(*id).unwrap().name.clone())
            .collect();
        assert_eq!(names, ["Seed: 1", "Seed: 2"]);
    }

    #[test]
    fn results_go_below_anchor_and_mask_is_reshown() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let bottom = doc.seed_layer("Background");
        let mask = doc.seed_layer("Mask");
        doc.set_layer_visibility(mask, false).unwrap();

        let instructions = ProcessingInstructions {
            anchor_layer: Some(mask),
            restore_visibility: vec![mask],
            ..Default::default()
        };
        let placement = reconcile(
            &mut doc,
            &seeded(vec![png(4, 4)], vec![3], None),
            Region::new(0, 0, 8, 8),
            &instructions,
            false,
        )
        .unwrap();

        assert_eq!(doc.root_layers(), [mask, placement.layers[0], bottom]);
        assert!(doc.layer_visibility(mask).unwrap());
    }

    #[test]
    fn missing_anchor_falls_back_to_top() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let bottom = doc.seed_layer("Background");
        let instructions = ProcessingInstructions {
            anchor_layer: Some(LayerId::new_v4()),
            ..Default::default()
        };
        let placement = reconcile(
            &mut doc,
            &seeded(vec![png(4, 4)], vec![3], None),
            Region::new(0, 0, 8, 8),
            &instructions,
            false,
        )
        .unwrap();
        assert_eq!(doc.root_layers(), [placement.layers[0], bottom]);
    }

    #[test]
    fn resize_directive_scales_back_to_original() {
        let mut doc = MemoryDocument::open(Size::new(1024, 1024));
        let instructions = ProcessingInstructions {
            resize: Some(ResizeDirective {
                original: Size::new(30, 60),
                negotiated: Size::new(512, 1024),
                scale: 512.0 / 30.0,
            }),
            ..Default::default()
        };
        let placement = reconcile(
            &mut doc,
            &seeded(vec![png(51, 102)], vec![1], None),
            Region::new(10, 10, 512, 1024),
            &instructions,
            false,
        )
        .unwrap();
        let (region, pixels) = doc.layer(placement.layers[0]).unwrap().pixels.clone().unwrap();
        assert_eq!(region, Region::new(10, 10, 30, 60));
        assert_eq!(pixels.len(), 30 * 60 * 4);
    }

    #[test]
    fn malformed_image_places_nothing_but_still_restores_visibility() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let mask = doc.seed_layer("Mask");
        doc.set_layer_visibility(mask, false).unwrap();
        let before = doc.layer_count();

        let instructions = ProcessingInstructions {
            restore_visibility: vec![mask],
            ..Default::default()
        };
        let results = seeded(vec![png(4, 4), "garbage".into()], vec![1, 2], None);
        let err = reconcile(&mut doc, &results, Region::new(0, 0, 8, 8), &instructions, false)
            .unwrap_err();

        assert_matches!(err, OrchestratorError::MalformedResponse(_));
        assert_eq!(doc.layer_count(), before);
        assert!(doc.layer_visibility(mask).unwrap());
    }

    #[test]
    fn everything_pruned_is_not_an_error() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let mask = doc.seed_layer("Mask");
        doc.set_layer_visibility(mask, false).unwrap();
        let instructions = ProcessingInstructions {
            restore_visibility: vec![mask],
            ..Default::default()
        };
        let placement = reconcile(
            &mut doc,
            &ResultSet::default(),
            Region::new(0, 0, 8, 8),
            &instructions,
            true,
        )
        .unwrap();
        assert_eq!(placement, Placement::default());
        assert!(doc.layer_visibility(mask).unwrap());
    }

    /// Fails every paint after the first `paints` succeed.
    struct FlakyDocument {
        inner: MemoryDocument,
        paints: usize,
    }

    impl Document for FlakyDocument {
        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
        fn create_default(&mut self, size: Size) -> Result<(), DocumentError> {
            self.inner.create_default(size)
        }
        fn region_bounds(&self, mode: cyanic_core::types::RegionMode) -> Result<Region, DocumentError> {
            self.inner.region_bounds(mode)
        }
        fn create_layer(
            &mut self,
            name: &str,
            kind: LayerKind,
            position: InsertPosition,
        ) -> Result<LayerId, DocumentError> {
            self.inner.create_layer(name, kind, position)
        }
        fn set_layer_pixels(&mut self, id: LayerId, pixels: &[u8], region: Region) -> Result<(), DocumentError> {
            if self.paints == 0 {
                return Err(DocumentError::Host("out of memory".into()));
            }
            self.paints -= 1;
            self.inner.set_layer_pixels(id, pixels, region)
        }
        fn set_layer_locked(&mut self, id: LayerId, locked: bool) -> Result<(), DocumentError> {
            self.inner.set_layer_locked(id, locked)
        }
        fn remove_layer(&mut self, id: LayerId) -> Result<(), DocumentError> {
            self.inner.remove_layer(id)
        }
        fn layer_visibility(&self, id: LayerId) -> Result<bool, DocumentError> {
            self.inner.layer_visibility(id)
        }
        fn set_layer_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), DocumentError> {
            self.inner.set_layer_visibility(id, visible)
        }
        fn resolve_layer_id(&self, id: LayerId) -> Option<LayerId> {
            self.inner.resolve_layer_id(id)
        }
    }

    #[test]
    fn failure_mid_batch_rolls_back_the_group() {
        let mut doc = FlakyDocument {
            inner: MemoryDocument::open(Size::new(64, 64)),
            paints: 1,
        };
        let results = seeded(vec![png(4, 4), png(4, 4)], vec![1, 2], None);
        let err = reconcile(
            &mut doc,
            &results,
            Region::new(0, 0, 8, 8),
            &ProcessingInstructions::default(),
            false,
        )
        .unwrap_err();
        assert_matches!(err, OrchestratorError::Document(DocumentError::Host(_)));
        assert_eq!(doc.inner.layer_count(), 0);
    }

    #[test]
    fn empty_target_is_rejected_before_any_change() {
        let mut doc = MemoryDocument::open(Size::new(64, 64));
        let results = seeded(vec![png(4, 4)], vec![1], None);
        let err = reconcile(
            &mut doc,
            &results,
            Region::new(0, 0, 0, 8),
            &ProcessingInstructions::default(),
            false,
        )
        .unwrap_err();
        assert_matches!(err, OrchestratorError::Document(DocumentError::InvalidRegion(_)));
        assert_eq!(doc.mutation_count(), 0);
    }
}
