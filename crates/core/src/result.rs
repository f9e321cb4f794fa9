//! Result Sets returned by the remote service, their pruning and the
//! placement plan the reconciler executes against a document.

use serde::{Deserialize, Serialize};

use crate::instructions::ProcessingInstructions;
use crate::types::{LayerId, Mapping, Region};

/// Name of the group holding multi-image results.
pub const RESULTS_GROUP_NAME: &str = "Results";
/// Name of a result layer when nothing better is known.
pub const DEFAULT_LAYER_NAME: &str = "Image";

// ---------------------------------------------------------------------------
// Result Set
// ---------------------------------------------------------------------------

/// Generation metadata returned beside the images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationInfo {
    #[serde(default)]
    pub all_seeds: Vec<i64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub infotexts: Vec<String>,
    /// Everything else the service sent.
    #[serde(flatten)]
    pub extra: Mapping,
}

/// The request parameters the service echoes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchShape {
    pub batch_size: u32,
    pub batch_count: u32,
}

impl BatchShape {
    /// Read `batch_size` and `n_iter` from echoed parameters. Missing values
    /// count as 1; a mapping with neither yields `None`.
    pub fn from_parameters(parameters: &Mapping) -> Option<Self> {
        let read = |key: &str| {
            parameters
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
        };
        let batch_size = read("batch_size");
        let batch_count = read("n_iter").or_else(|| read("batch_count"));
        if batch_size.is_none() && batch_count.is_none() {
            return None;
        }
        Some(Self {
            batch_size: batch_size.unwrap_or(1).max(1),
            batch_count: batch_count.unwrap_or(1).max(1),
        })
    }

    pub fn expected(&self) -> usize {
        self.batch_size as usize * self.batch_count as usize
    }
}

/// One response from the service, whatever the request kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Base64-encoded images in the order the service returned them.
    pub images: Vec<String>,
    pub info: Option<GenerationInfo>,
    /// Echoed request parameters, when the service sent them.
    pub parameters: Option<Mapping>,
    /// Caption from an interrogation.
    pub caption: Option<String>,
}

impl ResultSet {
    /// Expected image count, when the response declares its batch shape.
    pub fn expected_count(&self) -> Option<usize> {
        self.parameters
            .as_ref()
            .and_then(BatchShape::from_parameters)
            .map(|shape| shape.expected())
    }

    pub fn seed_at(&self, index: usize) -> Option<i64> {
        self.info.as_ref()?.all_seeds.get(index).copied()
    }
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

/// Trim `images` down to `expected`.
///
/// With `grid` set the leading image is a composite and goes first; any
/// remaining excess is cut from the tail. Fewer images than expected are
/// returned as they are.
pub fn prune_images<T>(mut images: Vec<T>, expected: usize, grid: bool) -> Vec<T> {
    if images.len() <= expected {
        return images;
    }
    if grid {
        images.remove(0);
    }
    images.truncate(expected);
    images
}

// ---------------------------------------------------------------------------
// Placement plan
// ---------------------------------------------------------------------------

/// Where a new layer (or group) goes in the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    /// Top of the document root.
    Top,
    /// Directly below this layer, inside its parent.
    Below(LayerId),
    /// Top of this group.
    Into(LayerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLayer {
    pub name: String,
    /// Base64-encoded image.
    pub image: String,
}

/// Everything the reconciler will do to the document for one Result Set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPlan {
    /// Region each image is scaled to and painted at.
    pub target: Region,
    pub layers: Vec<PlannedLayer>,
    /// Group to create around the layers, if there is more than one.
    pub group: Option<String>,
    pub position: InsertPosition,
    pub restore_visibility: Vec<LayerId>,
}

impl PlacementPlan {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Decide what a Result Set turns into.
///
/// `region` is the job's target region; a resize or explicit placement size
/// in `instructions` replaces its extent but keeps its origin.
pub fn plan_placement(
    results: &ResultSet,
    region: Region,
    instructions: &ProcessingInstructions,
    grid: bool,
) -> PlacementPlan {
    let indexed: Vec<(usize, &String)> = results.images.iter().enumerate().collect();
    let kept = match results.expected_count() {
        Some(expected) => prune_images(indexed, expected, grid),
        None => indexed,
    };
    if kept.len() < results.images.len() {
        tracing::debug!(
            received = results.images.len(),
            kept = kept.len(),
            grid,
            "Pruned result images",
        );
    }

    // Seeds line up with the pruned images, not with the raw list.
    let layers: Vec<PlannedLayer> = kept
        .into_iter()
        .enumerate()
        .filter(|(_, (_, image))| !image.is_empty())
        .map(|(position, (_, image))| PlannedLayer {
            name: layer_name(results, instructions, position),
            image: image.clone(),
        })
        .collect();

    let target = match instructions.placement_size() {
        Some(size) => region.with_size(size),
        None => region,
    };

    PlacementPlan {
        target,
        group: (layers.len() > 1).then(|| RESULTS_GROUP_NAME.to_string()),
        layers,
        position: instructions
            .anchor_layer
            .map_or(InsertPosition::Top, InsertPosition::Below),
        restore_visibility: instructions.restore_visibility.clone(),
    }
}

fn layer_name(results: &ResultSet, instructions: &ProcessingInstructions, index: usize) -> String {
    if let Some(name) = instructions.layer_name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match results.seed_at(index) {
        Some(seed) => format!("Seed: {seed}"),
        None => DEFAULT_LAYER_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::instructions::ResizeDirective;
    use crate::types::Size;

    fn images(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("img{i}")).collect()
    }

    fn params(batch_size: u32, n_iter: u32) -> Option<Mapping> {
        match json!({"batch_size": batch_size, "n_iter": n_iter}) {
            serde_json::Value::Object(m) => Some(m),
            _ => None,
        }
    }

    // -- Pruning --

    #[test]
    fn grid_drops_leading_image() {
        assert_eq!(prune_images(vec![0, 1, 2], 2, true), vec![1, 2]);
    }

    #[test]
    fn without_grid_tail_is_truncated() {
        assert_eq!(prune_images(vec![0, 1, 2], 2, false), vec![0, 1]);
    }

    #[test]
    fn grid_then_tail() {
        assert_eq!(prune_images(vec![0, 1, 2, 3, 4], 2, true), vec![1, 2]);
    }

    #[test]
    fn fewer_than_expected_is_untouched() {
        assert_eq!(prune_images(vec![0], 4, true), vec![0]);
    }

    #[test]
    fn expected_count_from_parameters() {
        let results = ResultSet {
            parameters: params(2, 3),
            ..Default::default()
        };
        assert_eq!(results.expected_count(), Some(6));
        assert_eq!(ResultSet::default().expected_count(), None);
    }

    // -- Planning --

    #[test]
    fn single_image_becomes_one_layer_named_by_seed() {
        let results = ResultSet {
            images: images(1),
            info: Some(GenerationInfo {
                all_seeds: vec![42],
                ..Default::default()
            }),
            parameters: params(1, 1),
            caption: None,
        };
        let plan = plan_placement(
            &results,
            Region::new(0, 0, 512, 512),
            &ProcessingInstructions::default(),
            true,
        );
        assert_eq!(plan.layers.len(), 1);
        assert_eq!(plan.layers[0].name, "Seed: 42");
        assert_eq!(plan.group, None);
        assert_eq!(plan.position, InsertPosition::Top);
    }

    #[test]
    fn batch_with_grid_is_grouped_and_named_per_image() {
        let results = ResultSet {
            images: images(3),
            info: Some(GenerationInfo {
                all_seeds: vec![10, 11],
                ..Default::default()
            }),
            parameters: params(2, 1),
            caption: None,
        };
        let plan = plan_placement(
            &results,
            Region::new(0, 0, 512, 512),
            &ProcessingInstructions::default(),
            true,
        );
        assert_eq!(plan.group.as_deref(), Some(RESULTS_GROUP_NAME));
        let names: Vec<_> = plan.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Seed: 10", "Seed: 11"]);
        let kept: Vec<_> = plan.layers.iter().map(|l| l.image.as_str()).collect();
        assert_eq!(kept, ["img1", "img2"]);
    }

    #[test]
    fn resize_directive_restores_original_extent() {
        let instructions = ProcessingInstructions {
            resize: Some(ResizeDirective {
                original: Size::new(300, 600),
                negotiated: Size::new(512, 1024),
                scale: 512.0 / 300.0,
            }),
            ..Default::default()
        };
        let results = ResultSet {
            images: images(1),
            ..Default::default()
        };
        let plan = plan_placement(&results, Region::new(10, 20, 512, 1024), &instructions, false);
        assert_eq!(plan.target, Region::new(10, 20, 300, 600));
    }

    #[test]
    fn anchor_and_explicit_name() {
        let anchor = LayerId::new_v4();
        let instructions = ProcessingInstructions {
            anchor_layer: Some(anchor),
            restore_visibility: vec![anchor],
            layer_name: Some("Upscaled".into()),
            ..Default::default()
        };
        let results = ResultSet {
            images: images(1),
            info: Some(GenerationInfo {
                all_seeds: vec![1],
                ..Default::default()
            }),
            ..Default::default()
        };
        let plan = plan_placement(&results, Region::new(0, 0, 64, 64), &instructions, false);
        assert_eq!(plan.position, InsertPosition::Below(anchor));
        assert_eq!(plan.layers[0].name, "Upscaled");
        assert_eq!(plan.restore_visibility, vec![anchor]);
    }

    #[test]
    fn empty_images_are_skipped_and_unnamed_default() {
        let results = ResultSet {
            images: vec!["a".into(), String::new(), "c".into()],
            ..Default::default()
        };
        let plan = plan_placement(
            &results,
            Region::new(0, 0, 64, 64),
            &ProcessingInstructions::default(),
            false,
        );
        assert_eq!(plan.layers.len(), 2);
        assert!(plan.layers.iter().all(|l| l.name == DEFAULT_LAYER_NAME));
    }

    #[test]
    fn nothing_left_still_carries_visibility_restoration() {
        let layer = LayerId::new_v4();
        let instructions = ProcessingInstructions {
            restore_visibility: vec![layer],
            ..Default::default()
        };
        let plan = plan_placement(&ResultSet::default(), Region::new(0, 0, 8, 8), &instructions, true);
        assert!(plan.is_empty());
        assert_eq!(plan.restore_visibility, vec![layer]);
    }

    #[test]
    fn generation_info_keeps_unknown_fields() {
        let info: GenerationInfo = serde_json::from_value(json!({
            "all_seeds": [1, 2],
            "width": 512,
            "sampler_name": "Euler a"
        }))
        .unwrap();
        assert_eq!(info.all_seeds, vec![1, 2]);
        assert_eq!(info.height, None);
        assert_eq!(info.extra["sampler_name"], "Euler a");
    }
}
