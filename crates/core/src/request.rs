//! Request Builder: merges contributor snapshots into one payload, pulls
//! out the Processing Instructions side channel and negotiates the
//! generation size.

use serde_json::Value;

use crate::contributor::Contributor;
use crate::error::CoreError;
use crate::instructions::{ProcessingInstructions, ResizeDirective, INSTRUCTIONS_KEY};
use crate::merge::deep_merge;
use crate::types::{Mapping, Region, RequestKind, Size};

// ---------------------------------------------------------------------------
// Size limits
// ---------------------------------------------------------------------------

/// Default lower bound on the shorter generation side.
pub const DEFAULT_MIN_SIZE: u32 = 512;
/// Default upper bound on the longer generation side.
pub const DEFAULT_MAX_SIZE: u32 = 2048;

/// Bounds applied to the generation size before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub min_size: u32,
    pub max_size: u32,
    pub max_size_enabled: bool,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            max_size_enabled: false,
        }
    }
}

impl SizeLimits {
    fn validate(&self) -> Result<(), CoreError> {
        if self.max_size_enabled && self.max_size < self.min_size {
            return Err(CoreError::Validation(format!(
                "max_size ({}) must not be smaller than min_size ({})",
                self.max_size, self.min_size
            )));
        }
        Ok(())
    }
}

/// Work out whether `size` must be rescaled to satisfy `limits`.
///
/// Raising the shorter side to `min_size` is checked first; capping the
/// longer side at `max_size` only applies when the minimum did not. Aspect
/// ratio is preserved in both cases.
pub fn negotiate_size(size: Size, limits: &SizeLimits) -> Option<ResizeDirective> {
    let Size { width, height } = size;
    if width == 0 || height == 0 {
        return None;
    }
    let shorter = width.min(height);
    let longer = width.max(height);

    let (scale, new_shorter, new_longer) = if limits.min_size > 0 && shorter < limits.min_size {
        let scale = f64::from(limits.min_size) / f64::from(shorter);
        (scale, limits.min_size, scale_side(longer, scale))
    } else if limits.max_size_enabled && longer > limits.max_size {
        let scale = f64::from(limits.max_size) / f64::from(longer);
        (scale, scale_side(shorter, scale), limits.max_size)
    } else {
        return None;
    };

    let negotiated = if width <= height {
        Size::new(new_shorter, new_longer)
    } else {
        Size::new(new_longer, new_shorter)
    };

    Some(ResizeDirective {
        original: size,
        negotiated,
        scale,
    })
}

fn scale_side(side: u32, scale: f64) -> u32 {
    ((f64::from(side) * scale).round() as u32).max(1)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Output of [`RequestBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    /// Merged payload with the instructions key removed.
    pub payload: Mapping,
    pub instructions: ProcessingInstructions,
}

/// Aggregates contributor snapshots into a single generic payload.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    limits: SizeLimits,
    base: Mapping,
}

impl RequestBuilder {
    pub fn new(limits: SizeLimits) -> Self {
        Self {
            limits,
            base: Mapping::new(),
        }
    }

    /// Fields every payload starts with, before any contributor runs.
    pub fn with_base(mut self, base: Mapping) -> Self {
        self.base = base;
        self
    }

    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    /// Ask every contributor for its snapshot, in order, and merge them.
    pub fn build(
        &self,
        kind: RequestKind,
        contributors: &mut [Box<dyn Contributor>],
        region: Region,
    ) -> Result<BuiltRequest, CoreError> {
        let snapshots = contributors.iter_mut().map(|c| {
            let snapshot = c.snapshot();
            tracing::trace!(contributor = c.name(), keys = snapshot.len(), "Collected snapshot");
            snapshot
        });
        self.build_from_snapshots(kind, snapshots, region)
    }

    /// Merge already-collected snapshots. `build` delegates here.
    pub fn build_from_snapshots<I>(
        &self,
        kind: RequestKind,
        snapshots: I,
        region: Region,
    ) -> Result<BuiltRequest, CoreError>
    where
        I: IntoIterator<Item = Mapping>,
    {
        self.limits.validate()?;
        if kind.has_dimensions() && region.is_empty() {
            return Err(CoreError::Validation(format!(
                "Target region {}x{} has no area",
                region.width, region.height
            )));
        }

        let mut payload = Mapping::new();
        if kind.has_dimensions() {
            payload.insert("width".into(), Value::from(region.width));
            payload.insert("height".into(), Value::from(region.height));
        }
        deep_merge(&mut payload, self.base.clone());

        let mut instructions = Mapping::new();
        for mut snapshot in snapshots {
            match snapshot.remove(INSTRUCTIONS_KEY) {
                Some(Value::Object(fragment)) => merge_instructions(&mut instructions, fragment),
                Some(Value::Null) | None => {}
                Some(other) => {
                    return Err(CoreError::Validation(format!(
                        "Instructions fragment must be a mapping, got {other}"
                    )));
                }
            }
            deep_merge(&mut payload, snapshot);
        }

        if kind.has_dimensions() {
            let requested = Size::new(
                read_dimension(&payload, "width").unwrap_or(region.width),
                read_dimension(&payload, "height").unwrap_or(region.height),
            );
            if let Some(directive) = negotiate_size(requested, &self.limits) {
                tracing::debug!(
                    from_w = directive.original.width,
                    from_h = directive.original.height,
                    to_w = directive.negotiated.width,
                    to_h = directive.negotiated.height,
                    "Negotiated generation size",
                );
                payload.insert("width".into(), Value::from(directive.negotiated.width));
                payload.insert("height".into(), Value::from(directive.negotiated.height));
                let resize = serde_json::to_value(directive)
                    .map_err(|e| CoreError::Internal(format!("resize directive: {e}")))?;
                instructions.insert("resize".into(), resize);
            }
        }

        Ok(BuiltRequest {
            payload,
            instructions: ProcessingInstructions::from_mapping(instructions)?,
        })
    }
}

/// Layer lists accumulate across contributors; every other directive is
/// last-writer-wins like the payload.
const ACCUMULATED_DIRECTIVES: &[&str] = &["restore_visibility"];

fn merge_instructions(instructions: &mut Mapping, mut fragment: Mapping) {
    for &key in ACCUMULATED_DIRECTIVES {
        let Some(Value::Array(incoming)) = fragment.remove(key) else {
            continue;
        };
        let entry = instructions
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(existing) => {
                for item in incoming {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            other => *other = Value::Array(incoming),
        }
    }
    deep_merge(instructions, fragment);
}

fn read_dimension(payload: &Mapping, key: &str) -> Option<u32> {
    match payload.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
