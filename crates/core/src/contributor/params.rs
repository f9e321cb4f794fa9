//! Numeric and model parameters.

use serde::Serialize;

use super::{to_mapping, Contributor};
use crate::settings::{keys, SettingsStore};
use crate::types::{Mapping, Size};

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

/// Seed and variation seed. `-1` asks the service for a random one.
#[derive(Debug, Clone, Serialize)]
pub struct Seed {
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f64,
}

impl Seed {
    pub fn random() -> Self {
        Self {
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
        }
    }

    /// Build from free-text fields; blank or unparsable text means random.
    pub fn from_text(seed: &str, subseed: &str, subseed_strength: f64) -> Self {
        Self {
            seed: parse_seed(seed),
            subseed: parse_seed(subseed),
            subseed_strength: subseed_strength.clamp(0.0, 1.0),
        }
    }
}

fn parse_seed(text: &str) -> i64 {
    let text = text.trim();
    if text.is_empty() {
        return -1;
    }
    text.parse().unwrap_or_else(|_| {
        tracing::warn!(seed = text, "Ignoring non-numeric seed");
        -1
    })
}

impl Contributor for Seed {
    fn name(&self) -> &str {
        "seed"
    }

    fn snapshot(&mut self) -> Mapping {
        to_mapping(&*self)
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Images per batch and number of batches.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub batch_size: u32,
    pub batch_count: u32,
}

impl Batch {
    pub fn from_settings(store: &dyn SettingsStore) -> Self {
        Self {
            batch_size: keys::BATCH_SIZE.get_or_default(store).max(1),
            batch_count: keys::BATCH_COUNT.get_or_default(store).max(1),
        }
    }
}

impl Contributor for Batch {
    fn name(&self) -> &str {
        "batch"
    }

    fn snapshot(&mut self) -> Mapping {
        to_mapping(&*self)
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Second-stage model and the fraction of steps after which it takes over.
#[derive(Debug, Clone, PartialEq)]
pub struct Refiner {
    pub checkpoint: String,
    pub start: f64,
}

/// Model, VAE, sampler, step count, CFG scale and optional refiner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sampling {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vae: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(skip)]
    pub refiner: Option<Refiner>,
}

impl Sampling {
    pub fn from_settings(store: &dyn SettingsStore) -> Self {
        let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);
        let refiner = non_empty(keys::REFINER.get_or_default(store)).map(|checkpoint| Refiner {
            checkpoint,
            start: keys::REFINER_START.get_or_default(store),
        });
        Self {
            model: non_empty(keys::MODEL.get_or_default(store)),
            vae: non_empty(keys::VAE.get_or_default(store)),
            sampler: non_empty(keys::SAMPLER.get_or_default(store)),
            steps: Some(keys::STEPS.get_or_default(store)).filter(|s| *s > 0),
            cfg_scale: Some(keys::CFG_SCALE.get_or_default(store)),
            refiner,
        }
    }
}

impl Contributor for Sampling {
    fn name(&self) -> &str {
        "sampling"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = to_mapping(&*self);
        if let Some(refiner) = &self.refiner {
            data.insert("refiner".into(), refiner.checkpoint.clone().into());
            data.insert("refiner_start".into(), refiner.start.into());
        }
        data
    }
}

// ---------------------------------------------------------------------------
// Denoise / color correction
// ---------------------------------------------------------------------------

/// How far img2img may move away from the init image.
#[derive(Debug, Clone, Copy)]
pub struct Denoise(pub f64);

impl Contributor for Denoise {
    fn name(&self) -> &str {
        "denoise"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("denoising_strength".into(), self.0.clamp(0.0, 1.0).into());
        data
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColorCorrection(pub bool);

impl Contributor for ColorCorrection {
    fn name(&self) -> &str {
        "color_correction"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("color_correction".into(), self.0.into());
        data
    }
}

// ---------------------------------------------------------------------------
// Hires fix
// ---------------------------------------------------------------------------

/// Two-pass generation: a first pass with the shorter side at `min_size`,
/// then an upscale pass to the target size.
#[derive(Debug, Clone)]
pub struct HiresFix {
    pub enabled: bool,
    /// Turn on automatically when the target exceeds `auto_enable_min`.
    pub auto_enable: bool,
    pub auto_enable_min: u32,
    pub min_size: u32,
    pub upscaler: String,
    pub steps: u32,
    pub denoising_strength: f64,
    /// Final size, normally the target region.
    pub target: Size,
}

impl HiresFix {
    pub fn from_settings(store: &dyn SettingsStore, target: Size) -> Self {
        Self {
            enabled: keys::HIRES_ENABLED.get_or_default(store),
            auto_enable: keys::HIRES_AUTO_ENABLE.get_or_default(store),
            auto_enable_min: keys::HIRES_AUTO_ENABLE_MIN.get_or_default(store),
            min_size: keys::HIRES_MIN_SIZE.get_or_default(store),
            upscaler: keys::HIRES_UPSCALER.get_or_default(store),
            steps: keys::HIRES_STEPS.get_or_default(store),
            denoising_strength: keys::HIRES_DENOISING_STRENGTH.get_or_default(store),
            target,
        }
    }

    pub fn is_active(&self) -> bool {
        let Size { width, height } = self.target;
        self.enabled
            || (self.auto_enable && (width > self.auto_enable_min || height > self.auto_enable_min))
    }

    /// First-pass size: shorter side at `min_size`, aspect ratio kept.
    pub fn first_pass(&self) -> Size {
        let Size { width, height } = self.target;
        if width == 0 || height == 0 || self.min_size == 0 {
            return self.target;
        }
        let scale = |side: u32, shorter: u32| {
            ((u64::from(side) * u64::from(self.min_size)) / u64::from(shorter)) as u32
        };
        if width < height {
            Size::new(self.min_size, scale(height, width))
        } else {
            Size::new(scale(width, height), self.min_size)
        }
    }
}

impl Contributor for HiresFix {
    fn name(&self) -> &str {
        "hires_fix"
    }

    fn snapshot(&mut self) -> Mapping {
        let mut data = Mapping::new();
        if !self.is_active() {
            data.insert("enable_hr".into(), false.into());
            return data;
        }
        let first = self.first_pass();
        data.insert("enable_hr".into(), true.into());
        data.insert("hr_upscaler".into(), self.upscaler.clone().into());
        data.insert("hr_steps".into(), self.steps.into());
        data.insert("denoising_strength".into(), self.denoising_strength.into());
        data.insert("hr_resize_x".into(), self.target.width.into());
        data.insert("hr_resize_y".into(), self.target.height.into());
        data.insert("width".into(), first.width.into());
        data.insert("height".into(), first.height.into());
        data
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::settings::JsonSettings;

    #[test]
    fn blank_seed_is_random() {
        let mut seed = Seed::from_text("", "  ", 0.25);
        let snapshot = seed.snapshot();
        assert_eq!(snapshot["seed"], -1);
        assert_eq!(snapshot["subseed"], -1);
        assert_eq!(snapshot["subseed_strength"], 0.25);
    }

    #[test]
    fn numeric_seed_is_kept() {
        let mut seed = Seed::from_text("1234", "nope", 2.0);
        let snapshot = seed.snapshot();
        assert_eq!(snapshot["seed"], 1234);
        assert_eq!(snapshot["subseed"], -1);
        assert_eq!(snapshot["subseed_strength"], 1.0);
    }

    #[test]
    fn batch_reads_settings() {
        let mut store = JsonSettings::with_defaults();
        keys::BATCH_SIZE.set(&mut store, &4).unwrap();
        let mut batch = Batch::from_settings(&store);
        assert_eq!(batch.snapshot(), json_map(json!({"batch_size": 4, "batch_count": 1})));
    }

    #[test]
    fn sampling_omits_blank_fields_and_adds_refiner() {
        let mut store = JsonSettings::with_defaults();
        keys::MODEL.set(&mut store, &"sdxl.safetensors".to_string()).unwrap();
        keys::REFINER.set(&mut store, &"refiner.safetensors".to_string()).unwrap();
        let snapshot = Sampling::from_settings(&store).snapshot();

        assert_eq!(snapshot["model"], "sdxl.safetensors");
        assert!(!snapshot.contains_key("vae"));
        assert_eq!(snapshot["sampler"], "Euler a");
        assert_eq!(snapshot["steps"], 20);
        assert_eq!(snapshot["refiner"], "refiner.safetensors");
        assert_eq!(snapshot["refiner_start"], 0.8);
    }

    #[test]
    fn hires_disabled_only_sets_flag() {
        let store = JsonSettings::with_defaults();
        let mut hires = HiresFix::from_settings(&store, Size::new(768, 768));
        assert_eq!(hires.snapshot(), json_map(json!({"enable_hr": false})));
    }

    #[test]
    fn hires_scales_first_pass_down() {
        let store = JsonSettings::with_defaults();
        let mut hires = HiresFix::from_settings(&store, Size::new(1024, 2048));
        hires.enabled = true;
        let snapshot = hires.snapshot();

        assert_eq!(snapshot["enable_hr"], true);
        assert_eq!(snapshot["width"], 512);
        assert_eq!(snapshot["height"], 1024);
        assert_eq!(snapshot["hr_resize_x"], 1024);
        assert_eq!(snapshot["hr_resize_y"], 2048);
        assert_eq!(snapshot["hr_upscaler"], "Latent");
    }

    #[test]
    fn hires_auto_enables_above_threshold() {
        let store = JsonSettings::with_defaults();
        let mut hires = HiresFix::from_settings(&store, Size::new(1536, 1024));
        hires.auto_enable = true;
        assert!(hires.is_active());
        assert_eq!(hires.first_pass(), Size::new(768, 512));

        hires.target = Size::new(1024, 1024);
        assert!(!hires.is_active());
    }

    #[test]
    fn denoise_is_clamped() {
        assert_eq!(Denoise(1.5).snapshot()["denoising_strength"], 1.0);
    }

    fn json_map(value: serde_json::Value) -> Mapping {
        match value {
            serde_json::Value::Object(m) => m,
            _ => Mapping::new(),
        }
    }
}
