//! Backend flavor detection and the compatibility normaliser.
//!
//! Contributors speak one generic vocabulary (`model`, `sampler`,
//! `refiner_start`, ...). [`normalize`] rewrites a merged payload into the
//! field names a given flavor of the remote service expects. It is a pure
//! function of the payload and the [`BackendProfile`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Mapping;

/// Step count the service uses when a request does not name one.
pub const DEFAULT_STEPS: u64 = 20;

/// Options present only on SD.Next. More than half of them must be present
/// for a server to be treated as SD.Next, so one renamed option does not
/// flip detection.
const SDNEXT_ONLY_OPTIONS: &[&str] = &[
    "cross_attention_sep",
    "cuda_compile_sep",
    "models_paths_sep_options",
    "outdir_sep_dirs",
    "outdir_sep_grids",
    "postprocessing_sep_img2img",
    "postprocessing_sep_upscalers",
    "sd_lyco",
];

// ---------------------------------------------------------------------------
// Flavor / profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendFlavor {
    /// AUTOMATIC1111 stable-diffusion-webui (and API-compatible forks).
    A1111,
    /// SD.Next.
    SdNext,
}

impl std::fmt::Display for BackendFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::A1111 => "A1111",
            Self::SdNext => "SD.Next",
        })
    }
}

/// What the connected server is and what it can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub flavor: BackendFlavor,
    /// SD.Next on its `original` backend cannot run refiners.
    pub supports_refiners: bool,
    /// The server prepends a grid image to multi-image results.
    pub returns_grid: bool,
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self::for_flavor(BackendFlavor::A1111)
    }
}

impl BackendProfile {
    pub fn for_flavor(flavor: BackendFlavor) -> Self {
        Self {
            flavor,
            supports_refiners: true,
            returns_grid: true,
        }
    }

    /// Work out the profile from the server's `options` response.
    pub fn detect(options: &Mapping) -> Self {
        let sdnext_points = SDNEXT_ONLY_OPTIONS
            .iter()
            .filter(|key| options.contains_key(**key))
            .count();
        let flavor = if sdnext_points * 2 > SDNEXT_ONLY_OPTIONS.len() {
            BackendFlavor::SdNext
        } else {
            BackendFlavor::A1111
        };

        let original_backend = options
            .get("sd_backend")
            .and_then(Value::as_str)
            .is_some_and(|b| b.eq_ignore_ascii_case("original"));
        let supports_refiners = !(flavor == BackendFlavor::SdNext && original_backend);

        let returns_grid = options
            .get("return_grid")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        tracing::info!(%flavor, supports_refiners, returns_grid, "Detected backend");
        Self {
            flavor,
            supports_refiners,
            returns_grid,
        }
    }
}

// ---------------------------------------------------------------------------
// Normaliser
// ---------------------------------------------------------------------------

/// Rewrite generic request fields into the flavor's wire names.
///
/// Unknown fields pass through unchanged.
pub fn normalize(payload: &Mapping, profile: &BackendProfile) -> Mapping {
    let mut data = payload.clone();
    let mut overrides = match data.remove("override_settings") {
        Some(Value::Object(existing)) => existing,
        _ => Mapping::new(),
    };

    move_into(&mut data, "model", &mut overrides, "sd_model_checkpoint");
    move_into(&mut data, "vae", &mut overrides, "sd_vae");
    move_into(&mut data, "color_correction", &mut overrides, "img2img_color_correction");

    rename(&mut data, "sampler", "sampler_name");
    rename(&mut data, "sampling_steps", "steps");
    rename(&mut data, "hr_steps", "hr_second_pass_steps");

    let refiner = data.remove("refiner").filter(is_named_refiner);
    let refiner_start = data.remove("refiner_start");
    if profile.supports_refiners {
        match profile.flavor {
            BackendFlavor::A1111 => {
                if let Some(refiner) = refiner {
                    data.insert("refiner_checkpoint".into(), refiner);
                }
                if let Some(start) = refiner_start {
                    data.insert("refiner_switch_at".into(), start);
                }
            }
            BackendFlavor::SdNext => {
                if let Some(refiner) = refiner {
                    overrides.insert("sd_model_refiner".into(), refiner);
                }
                // SD.Next reads `refiner_start` as is, next to the derived
                // second-pass fields.
                if let Some(start) = refiner_start {
                    if let Some(fraction) = start.as_f64() {
                        apply_sdnext_refiner_start(&mut data, fraction);
                    }
                    data.insert("refiner_start".into(), start);
                }
            }
        }
    } else if refiner.is_some() || refiner_start.is_some() {
        tracing::debug!(flavor = %profile.flavor, "Dropping refiner fields, backend has no refiner support");
    }

    if let Some(image) = data.remove("img2img_img") {
        data.insert("init_images".into(), Value::Array(vec![image]));
    }
    if let Some(image) = data.remove("inpaint_img") {
        data.insert("init_images".into(), Value::Array(vec![image]));
    }
    rename(&mut data, "mask_img", "mask");
    rename(&mut data, "batch_count", "n_iter");

    data.insert("override_settings".into(), Value::Object(overrides));
    data.insert("override_settings_restore_afterwards".into(), Value::Bool(false));
    data
}

/// `steps × start` steps run on the base model; the rest on the refiner,
/// which SD.Next drives through its second pass.
fn apply_sdnext_refiner_start(data: &mut Mapping, start: f64) {
    let steps = data.get("steps").and_then(Value::as_u64).unwrap_or(DEFAULT_STEPS);
    let base_steps = (steps as f64 * start).floor() as u64;
    let refiner_steps = steps.saturating_sub(base_steps);

    data.insert("enable_hr".into(), Value::Bool(true));
    data.insert("hr_force".into(), Value::Bool(true));
    data.insert("refiner_steps".into(), Value::from(refiner_steps));
    let prompt = data.get("prompt").cloned().unwrap_or_else(|| Value::from(""));
    let negative = data
        .get("negative_prompt")
        .cloned()
        .unwrap_or_else(|| Value::from(""));
    data.insert("refiner_prompt".into(), prompt);
    data.insert("refiner_negative_prompt".into(), negative);
}

// ---- private helpers ----

fn is_named_refiner(value: &Value) -> bool {
    value
        .as_str()
        .map(str::trim)
        .is_some_and(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
}

fn rename(data: &mut Mapping, from: &str, to: &str) {
    if let Some(value) = data.remove(from) {
        data.insert(to.to_string(), value);
    }
}

fn move_into(data: &mut Mapping, from: &str, target: &mut Mapping, to: &str) {
    if let Some(value) = data.remove(from) {
        target.insert(to.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> Mapping {
        match value {
            Value::Object(m) => m,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn a1111() -> BackendProfile {
        BackendProfile::for_flavor(BackendFlavor::A1111)
    }

    fn sdnext() -> BackendProfile {
        BackendProfile::for_flavor(BackendFlavor::SdNext)
    }

    // -- Detection --

    #[test]
    fn detects_sdnext_by_majority_of_unique_options() {
        let options = map(json!({
            "cross_attention_sep": "",
            "cuda_compile_sep": "",
            "models_paths_sep_options": "",
            "outdir_sep_dirs": "",
            "outdir_sep_grids": "",
            "sd_backend": "diffusers"
        }));
        let profile = BackendProfile::detect(&options);
        assert_eq!(profile.flavor, BackendFlavor::SdNext);
        assert!(profile.supports_refiners);
    }

    #[test]
    fn exactly_half_is_still_a1111() {
        let options = map(json!({
            "cross_attention_sep": "",
            "cuda_compile_sep": "",
            "models_paths_sep_options": "",
            "outdir_sep_dirs": ""
        }));
        assert_eq!(BackendProfile::detect(&options).flavor, BackendFlavor::A1111);
    }

    #[test]
    fn sdnext_original_backend_has_no_refiners() {
        let mut options = Mapping::new();
        for key in SDNEXT_ONLY_OPTIONS {
            options.insert((*key).to_string(), json!(""));
        }
        options.insert("sd_backend".into(), json!("Original"));
        let profile = BackendProfile::detect(&options);
        assert_eq!(profile.flavor, BackendFlavor::SdNext);
        assert!(!profile.supports_refiners);
    }

    #[test]
    fn return_grid_option_is_honoured() {
        let profile = BackendProfile::detect(&map(json!({"return_grid": false})));
        assert!(!profile.returns_grid);
        assert!(BackendProfile::detect(&Mapping::new()).returns_grid);
    }

    // -- Normalisation --

    #[test]
    fn common_rewrites() {
        let payload = map(json!({
            "model": "m.safetensors",
            "vae": "v.pt",
            "color_correction": true,
            "sampler": "DPM++ 2M",
            "sampling_steps": 25,
            "hr_steps": 10,
            "img2img_img": "aW1n",
            "mask_img": "bWFzaw==",
            "batch_count": 3,
            "seed": 7
        }));
        let out = normalize(&payload, &a1111());

        assert_eq!(out["override_settings"]["sd_model_checkpoint"], "m.safetensors");
        assert_eq!(out["override_settings"]["sd_vae"], "v.pt");
        assert_eq!(out["override_settings"]["img2img_color_correction"], true);
        assert_eq!(out["sampler_name"], "DPM++ 2M");
        assert_eq!(out["steps"], 25);
        assert_eq!(out["hr_second_pass_steps"], 10);
        assert_eq!(out["init_images"], json!(["aW1n"]));
        assert_eq!(out["mask"], "bWFzaw==");
        assert_eq!(out["n_iter"], 3);
        assert_eq!(out["seed"], 7);
        assert_eq!(out["override_settings_restore_afterwards"], false);
        for generic in ["model", "vae", "sampler", "img2img_img", "mask_img", "batch_count"] {
            assert!(!out.contains_key(generic), "{generic} should be rewritten");
        }
    }

    #[test]
    fn existing_override_settings_are_extended() {
        let payload = map(json!({"override_settings": {"CLIP_stop_at_last_layers": 2}, "model": "m"}));
        let out = normalize(&payload, &a1111());
        assert_eq!(out["override_settings"]["CLIP_stop_at_last_layers"], 2);
        assert_eq!(out["override_settings"]["sd_model_checkpoint"], "m");
    }

    #[test]
    fn a1111_refiner_uses_switch_fraction() {
        let payload = map(json!({"refiner": "r", "refiner_start": 0.8, "steps": 30}));
        let out = normalize(&payload, &a1111());
        assert_eq!(out["refiner_checkpoint"], "r");
        assert_eq!(out["refiner_switch_at"], 0.8);
        assert!(!out.contains_key("refiner_steps"));
    }

    #[test]
    fn sdnext_refiner_derives_step_count_and_copies_prompts() {
        let payload = map(json!({
            "refiner": "r",
            "refiner_start": 0.8,
            "steps": 30,
            "prompt": "p",
            "negative_prompt": "n"
        }));
        let out = normalize(&payload, &sdnext());
        assert_eq!(out["override_settings"]["sd_model_refiner"], "r");
        assert_eq!(out["enable_hr"], true);
        assert_eq!(out["hr_force"], true);
        assert_eq!(out["refiner_steps"], 6);
        assert_eq!(out["refiner_prompt"], "p");
        assert_eq!(out["refiner_negative_prompt"], "n");
        assert_eq!(out.get("refiner_start"), Some(&json!(0.8)));
    }

    #[test]
    fn sdnext_refiner_without_steps_uses_service_default() {
        let payload = map(json!({"refiner_start": 0.75}));
        let out = normalize(&payload, &sdnext());
        assert_eq!(out["refiner_steps"], 5);
        assert_eq!(out["refiner_prompt"], "");
    }

    #[test]
    fn none_refiner_is_dropped() {
        let payload = map(json!({"refiner": "None"}));
        let out = normalize(&payload, &a1111());
        assert!(!out.contains_key("refiner"));
        assert!(!out.contains_key("refiner_checkpoint"));
    }

    #[test]
    fn refiner_dropped_when_unsupported() {
        let profile = BackendProfile {
            supports_refiners: false,
            ..sdnext()
        };
        let payload = map(json!({"refiner": "r", "refiner_start": 0.5, "steps": 20}));
        let out = normalize(&payload, &profile);
        assert!(!out.contains_key("refiner_steps"));
        assert!(!out["override_settings"]
            .as_object()
            .unwrap()
            .contains_key("sd_model_refiner"));
    }

    #[test]
    fn normalisation_is_deterministic() {
        let payload = map(json!({"model": "a", "refiner_start": 0.5, "steps": 10}));
        assert_eq!(normalize(&payload, &sdnext()), normalize(&payload, &sdnext()));
    }

    #[test]
    fn unknown_fields_pass_through() {
        let payload = map(json!({"alwayson_scripts": {"X": {"args": [1]}}, "tiling": true}));
        let out = normalize(&payload, &a1111());
        assert_eq!(out["alwayson_scripts"], payload["alwayson_scripts"]);
        assert_eq!(out["tiling"], true);
    }
}
