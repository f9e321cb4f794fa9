//! Built-in defaults and typed keys for every setting the crate reads.

use std::sync::OnceLock;

use serde_json::{json, Value};

use super::{lookup, SettingKey, SettingsPath, CURRENT_VERSION, VERSION_KEY};

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub const SERVER_HOST: SettingKey<String> = SettingKey::new(&["server", "host"]);
/// Ask the service to keep its own copy of generated images.
pub const SAVE_IMAGES: SettingKey<bool> = SettingKey::new(&["server", "save_images"]);

// ---------------------------------------------------------------------------
// Previews and polling
// ---------------------------------------------------------------------------

pub const PREVIEWS_ENABLED: SettingKey<bool> = SettingKey::new(&["previews", "enabled"]);
pub const PREVIEWS_REFRESH_SECONDS: SettingKey<f64> =
    SettingKey::new(&["previews", "refresh_seconds"]);

// ---------------------------------------------------------------------------
// Generation size
// ---------------------------------------------------------------------------

pub const MIN_SIZE: SettingKey<u32> = SettingKey::new(&["generation", "min_size"]);
pub const MAX_SIZE: SettingKey<u32> = SettingKey::new(&["generation", "max_size"]);
pub const MAX_SIZE_ENABLED: SettingKey<bool> = SettingKey::new(&["generation", "max_size_enabled"]);
/// Seconds without a progress change before a job is abandoned. 0 disables.
pub const IDLE_TIMEOUT_SECONDS: SettingKey<u64> =
    SettingKey::new(&["generation", "idle_timeout_seconds"]);

// ---------------------------------------------------------------------------
// Model and sampling defaults
// ---------------------------------------------------------------------------

pub const MODEL: SettingKey<String> = SettingKey::new(&["defaults", "model"]);
pub const VAE: SettingKey<String> = SettingKey::new(&["defaults", "vae"]);
pub const SAMPLER: SettingKey<String> = SettingKey::new(&["defaults", "sampler"]);
pub const STEPS: SettingKey<u32> = SettingKey::new(&["defaults", "steps"]);
pub const CFG_SCALE: SettingKey<f64> = SettingKey::new(&["defaults", "cfg_scale"]);
pub const DENOISING_STRENGTH: SettingKey<f64> = SettingKey::new(&["defaults", "denoising_strength"]);
pub const COLOR_CORRECTION: SettingKey<bool> = SettingKey::new(&["defaults", "color_correction"]);
pub const REFINER: SettingKey<String> = SettingKey::new(&["defaults", "refiner"]);
pub const REFINER_START: SettingKey<f64> = SettingKey::new(&["defaults", "refiner_start"]);

pub const BATCH_SIZE: SettingKey<u32> = SettingKey::new(&["batch", "batch_size"]);
pub const BATCH_COUNT: SettingKey<u32> = SettingKey::new(&["batch", "batch_count"]);

// ---------------------------------------------------------------------------
// Hires fix
// ---------------------------------------------------------------------------

pub const HIRES_ENABLED: SettingKey<bool> = SettingKey::new(&["hires_fix", "enabled"]);
pub const HIRES_AUTO_ENABLE: SettingKey<bool> = SettingKey::new(&["hires_fix", "auto_enable"]);
pub const HIRES_AUTO_ENABLE_MIN: SettingKey<u32> = SettingKey::new(&["hires_fix", "auto_enable_min"]);
pub const HIRES_MIN_SIZE: SettingKey<u32> = SettingKey::new(&["hires_fix", "min_size"]);
pub const HIRES_UPSCALER: SettingKey<String> = SettingKey::new(&["hires_fix", "upscaler"]);
pub const HIRES_STEPS: SettingKey<u32> = SettingKey::new(&["hires_fix", "steps"]);
pub const HIRES_DENOISING_STRENGTH: SettingKey<f64> =
    SettingKey::new(&["hires_fix", "denoising_strength"]);

// ---------------------------------------------------------------------------
// Inpainting
// ---------------------------------------------------------------------------

pub const INPAINT_MASK_BLUR: SettingKey<u32> = SettingKey::new(&["inpaint", "mask_blur"]);
pub const INPAINT_MASK_MODE: SettingKey<u32> = SettingKey::new(&["inpaint", "mask_mode"]);
pub const INPAINT_MASKED_CONTENT: SettingKey<u32> = SettingKey::new(&["inpaint", "masked_content"]);
pub const INPAINT_AREA: SettingKey<u32> = SettingKey::new(&["inpaint", "inpaint_area"]);
pub const INPAINT_PADDING: SettingKey<u32> = SettingKey::new(&["inpaint", "padding"]);

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

pub const SAVE_PROMPTS: SettingKey<bool> = SettingKey::new(&["prompts", "save_prompts"]);
pub const SHARE_PROMPTS: SettingKey<bool> = SettingKey::new(&["prompts", "share_prompts"]);
/// Modes that keep their own prompt even when sharing is on.
pub const EXCLUDE_SHARING: SettingKey<Vec<String>> =
    SettingKey::new(&["prompts", "exclude_sharing"]);

/// Where the prompt history of `mode` lives (`shared` for the shared slot).
pub fn prompt_history(mode: &str) -> SettingsPath {
    SettingsPath::new(["prompts", mode])
}

// ---------------------------------------------------------------------------
// Upscale and interrogate
// ---------------------------------------------------------------------------

pub const UPSCALER: SettingKey<String> = SettingKey::new(&["upscale", "upscaler"]);
pub const UPSCALE_RESIZE: SettingKey<f64> = SettingKey::new(&["upscale", "resize"]);
pub const UPSCALE_WIDTH: SettingKey<u32> = SettingKey::new(&["upscale", "width"]);
pub const UPSCALE_HEIGHT: SettingKey<u32> = SettingKey::new(&["upscale", "height"]);
pub const UPSCALE_CROP_TO_FIT: SettingKey<bool> = SettingKey::new(&["upscale", "crop_to_fit"]);

pub const INTERROGATE_MODEL: SettingKey<String> = SettingKey::new(&["interrogate", "model"]);

// ---------------------------------------------------------------------------
// Default tree
// ---------------------------------------------------------------------------

/// The full settings tree at [`CURRENT_VERSION`].
pub fn defaults() -> &'static Value {
    static DEFAULTS: OnceLock<Value> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        json!({
            VERSION_KEY: CURRENT_VERSION,
            "server": {
                "host": "http://127.0.0.1:7860",
                "save_images": false,
            },
            "previews": {
                "enabled": true,
                "refresh_seconds": 1.0,
            },
            "generation": {
                "min_size": 512,
                "max_size": 2048,
                "max_size_enabled": false,
                "idle_timeout_seconds": 600,
            },
            "defaults": {
                "model": "",
                "vae": "",
                "sampler": "Euler a",
                "steps": 20,
                "cfg_scale": 7.0,
                "denoising_strength": 0.75,
                "color_correction": false,
                "refiner": "",
                "refiner_start": 0.8,
            },
            "batch": {
                "batch_size": 1,
                "batch_count": 1,
            },
            "hires_fix": {
                "enabled": false,
                "auto_enable": false,
                "auto_enable_min": 1024,
                "min_size": 512,
                "upscaler": "Latent",
                "steps": 0,
                "denoising_strength": 0.5,
            },
            "inpaint": {
                "mask_blur": 4,
                "mask_mode": 0,
                "masked_content": 1,
                "inpaint_area": 0,
                "padding": 32,
            },
            "prompts": {
                "save_prompts": true,
                "share_prompts": false,
                "exclude_sharing": [],
                "shared": {"prompt": "", "negative_prompt": ""},
                "txt2img": {"prompt": "", "negative_prompt": ""},
                "img2img": {"prompt": "", "negative_prompt": ""},
                "inpaint": {"prompt": "", "negative_prompt": ""},
            },
            "upscale": {
                "upscaler": "",
                "resize": 2.0,
                "width": 1024,
                "height": 1024,
                "crop_to_fit": true,
            },
            "interrogate": {
                "model": "clip",
            },
        })
    })
}

/// Value of `path` in the default tree.
pub fn default_value(path: &SettingsPath) -> Option<Value> {
    lookup(defaults(), path).cloned()
}
