//! Settings schema versions and the migration chain between them.
//!
//! - **v1**: flat keys, no version marker (`host`, `previews_enabled`,
//!   `prompt_txt2img`, ...).
//! - **v2**: nested groups, `settings_version: 2`, a few legacy names
//!   (`server.save_imgs`, `defaults.sampling_steps`, `prompts.<mode>_prompt`).
//! - **v3**: current layout (see [`super::keys::defaults`]).

use serde_json::Value;

use super::{insert, remove, SettingsPath};
use crate::error::CoreError;

/// Top-level key recording the schema version of a settings tree.
pub const VERSION_KEY: &str = "settings_version";

pub const CURRENT_VERSION: u64 = 3;

/// Prompt modes that keep their own history.
const PROMPT_MODES: &[&str] = &["shared", "txt2img", "img2img", "inpaint"];

/// Flat v1 key → nested v2 location.
const V1_TO_V2: &[(&str, &[&str])] = &[
    ("host", &["server", "host"]),
    ("save_imgs", &["server", "save_imgs"]),
    ("previews_enabled", &["previews", "enabled"]),
    ("previews_refresh_seconds", &["previews", "refresh_seconds"]),
    ("min_size", &["generation", "min_size"]),
    ("max_size", &["generation", "max_size"]),
    ("max_size_enabled", &["generation", "max_size_enabled"]),
    ("model", &["defaults", "model"]),
    ("vae", &["defaults", "vae"]),
    ("sampler", &["defaults", "sampler"]),
    ("sampling_steps", &["defaults", "sampling_steps"]),
    ("cfg_scale", &["defaults", "cfg_scale"]),
    ("denoising_strength", &["defaults", "denoising_strength"]),
    ("batch_size", &["batch", "batch_size"]),
    ("batch_count", &["batch", "batch_count"]),
    ("save_prompts", &["prompts", "save_prompts"]),
    ("share_prompts", &["prompts", "share_prompts"]),
    ("upscaler", &["upscale", "upscaler"]),
    ("upscale_resize", &["upscale", "resize"]),
    ("upscale_width", &["upscale", "width"]),
    ("upscale_height", &["upscale", "height"]),
    ("upscale_crop_to_fit", &["upscale", "crop_to_fit"]),
];

/// Read the schema version of `tree`. A tree without a marker is v1.
pub fn version_of(tree: &Value) -> Result<u64, CoreError> {
    match tree.get(VERSION_KEY) {
        None => Ok(1),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| CoreError::Settings(format!("Invalid {VERSION_KEY}: {v}"))),
    }
}

/// Bring `tree` up to [`CURRENT_VERSION`], returning the version it started at.
pub fn migrate(tree: &mut Value) -> Result<u64, CoreError> {
    if !tree.is_object() {
        return Err(CoreError::Settings("Settings root must be an object".to_string()));
    }
    let from = version_of(tree)?;
    if from > CURRENT_VERSION {
        return Err(CoreError::Settings(format!(
            "Settings version {from} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    let mut version = from;
    while version < CURRENT_VERSION {
        match version {
            1 => migrate_v1_to_v2(tree)?,
            2 => migrate_v2_to_v3(tree)?,
            other => {
                return Err(CoreError::Settings(format!("No migration from version {other}")));
            }
        }
        version += 1;
        tracing::info!(version, "Migrated settings");
    }
    Ok(from)
}

/// Move flat alpha keys into their groups.
///
/// Prompt history keys (`prompt_<mode>`, `negative_prompt_<mode>`) become
/// `prompts.<mode>_prompt` / `prompts.<mode>_negative_prompt`. Unknown keys
/// are kept as they are.
pub fn migrate_v1_to_v2(tree: &mut Value) -> Result<(), CoreError> {
    for (flat, nested) in V1_TO_V2 {
        if let Some(value) = remove(tree, &SettingsPath::new([*flat])) {
            insert(tree, &SettingsPath::new(nested.iter().copied()), value)?;
        }
    }
    for &mode in PROMPT_MODES {
        for (old, new) in [
            (format!("prompt_{mode}"), format!("{mode}_prompt")),
            (format!("negative_prompt_{mode}"), format!("{mode}_negative_prompt")),
        ] {
            if let Some(value) = remove(tree, &SettingsPath::new([old])) {
                insert(tree, &SettingsPath::new(["prompts".to_string(), new]), value)?;
            }
        }
    }
    insert(tree, &SettingsPath::new([VERSION_KEY]), Value::from(2))
}

/// Rename the remaining legacy keys and nest prompt history per mode.
pub fn migrate_v2_to_v3(tree: &mut Value) -> Result<(), CoreError> {
    rename(tree, &["server", "save_imgs"], &["server", "save_images"])?;
    rename(tree, &["defaults", "sampling_steps"], &["defaults", "steps"])?;
    for &mode in PROMPT_MODES {
        for (old, field) in [
            (format!("{mode}_prompt"), "prompt"),
            (format!("{mode}_negative_prompt"), "negative_prompt"),
        ] {
            if let Some(value) = remove(tree, &SettingsPath::new(["prompts".to_string(), old])) {
                insert(tree, &SettingsPath::new(["prompts", mode, field]), value)?;
            }
        }
    }
    insert(tree, &SettingsPath::new([VERSION_KEY]), Value::from(3))
}

fn rename(tree: &mut Value, from: &[&str], to: &[&str]) -> Result<(), CoreError> {
    if let Some(value) = remove(tree, &SettingsPath::new(from.iter().copied())) {
        insert(tree, &SettingsPath::new(to.iter().copied()), value)?;
    }
    Ok(())
}
