//! Always-on script blocks (extensions such as ADetailer or Soft Inpainting).
//!
//! Each contributes one entry under `alwayson_scripts`; the request builder
//! deep-merges the entries from every script into one mapping.

use serde::Serialize;
use serde_json::{json, Value};

use super::Contributor;
use crate::types::Mapping;

/// Key holding always-on script blocks in a payload.
pub const ALWAYS_ON_SCRIPTS_KEY: &str = "alwayson_scripts";

/// One named always-on script and its positional arguments.
#[derive(Debug, Clone)]
pub struct AlwaysOnScript {
    pub name: String,
    pub args: Vec<Value>,
    pub enabled: bool,
}

impl AlwaysOnScript {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            enabled: true,
        }
    }

    /// ADetailer with one detection tab.
    pub fn adetailer(model: &str, prompt: &str, negative_prompt: &str) -> Self {
        Self::new(
            "ADetailer",
            vec![
                Value::Bool(true),
                json!({
                    "ad_model": model,
                    "ad_prompt": prompt,
                    "ad_negative_prompt": negative_prompt,
                }),
            ],
        )
    }

    /// Soft Inpainting with its six blending parameters, in order: schedule
    /// bias, preservation strength, transition contrast boost, mask
    /// influence, difference threshold, difference contrast.
    pub fn soft_inpainting(params: [f64; 6]) -> Self {
        let mut args = vec![Value::Bool(true)];
        args.extend(params.into_iter().map(Value::from));
        Self::new("Soft Inpainting", args)
    }
}

impl Contributor for AlwaysOnScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&mut self) -> Mapping {
        if !self.enabled {
            return Mapping::new();
        }
        script_block(&self.name, Value::from(self.args.clone()))
    }
}

// ---------------------------------------------------------------------------
// ControlNet
// ---------------------------------------------------------------------------

/// One ControlNet unit as the extension's API expects it.
#[derive(Debug, Clone, Serialize)]
pub struct ControlNetUnit {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub module: String,
    pub model: String,
    pub weight: f64,
    pub guidance_start: f64,
    pub guidance_end: f64,
    pub pixel_perfect: bool,
}

impl ControlNetUnit {
    pub fn new(module: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            enabled: true,
            image: None,
            module: module.into(),
            model: model.into(),
            weight: 1.0,
            guidance_start: 0.0,
            guidance_end: 1.0,
            pixel_perfect: false,
        }
    }
}

/// All ControlNet units of a request; the extension takes them as one list.
#[derive(Debug, Clone, Default)]
pub struct ControlNet {
    pub units: Vec<ControlNetUnit>,
}

impl Contributor for ControlNet {
    fn name(&self) -> &str {
        "controlnet"
    }

    fn snapshot(&mut self) -> Mapping {
        let units: Vec<Value> = self
            .units
            .iter()
            .filter(|u| u.enabled)
            .filter_map(|u| serde_json::to_value(u).ok())
            .collect();
        if units.is_empty() {
            return Mapping::new();
        }
        script_block("ControlNet", Value::from(units))
    }
}

fn script_block(name: &str, args: Value) -> Mapping {
    let mut block = Mapping::new();
    block.insert("args".into(), args);
    let mut scripts = Mapping::new();
    scripts.insert(name.to_string(), Value::Object(block));
    let mut data = Mapping::new();
    data.insert(ALWAYS_ON_SCRIPTS_KEY.into(), Value::Object(scripts));
    data
}
