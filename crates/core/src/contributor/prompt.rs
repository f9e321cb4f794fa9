use serde_json::Value;

use super::Contributor;
use crate::settings::{keys, SettingsStore, SharedSettings};
use crate::types::Mapping;

/// Which page a prompt belongs to; each keeps its own history slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    TextToImage,
    ImageToImage,
    Inpaint,
}

impl PromptMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "txt2img",
            Self::ImageToImage => "img2img",
            Self::Inpaint => "inpaint",
        }
    }
}

/// Positive/negative prompt and selected styles.
///
/// With settings attached, every snapshot records the prompt into the
/// history slot of its mode (or the shared slot when sharing is on and the
/// mode is not excluded), unless `prompts.save_prompts` is off.
pub struct Prompts {
    mode: PromptMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub styles: Vec<String>,
    settings: Option<SharedSettings>,
}

impl Prompts {
    pub fn new(mode: PromptMode, prompt: impl Into<String>, negative_prompt: impl Into<String>) -> Self {
        Self {
            mode,
            prompt: prompt.into(),
            negative_prompt: negative_prompt.into(),
            styles: Vec::new(),
            settings: None,
        }
    }

    /// Restore the last saved prompts for `mode` and keep recording into
    /// `settings`.
    pub fn restore(mode: PromptMode, settings: SharedSettings) -> Self {
        let mut prompts = Self::new(mode, "", "");
        if let Ok(store) = settings.lock() {
            if keys::SAVE_PROMPTS.get_or_default(&*store) {
                let slot = history_slot(&*store, mode);
                let read = |field: &str| {
                    store
                        .get(&keys::prompt_history(slot).child(field))
                        .and_then(|v| v.as_str().map(str::to_owned))
                        .unwrap_or_default()
                };
                prompts.prompt = read("prompt");
                prompts.negative_prompt = read("negative_prompt");
            }
        }
        prompts.settings = Some(settings);
        prompts
    }

    pub fn with_styles(mut self, styles: Vec<String>) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_settings(mut self, settings: SharedSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    fn record_history(&self) {
        let Some(settings) = &self.settings else {
            return;
        };
        let Ok(mut store) = settings.lock() else {
            tracing::warn!("Settings lock poisoned, prompt history not saved");
            return;
        };
        if !keys::SAVE_PROMPTS.get_or_default(&*store) {
            return;
        }
        let slot = keys::prompt_history(history_slot(&*store, self.mode));
        let result = store
            .set(&slot.child("prompt"), Value::from(self.prompt.as_str()))
            .and_then(|_| {
                store.set(
                    &slot.child("negative_prompt"),
                    Value::from(self.negative_prompt.as_str()),
                )
            })
            .and_then(|_| store.save());
        if let Err(e) = result {
            tracing::warn!(error = %e, mode = self.mode.as_str(), "Failed to save prompt history");
        }
    }
}

impl Contributor for Prompts {
    fn name(&self) -> &str {
        "prompts"
    }

    fn snapshot(&mut self) -> Mapping {
        self.record_history();

        let mut data = Mapping::new();
        data.insert("prompt".into(), Value::from(self.prompt.as_str()));
        data.insert("negative_prompt".into(), Value::from(self.negative_prompt.as_str()));
        if !self.styles.is_empty() {
            data.insert("styles".into(), Value::from(self.styles.clone()));
        }
        data
    }
}

fn history_slot(store: &dyn SettingsStore, mode: PromptMode) -> &'static str {
    let sharing = keys::SHARE_PROMPTS.get_or_default(store);
    let excluded = keys::EXCLUDE_SHARING
        .get_or_default(store)
        .iter()
        .any(|m| m == mode.as_str());
    if sharing && !excluded {
        "shared"
    } else {
        mode.as_str()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::settings::{shared, JsonSettings, SettingsPath};

    fn history(settings: &SharedSettings, dotted: &str) -> Option<Value> {
        let store = settings.lock().unwrap();
        store.get(&SettingsPath::from_dotted(dotted).unwrap())
    }

    #[test]
    fn snapshot_contains_prompts_and_styles() {
        let mut prompts =
            Prompts::new(PromptMode::TextToImage, "a cat", "blurry").with_styles(vec!["anime".into()]);
        let snapshot = prompts.snapshot();
        assert_eq!(snapshot["prompt"], "a cat");
        assert_eq!(snapshot["negative_prompt"], "blurry");
        assert_eq!(snapshot["styles"], json!(["anime"]));
    }

    #[test]
    fn no_styles_key_when_none_selected() {
        let mut prompts = Prompts::new(PromptMode::TextToImage, "a", "");
        assert!(!prompts.snapshot().contains_key("styles"));
    }

    #[test]
    fn history_is_saved_per_mode() {
        let settings = shared(JsonSettings::with_defaults());
        let mut prompts =
            Prompts::new(PromptMode::Inpaint, "a dog", "ugly").with_settings(settings.clone());
        prompts.snapshot();
        prompts.snapshot();

        assert_eq!(history(&settings, "prompts.inpaint.prompt"), Some(json!("a dog")));
        assert_eq!(history(&settings, "prompts.shared.prompt"), Some(json!("")));
    }

    #[test]
    fn shared_history_respects_exclusions() {
        let mut store = JsonSettings::with_defaults();
        keys::SHARE_PROMPTS.set(&mut store, &true).unwrap();
        keys::EXCLUDE_SHARING
            .set(&mut store, &vec!["img2img".to_string()])
            .unwrap();
        let settings = shared(store);

        Prompts::new(PromptMode::TextToImage, "shared one", "")
            .with_settings(settings.clone())
            .snapshot();
        Prompts::new(PromptMode::ImageToImage, "own one", "")
            .with_settings(settings.clone())
            .snapshot();

        assert_eq!(history(&settings, "prompts.shared.prompt"), Some(json!("shared one")));
        assert_eq!(history(&settings, "prompts.img2img.prompt"), Some(json!("own one")));
    }

    #[test]
    fn history_disabled_leaves_settings_alone() {
        let mut store = JsonSettings::with_defaults();
        keys::SAVE_PROMPTS.set(&mut store, &false).unwrap();
        let settings = shared(store);

        Prompts::new(PromptMode::TextToImage, "secret", "")
            .with_settings(settings.clone())
            .snapshot();
        assert_eq!(history(&settings, "prompts.txt2img.prompt"), Some(json!("")));
    }

    #[test]
    fn restore_reads_saved_prompt() {
        let settings = shared(JsonSettings::with_defaults());
        Prompts::new(PromptMode::ImageToImage, "castle", "fog")
            .with_settings(settings.clone())
            .snapshot();

        let restored = Prompts::restore(PromptMode::ImageToImage, settings);
        assert_eq!(restored.prompt, "castle");
        assert_eq!(restored.negative_prompt, "fog");
    }
}
