//! [`SettingsStore`] over a JSON tree, optionally backed by a file.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::migrate::{migrate, CURRENT_VERSION};
use super::{insert, keys, lookup, SettingsPath, SettingsStore};
use crate::error::CoreError;
use crate::merge::deep_merge;

/// Backups of pre-migration files are written as `<prefix><version>.json`
/// next to the settings file.
pub const BACKUP_FILE_PREFIX: &str = "user_settings_backup_";

#[derive(Debug, Clone)]
pub struct JsonSettings {
    root: Value,
    file: Option<PathBuf>,
}

impl JsonSettings {
    /// In-memory settings holding only the built-in defaults.
    pub fn with_defaults() -> Self {
        Self {
            root: keys::defaults().clone(),
            file: None,
        }
    }

    /// Migrate `user` to the current schema and merge it over the defaults.
    pub fn from_value(mut user: Value) -> Result<Self, CoreError> {
        migrate(&mut user)?;
        Ok(Self {
            root: merge_over_defaults(user)?,
            file: None,
        })
    }

    /// Load settings from `path`.
    ///
    /// A missing file yields the defaults. A file at an older schema version
    /// is copied to a backup, migrated and rewritten in place.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self {
                root: keys::defaults().clone(),
                file: Some(path.to_path_buf()),
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Settings(format!("Cannot read {}: {e}", path.display())))?;
        let mut user: Value = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Settings(format!("Cannot parse {}: {e}", path.display())))?;

        let from = migrate(&mut user)?;
        let settings = Self {
            root: merge_over_defaults(user)?,
            file: Some(path.to_path_buf()),
        };

        if from < CURRENT_VERSION {
            let backup = backup_path(path, from);
            std::fs::write(&backup, raw).map_err(|e| {
                CoreError::Settings(format!("Cannot write backup {}: {e}", backup.display()))
            })?;
            tracing::info!(
                from,
                to = CURRENT_VERSION,
                backup = %backup.display(),
                "Upgraded settings file",
            );
            settings.save()?;
        }

        Ok(settings)
    }

    /// Dotted-key read for callers that only have a string key.
    pub fn get_dotted(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.get(&SettingsPath::from_dotted(key)?))
    }

    /// Dotted-key write for callers that only have a string key.
    pub fn set_dotted(&mut self, key: &str, value: Value) -> Result<(), CoreError> {
        self.set(&SettingsPath::from_dotted(key)?, value)
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

impl Default for JsonSettings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SettingsStore for JsonSettings {
    fn get(&self, path: &SettingsPath) -> Option<Value> {
        lookup(&self.root, path).cloned()
    }

    fn set(&mut self, path: &SettingsPath, value: Value) -> Result<(), CoreError> {
        insert(&mut self.root, path, value)
    }

    fn save(&self) -> Result<(), CoreError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.root)
            .map_err(|e| CoreError::Settings(format!("Cannot encode settings: {e}")))?;
        write_atomically(path, text.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Write to a sibling temp file and rename it over `path`, so a crash
/// mid-write leaves the previous file intact.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let cannot_write =
        |e: std::io::Error| CoreError::Settings(format!("Cannot write {}: {e}", path.display()));
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(cannot_write)?;
    file.write_all(bytes).map_err(cannot_write)?;
    file.as_file().sync_all().map_err(cannot_write)?;
    file.persist(path).map_err(|e| cannot_write(e.error))?;
    Ok(())
}

fn merge_over_defaults(user: Value) -> Result<Value, CoreError> {
    let Value::Object(user) = user else {
        return Err(CoreError::Settings("Settings root must be an object".to_string()));
    };
    let mut root = match keys::defaults().clone() {
        Value::Object(map) => map,
        _ => return Err(CoreError::Internal("default settings are not an object".to_string())),
    };
    deep_merge(&mut root, user);
    Ok(Value::Object(root))
}

fn backup_path(path: &Path, version: u64) -> PathBuf {
    let name = format!("{BACKUP_FILE_PREFIX}{version}.json");
    match path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::settings::VERSION_KEY;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = JsonSettings::load(dir.path().join("user_settings.json")).unwrap();
        assert_eq!(settings.get_dotted("previews.enabled").unwrap(), Some(json!(true)));
    }

    #[test]
    fn user_values_override_defaults_and_new_defaults_survive() {
        let settings = JsonSettings::from_value(json!({
            "settings_version": 3,
            "previews": {"enabled": false}
        }))
        .unwrap();
        assert_eq!(settings.get_dotted("previews.enabled").unwrap(), Some(json!(false)));
        assert_eq!(
            settings.get_dotted("previews.refresh_seconds").unwrap(),
            Some(json!(1.0))
        );
    }

    #[test]
    fn old_file_is_backed_up_migrated_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_settings.json");
        let original = json!({"host": "http://gpu:7860", "previews_enabled": false});
        std::fs::write(&path, original.to_string()).unwrap();

        let settings = JsonSettings::load(&path).unwrap();
        assert_eq!(settings.get_dotted("server.host").unwrap(), Some(json!("http://gpu:7860")));
        assert_eq!(settings.get_dotted("previews.enabled").unwrap(), Some(json!(false)));

        let backup = dir.path().join("user_settings_backup_1.json");
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(backup).unwrap()).unwrap();
        assert_eq!(saved, original);

        let rewritten: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten[VERSION_KEY], CURRENT_VERSION);
    }

    #[test]
    fn current_file_is_not_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_settings.json");
        std::fs::write(&path, json!({"settings_version": 3}).to_string()).unwrap();

        JsonSettings::load(&path).unwrap();
        assert!(!dir.path().join("user_settings_backup_3.json").exists());
    }

    #[test]
    fn newer_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_settings.json");
        std::fs::write(&path, json!({"settings_version": 7}).to_string()).unwrap();
        assert_matches!(JsonSettings::load(&path), Err(CoreError::Settings(_)));
    }

    #[test]
    fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_settings.json");
        let mut settings = JsonSettings::load(&path).unwrap();
        settings.set_dotted("prompts.txt2img.prompt", json!("a fox")).unwrap();
        settings.save().unwrap();

        let reloaded = JsonSettings::load(&path).unwrap();
        assert_eq!(
            reloaded.get_dotted("prompts.txt2img.prompt").unwrap(),
            Some(json!("a fox"))
        );
    }

    #[test]
    fn save_replaces_the_file_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_settings.json");
        let original = json!({"settings_version": 3, "server": {"host": "old"}});
        std::fs::write(&path, original.to_string()).unwrap();

        let mut settings = JsonSettings::load(&path).unwrap();
        settings.set_dotted("server.host", json!("http://gpu:7860")).unwrap();
        settings.save().unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, ["user_settings.json"]);
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["server"]["host"], "http://gpu:7860");
    }

    #[test]
    fn bad_dotted_key_is_an_error() {
        let settings = JsonSettings::with_defaults();
        assert_matches!(settings.get_dotted("a..b"), Err(CoreError::Settings(_)));
    }
}
