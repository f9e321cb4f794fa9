//! Persisted settings: structured key paths, the store contract, typed
//! keys and the versioned JSON implementation.

mod json;
pub mod keys;
mod migrate;

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CoreError;

pub use json::{JsonSettings, BACKUP_FILE_PREFIX};
pub use migrate::{migrate, migrate_v1_to_v2, migrate_v2_to_v3, CURRENT_VERSION, VERSION_KEY};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A key into the settings tree, as a list of object keys from the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingsPath(Vec<String>);

impl SettingsPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted key such as `previews.refresh_seconds`.
    ///
    /// Empty segments are rejected so `a..b` and trailing dots never turn
    /// into a lookup of `""`.
    pub fn from_dotted(key: &str) -> Result<Self, CoreError> {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(CoreError::Settings(format!("Invalid settings key '{key}'")));
        }
        Ok(Self::new(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Append one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for SettingsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Key/value access to persisted settings.
pub trait SettingsStore: Send {
    fn get(&self, path: &SettingsPath) -> Option<Value>;

    fn set(&mut self, path: &SettingsPath, value: Value) -> Result<(), CoreError>;

    fn has(&self, path: &SettingsPath) -> bool {
        self.get(path).is_some()
    }

    /// Flush pending changes to durable storage, if the store has any.
    fn save(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Settings shared between the orchestrator and contributors that persist
/// their own state.
pub type SharedSettings = Arc<Mutex<dyn SettingsStore>>;

/// Wrap a store for sharing.
pub fn shared<S: SettingsStore + 'static>(store: S) -> SharedSettings {
    Arc::new(Mutex::new(store))
}

// ---------------------------------------------------------------------------
// Typed keys
// ---------------------------------------------------------------------------

/// A settings location with a known value type.
pub struct SettingKey<T> {
    segments: &'static [&'static str],
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SettingKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SettingKey<T> {}

impl<T> fmt::Debug for SettingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SettingKey({})", self.segments.join("."))
    }
}

impl<T> SettingKey<T> {
    pub const fn new(segments: &'static [&'static str]) -> Self {
        Self {
            segments,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> SettingsPath {
        SettingsPath::new(self.segments.iter().copied())
    }
}

impl<T: DeserializeOwned + Default> SettingKey<T> {
    /// Read and decode the value. A value of the wrong type is logged and
    /// treated as absent.
    pub fn get(&self, store: &dyn SettingsStore) -> Option<T> {
        let value = store.get(&self.path())?;
        decode(self, value)
    }

    /// Read the value, falling back to the built-in default tree and then
    /// to `T::default()`.
    pub fn get_or_default(&self, store: &dyn SettingsStore) -> T {
        self.get(store)
            .or_else(|| keys::default_value(&self.path()).and_then(|v| decode(self, v)))
            .unwrap_or_default()
    }
}

impl<T: serde::Serialize> SettingKey<T> {
    pub fn set(&self, store: &mut dyn SettingsStore, value: &T) -> Result<(), CoreError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::Settings(format!("Cannot encode {self:?}: {e}")))?;
        store.set(&self.path(), value)
    }
}

fn decode<T: DeserializeOwned>(key: &SettingKey<T>, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key = ?key, error = %e, "Ignoring setting with unexpected type");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

pub(crate) fn lookup<'a>(root: &'a Value, path: &SettingsPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Fails when an intermediate node exists but is not an object.
pub(crate) fn insert(root: &mut Value, path: &SettingsPath, value: Value) -> Result<(), CoreError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(CoreError::Settings("Empty settings key".to_string()));
    };
    let mut node = root;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| CoreError::Settings(format!("'{path}' crosses a non-object value")))?;
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let map = node
        .as_object_mut()
        .ok_or_else(|| CoreError::Settings(format!("'{path}' crosses a non-object value")))?;
    map.insert(last.clone(), value);
    Ok(())
}

pub(crate) fn remove(root: &mut Value, path: &SettingsPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut node = root;
    for segment in parents {
        node = node.as_object_mut()?.get_mut(segment)?;
    }
    node.as_object_mut()?.remove(last)
}
