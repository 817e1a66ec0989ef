//! Config Store
//!
//! Handles persistence and retrieval of user preferences and named presets.
//! The document is a flat JSON object; a fixed default schema is merged in on
//! load so keys added in newer versions backfill older files, while keys the
//! defaults don't know about are kept as they are.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::models::{default_subtitle_language, Preset};

/// Settings keys used in the document.
pub mod keys {
    pub const THEME: &str = "theme";
    pub const LAST_DOWNLOAD_PATH: &str = "last_download_path";
    pub const SPEED_LIMIT: &str = "speed_limit";
    pub const DOWNLOAD_SUBTITLES: &str = "download_subtitles";
    pub const SUBTITLE_LANGUAGE: &str = "subtitle_language";
    pub const AUTO_UPDATE: &str = "auto_update";
    pub const PRESETS: &str = "presets";
}

fn default_download_folder() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("~/Downloads"))
}

/// The default schema. Every key here is present after [`ConfigStore::load`].
pub fn default_document() -> Map<String, Value> {
    let doc = json!({
        "theme": "default",
        "last_download_path": default_download_folder(),
        "speed_limit": 0,
        "download_subtitles": false,
        "subtitle_language": default_subtitle_language(),
        "auto_update": true,
        "presets": {
            "4K Video": { "quality": "2160", "subtitles": false },
            "HD Video": { "quality": "1080", "subtitles": false },
            "Audio Only": { "quality": "audio", "subtitles": false },
            "With Subtitles": { "quality": "best", "subtitles": true }
        }
    });

    match doc {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Add every default key missing from `doc`; never touch keys already there.
fn backfill_defaults(doc: &mut Map<String, Value>) {
    for (key, value) in default_document() {
        doc.entry(key).or_insert(value);
    }
}

/// Config store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    doc: Map<String, Value>,
}

impl ConfigStore {
    /// Load the document at `path`.
    ///
    /// A missing or unreadable file yields the default schema; read and parse
    /// failures are logged, never returned.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match read_document(&path) {
            Ok(Some(mut doc)) => {
                backfill_defaults(&mut doc);
                doc
            }
            Ok(None) => default_document(),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable config {}: {:#}",
                    path.display(),
                    e
                );
                default_document()
            }
        };

        Self { path, doc }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole document.
    pub fn document(&self) -> &Map<String, Value> {
        &self.doc
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.doc.get(key).cloned().unwrap_or(default)
    }

    /// Typed lookup. A value of the wrong shape reads as `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.doc
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value and persist the whole document immediately.
    ///
    /// Persist failures are logged only; the in-memory value is kept.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Failed to serialize setting {}: {}", key, e);
                return;
            }
        };

        self.doc.insert(key.to_string(), value);

        if let Err(e) = self.save() {
            log::error!("Error saving config: {:#}", e);
        }
    }

    /// Write the document to disk (temp file + rename).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.doc).context("Failed to serialize config")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }

    /// Named presets. Entries that don't parse are skipped.
    pub fn presets(&self) -> BTreeMap<String, Preset> {
        let mut out = BTreeMap::new();
        let Some(Value::Object(map)) = self.doc.get(keys::PRESETS) else {
            return out;
        };

        for (name, value) in map {
            match serde_json::from_value::<Preset>(value.clone()) {
                Ok(preset) => {
                    out.insert(name.clone(), preset);
                }
                Err(e) => log::warn!("Skipping invalid preset {:?}: {}", name, e),
            }
        }
        out
    }

    pub fn preset(&self, name: &str) -> Option<Preset> {
        self.presets().remove(name)
    }

    /// Save (or replace) a preset through an explicit settings action.
    pub fn save_preset(&mut self, name: &str, preset: &Preset) {
        let mut presets = match self.doc.get(keys::PRESETS) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        match serde_json::to_value(preset) {
            Ok(v) => {
                presets.insert(name.to_string(), v);
                self.set(keys::PRESETS, Value::Object(presets));
            }
            Err(e) => log::error!("Failed to serialize preset {:?}: {}", name, e),
        }
    }

    pub fn download_path(&self) -> PathBuf {
        self.get_as::<PathBuf>(keys::LAST_DOWNLOAD_PATH)
            .unwrap_or_else(default_download_folder)
    }

    /// Speed limit in KB/s; 0 means unlimited.
    pub fn speed_limit_kbps(&self) -> u32 {
        self.get_as::<u32>(keys::SPEED_LIMIT).unwrap_or(0)
    }

    pub fn subtitle_language(&self) -> String {
        self.get_as::<String>(keys::SUBTITLE_LANGUAGE)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(default_subtitle_language)
    }
}

fn read_document(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw).context("Failed to parse config")? {
        Value::Object(map) => Ok(Some(map)),
        other => Err(anyhow!("config root must be an object, got {}", type_name(&other))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualitySelector;

    fn config_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("config.json")
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(config_path(&dir));

        assert_eq!(store.document(), &default_document());
        assert_eq!(store.speed_limit_kbps(), 0);
        assert_eq!(store.subtitle_language(), "en");
        assert_eq!(store.presets().len(), 4);
    }

    #[test]
    fn test_load_backfills_and_keeps_user_and_extra_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        fs::write(
            &path,
            r#"{"theme":"dark","speed_limit":50,"window_geometry":"900x700"}"#,
        )
        .unwrap();

        let store = ConfigStore::load(&path);

        for key in default_document().keys() {
            assert!(store.get(key).is_some(), "missing default key {key}");
        }
        assert_eq!(store.get("theme"), Some(&json!("dark")));
        assert_eq!(store.speed_limit_kbps(), 50);
        assert_eq!(store.get("window_geometry"), Some(&json!("900x700")));
    }

    #[test]
    fn test_user_presets_are_not_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        fs::write(
            &path,
            r#"{"presets":{"Phone":{"quality":"480","subtitles":false}}}"#,
        )
        .unwrap();

        let store = ConfigStore::load(&path);
        let presets = store.presets();
        assert_eq!(presets.len(), 1);
        assert_eq!(
            presets["Phone"].quality,
            QualitySelector::MaxHeight(480)
        );
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(ConfigStore::load(&path).document(), &default_document());

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(ConfigStore::load(&path).document(), &default_document());
    }

    #[test]
    fn test_set_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);

        let mut store = ConfigStore::load(&path);
        store.set(keys::SPEED_LIMIT, 128);
        store.set(keys::THEME, "dark");

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.speed_limit_kbps(), 128);
        assert_eq!(reloaded.get_as::<String>(keys::THEME).as_deref(), Some("dark"));
    }

    #[test]
    fn test_set_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // Parent of the config path is a regular file, so the write must fail.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let mut store = ConfigStore::load(blocker.join("config.json"));

        store.set(keys::THEME, "dark");
        assert_eq!(store.get("theme"), Some(&json!("dark")));
        assert!(store.save().is_err());
    }

    #[test]
    fn test_get_or_and_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(config_path(&dir));
        store.set(keys::SPEED_LIMIT, "fast");

        assert_eq!(store.speed_limit_kbps(), 0);
        assert_eq!(store.get_or("nope", json!(7)), json!(7));
    }

    #[test]
    fn test_save_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        let mut store = ConfigStore::load(&path);
        store.save_preset(
            "Podcast",
            &Preset {
                quality: QualitySelector::Audio,
                subtitles: false,
            },
        );

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.presets().len(), 5);
        assert_eq!(
            reloaded.preset("Podcast").map(|p| p.quality),
            Some(QualitySelector::Audio)
        );
    }
}
