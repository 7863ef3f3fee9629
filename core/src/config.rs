use crate::errors::{CompanionError, CompanionResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Name of the directory holding the suite's configuration
pub const APP_NAME: &str = "companion-suite";

const DEFAULT_RUNTIME_LAUNCHER: &str = "java";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_CONNECT_RETRY_MS: u64 = 1000;
const DEFAULT_STARTUP_GRACE_MS: u64 = 2000;
const DEFAULT_BASE_PORT: u16 = 5000;

/// Persisted settings for launching the companion application
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CompanionSettings {
    /// Path to the companion executable. Empty means "not configured".
    pub companion_path: String,
    /// Launcher used for archive-style companions (`<launcher> -jar <path>`)
    pub runtime_launcher: String,
    pub probe_timeout_ms: u64,
    pub connect_retry_ms: u64,
    /// Delay between spawning the companion and the first connection attempt
    pub startup_grace_ms: u64,
    /// First port tried when picking the control-channel port
    pub base_port: u16,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            companion_path: String::new(),
            runtime_launcher: DEFAULT_RUNTIME_LAUNCHER.to_string(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            connect_retry_ms: DEFAULT_CONNECT_RETRY_MS,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl CompanionSettings {
    /// Loads configuration from a file if it exists, otherwise returns the default config
    pub fn load_from_file(path: &Path) -> CompanionResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                CompanionError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                CompanionError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;

            Ok(config)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Loads configuration from the default location
    pub fn load_from_default() -> CompanionResult<Self> {
        Self::load_from_file(&get_default_config_file()?)
    }

    /// Saves configuration to a file
    pub fn save_to_file(&self, path: &Path) -> CompanionResult<()> {
        let content = toml::to_string(self).map_err(|e| {
            CompanionError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CompanionError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, content).map_err(|e| {
            CompanionError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// The configured companion path, if it is set and points at an existing file.
    pub fn resolved_companion_path(&self) -> Option<PathBuf> {
        let trimmed = self.companion_path.trim();
        if trimmed.is_empty() {
            return None;
        }

        let path = PathBuf::from(trimmed);
        if !path.exists() {
            debug!("Configured companion path {} does not exist", path.display());
            return None;
        }

        Some(path)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

/// Checks a candidate companion path the way the settings page does before saving it.
/// An empty value is accepted and clears the setting.
pub fn validate_companion_path(value: &str) -> CompanionResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(());
    }

    if !Path::new(trimmed).exists() {
        return Err(CompanionError::PathNotFound(trimmed.to_string()));
    }

    Ok(())
}

/// Shared, live view of the settings.
///
/// The supervisor reads the companion path through this before every launch
/// attempt, so an update made here takes effect on the next launch.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<CompanionSettings>>,
    file: Option<PathBuf>,
}

impl SettingsStore {
    /// In-memory store, never persisted
    pub fn new(settings: CompanionSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            file: None,
        }
    }

    /// Store backed by a TOML file; missing file means defaults
    pub fn open(path: impl Into<PathBuf>) -> CompanionResult<Self> {
        let path = path.into();
        let settings = CompanionSettings::load_from_file(&path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            file: Some(path),
        })
    }

    /// Store backed by the default config file
    pub fn open_default() -> CompanionResult<Self> {
        Self::open(get_default_config_file()?)
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> CompanionSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn resolved_companion_path(&self) -> Option<PathBuf> {
        self.snapshot().resolved_companion_path()
    }

    /// Validates and stores a new companion path, persisting it when file-backed.
    pub fn set_companion_path(&self, value: &str) -> CompanionResult<()> {
        validate_companion_path(value)?;
        self.update(|settings| settings.companion_path = value.trim().to_string())
    }

    /// Applies a change and persists it when the store is file-backed.
    pub fn update(&self, change: impl FnOnce(&mut CompanionSettings)) -> CompanionResult<()> {
        let updated = {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            change(&mut guard);
            guard.clone()
        };

        if let Some(path) = &self.file {
            updated.save_to_file(path)?;
        }

        Ok(())
    }
}

/// Helper function to get default config directory
pub fn get_default_config_dir() -> CompanionResult<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        CompanionError::ConfigError("Could not determine home directory".to_string())
    })?;

    Ok(home_dir.join(".config").join(APP_NAME))
}

/// Helper function to get default config file path
pub fn get_default_config_file() -> CompanionResult<PathBuf> {
    Ok(get_default_config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = CompanionSettings::default();
        assert_eq!(settings.companion_path, "");
        assert_eq!(settings.runtime_launcher, "java");
        assert_eq!(settings.probe_timeout(), Duration::from_secs(2));
        assert_eq!(settings.connect_retry(), Duration::from_secs(1));
        assert_eq!(settings.base_port, 5000);
        assert_eq!(settings.resolved_companion_path(), None);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = CompanionSettings::load_from_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, CompanionSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "companion_path = \"/opt/editor/bin/editor\"\n").unwrap();

        let settings = CompanionSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.companion_path, "/opt/editor/bin/editor");
        assert_eq!(settings.connect_retry_ms, DEFAULT_CONNECT_RETRY_MS);
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let settings = CompanionSettings {
            base_port: 6100,
            ..CompanionSettings::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = CompanionSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.base_port, 6100);
    }

    #[test]
    fn test_resolved_path_requires_existing_file() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("editor");
        fs::write(&existing, "").unwrap();

        let mut settings = CompanionSettings {
            companion_path: dir.path().join("missing").display().to_string(),
            ..CompanionSettings::default()
        };
        assert_eq!(settings.resolved_companion_path(), None);

        settings.companion_path = format!("  {}  ", existing.display());
        assert_eq!(settings.resolved_companion_path(), Some(existing));
    }

    #[test]
    fn test_store_rejects_missing_path() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(CompanionSettings::default());
        let missing = dir.path().join("missing");

        let err = store
            .set_companion_path(&missing.display().to_string())
            .unwrap_err();
        assert!(matches!(err, CompanionError::PathNotFound(_)));
        assert_eq!(store.snapshot().companion_path, "");

        store.set_companion_path("").unwrap();
    }

    #[test]
    fn test_file_backed_store_persists_updates() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("config.toml");
        let editor = dir.path().join("editor.jar");
        fs::write(&editor, "").unwrap();

        let store = SettingsStore::open(&config).unwrap();
        store
            .set_companion_path(&editor.display().to_string())
            .unwrap();
        assert_eq!(store.resolved_companion_path(), Some(editor.clone()));

        let reopened = SettingsStore::open(&config).unwrap();
        assert_eq!(reopened.resolved_companion_path(), Some(editor));
    }
}
