use anyhow::{Context, Result};
use colored::*;
use companion_core::{get_default_config_file, SettingsStore};
use std::path::{Path, PathBuf};

/// Opens the settings store at `path`, or at the default location
pub fn open_store(path: Option<&Path>) -> Result<SettingsStore> {
    let file = settings_file(path)?;
    SettingsStore::open(&file)
        .with_context(|| format!("Failed to load settings from {}", file.display()))
}

pub fn settings_file(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => get_default_config_file().context("Could not determine settings file location"),
    }
}

pub fn show(store: &SettingsStore) -> Result<()> {
    let settings = store.snapshot();
    let rendered = toml::to_string_pretty(&settings).context("Failed to render settings")?;
    print!("{}", rendered);

    if !settings.companion_path.trim().is_empty() && settings.resolved_companion_path().is_none() {
        eprintln!(
            "{} {} does not exist",
            "Warning:".yellow().bold(),
            settings.companion_path
        );
    }
    Ok(())
}

pub fn set_path(store: &SettingsStore, path: &str) -> Result<()> {
    store
        .set_companion_path(path)
        .with_context(|| format!("Cannot use '{}' as the companion path", path))?;
    if path.trim().is_empty() {
        println!("{}", "Companion path cleared".green());
    } else {
        println!("{} {}", "Companion path set to".green(), path.trim());
    }
    Ok(())
}
