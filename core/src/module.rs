use crate::errors::{CompanionError, CompanionResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffixes the host's library model appends to archive roots
const ARCHIVE_ROOT_MARKERS: &[&str] = &["!/", "!\\"];

/// What the supervisor needs to know about the owner (project/module) it serves.
pub trait OwnerContext: Send + Sync {
    /// Directory holding the owner's compiled output, if any
    fn compile_output(&self) -> Option<PathBuf>;

    /// Compile-scope library paths
    fn libraries(&self) -> Vec<PathBuf>;

    /// Asset root passed to the companion
    fn asset_folder(&self) -> Option<PathBuf>;

    /// Resource root containing `file`, if any
    fn asset_root_for(&self, file: &Path) -> Option<PathBuf>;
}

/// Static description of a module, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModuleLayout {
    pub name: String,
    pub compile_output: Option<PathBuf>,
    /// Library roots as reported by the host, possibly with archive-root markers
    pub libraries: Vec<String>,
    pub resource_roots: Vec<PathBuf>,
}

impl ModuleLayout {
    pub fn load_from_file(path: &Path) -> CompanionResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CompanionError::LayoutError(format!(
                "Failed to read module layout {}: {}",
                path.display(),
                e
            ))
        })?;
        let layout = serde_json::from_str(&content)?;
        Ok(layout)
    }
}

impl OwnerContext for ModuleLayout {
    fn compile_output(&self) -> Option<PathBuf> {
        self.compile_output.clone()
    }

    fn libraries(&self) -> Vec<PathBuf> {
        self.libraries
            .iter()
            .map(|raw| PathBuf::from(normalize_library_path(raw)))
            .collect()
    }

    fn asset_folder(&self) -> Option<PathBuf> {
        self.resource_roots
            .iter()
            .find(|root| {
                root.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with("assets"))
            })
            .or_else(|| self.resource_roots.first())
            .cloned()
    }

    fn asset_root_for(&self, file: &Path) -> Option<PathBuf> {
        self.resource_roots
            .iter()
            .find(|root| file.starts_with(root))
            .cloned()
    }
}

/// Strips a trailing archive-root marker (`!/` or `!\`) from a library path.
pub fn normalize_library_path(path: &str) -> &str {
    ARCHIVE_ROOT_MARKERS
        .iter()
        .find_map(|marker| path.strip_suffix(marker))
        .unwrap_or(path)
}
