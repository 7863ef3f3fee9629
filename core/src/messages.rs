//! User-facing message catalogue.
//!
//! Templates may contain a `%path%` placeholder which is substituted when the
//! message is rendered.

use std::path::Path;

const PATH_PLACEHOLDER: &str = "%path%";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    LaunchTitle,
    NoPath,
    PreviouslyFailed,
    CantExecute,
    DoesNotSupport,
    DoesNotSupportByTimeout,
    NoFreePort,
    SettingsFileNotExists,
}

impl MessageKey {
    pub fn title(self) -> &'static str {
        match self {
            MessageKey::LaunchTitle => "Launching the companion...",
            MessageKey::NoPath => "Companion path not configured",
            MessageKey::PreviouslyFailed => "Companion launch failed",
            MessageKey::CantExecute => "Cannot execute the companion",
            MessageKey::DoesNotSupport | MessageKey::DoesNotSupportByTimeout => {
                "Unsupported companion"
            }
            MessageKey::NoFreePort => "No free control port",
            MessageKey::SettingsFileNotExists => "Invalid companion path",
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            MessageKey::LaunchTitle => "Waiting for the companion to start",
            MessageKey::NoPath => "Set the path to the companion executable in the settings.",
            MessageKey::PreviouslyFailed => {
                "The previous attempt to launch the companion failed. Change the configured path to try again."
            }
            MessageKey::CantExecute => "Cannot execute %path%",
            MessageKey::DoesNotSupport => {
                "The companion at %path% does not support the required API."
            }
            MessageKey::DoesNotSupportByTimeout => {
                "The companion at %path% did not respond in time."
            }
            MessageKey::NoFreePort => {
                "No free local port is available for the companion control channel."
            }
            MessageKey::SettingsFileNotExists => "The file %path% does not exist.",
        }
    }
}

/// Renders the body of a message, substituting `%path%` when a path is given.
pub fn message(key: MessageKey, path: Option<&Path>) -> String {
    let template = key.template();
    match path {
        Some(path) => template.replace(PATH_PLACEHOLDER, &path.display().to_string()),
        None => template.to_string(),
    }
}
