use crate::notify::Warning;
use companion_core::{message, MessageKey};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a launch attempt ended without a ready companion.
///
/// Every variant is terminal for the attempt. All but `Cancelled` and
/// `ExitedDuringStartup` surface exactly one user-facing warning; those two
/// are normal lifecycle and stay silent.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("no companion path configured")]
    NoPathConfigured,

    #[error("previous launch of {0} failed; waiting for the configured path to change")]
    PreviouslyFailed(PathBuf),

    #[error("companion at {path} does not support the required API (exit code {exit_code:?})")]
    Incompatible {
        path: PathBuf,
        exit_code: Option<i32>,
    },

    #[error("companion at {0} did not respond to the compatibility probe in time")]
    ProbeTimeout(PathBuf),

    #[error("cannot execute companion at {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no free control port at or above {base}: {source}")]
    NoFreePort {
        base: u16,
        #[source]
        source: io::Error,
    },

    #[error("companion at {0} exited before accepting a connection")]
    ExitedDuringStartup(PathBuf),

    #[error("launch cancelled")]
    Cancelled,
}

impl LaunchError {
    pub fn message_key(&self) -> Option<MessageKey> {
        match self {
            LaunchError::NoPathConfigured => Some(MessageKey::NoPath),
            LaunchError::PreviouslyFailed(_) => Some(MessageKey::PreviouslyFailed),
            LaunchError::Incompatible { .. } => Some(MessageKey::DoesNotSupport),
            LaunchError::ProbeTimeout(_) => Some(MessageKey::DoesNotSupportByTimeout),
            LaunchError::Spawn { .. } => Some(MessageKey::CantExecute),
            LaunchError::NoFreePort { .. } => Some(MessageKey::NoFreePort),
            LaunchError::ExitedDuringStartup(_) | LaunchError::Cancelled => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LaunchError::PreviouslyFailed(path)
            | LaunchError::ProbeTimeout(path)
            | LaunchError::ExitedDuringStartup(path) => Some(path),
            LaunchError::Incompatible { path, .. } | LaunchError::Spawn { path, .. } => Some(path),
            LaunchError::NoPathConfigured
            | LaunchError::NoFreePort { .. }
            | LaunchError::Cancelled => None,
        }
    }

    /// Whether the failure is a property of the configured path, so that
    /// retrying the same path is pointless until it changes.
    pub fn blames_path(&self) -> bool {
        matches!(
            self,
            LaunchError::Incompatible { .. }
                | LaunchError::ProbeTimeout(_)
                | LaunchError::Spawn { .. }
        )
    }

    /// The warning shown to the user, or `None` for silent outcomes.
    pub fn warning(&self) -> Option<Warning> {
        let key = self.message_key()?;
        let mut text = message(key, self.path());
        if let LaunchError::Spawn { source, .. } | LaunchError::NoFreePort { source, .. } = self {
            text = format!("{} ({})", text, source);
        }
        Some(Warning {
            key,
            title: key.title().to_string(),
            message: text,
        })
    }
}
