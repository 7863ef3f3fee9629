use companion_core::MessageKey;
use std::path::Path;
use tracing::{info, warn};

/// A user-facing warning produced when a launch attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub key: MessageKey,
    pub title: String,
    pub message: String,
}

/// Delivers launch feedback to the user.
///
/// Failures never propagate to callers of the dispatch API; this is the only
/// channel through which they surface.
pub trait Notifier: Send + Sync {
    fn warn(&self, warning: &Warning);

    /// Called when a launch sequence starts for `path`.
    fn launching(&self, _path: &Path) {}
}

/// Notifier that reports through the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn warn(&self, warning: &Warning) {
        warn!(title = %warning.title, "{}", warning.message);
    }

    fn launching(&self, path: &Path) {
        info!("{} ({})", MessageKey::LaunchTitle.title(), path.display());
    }
}
