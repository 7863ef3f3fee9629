//! Compatibility probe: a throwaway run of the companion in self-check mode.

use crate::launch::{companion_command, API_VERSION_ENV, PROBE_SUCCESS_EXIT_CODE, PROTOCOL_VERSION};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum UnreachableCause {
    /// The companion did not exit within the probe timeout and was killed
    Timeout,
    /// The executable could not be started
    Spawn(io::Error),
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Compatible,
    Incompatible { exit_code: Option<i32> },
    Unreachable(UnreachableCause),
}

impl ProbeOutcome {
    pub fn is_compatible(&self) -> bool {
        matches!(self, ProbeOutcome::Compatible)
    }
}

/// Runs the companion at `path` in self-check mode and classifies the result.
pub async fn probe(path: &Path, runtime_launcher: &str, timeout: Duration) -> ProbeOutcome {
    debug!("Probing companion at {}", path.display());

    let mut cmd = match companion_command(path, runtime_launcher) {
        Ok(cmd) => cmd,
        Err(e) => return ProbeOutcome::Unreachable(UnreachableCause::Spawn(e)),
    };
    cmd.env(API_VERSION_ENV, PROTOCOL_VERSION.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn companion probe {}: {}", path.display(), e);
            return ProbeOutcome::Unreachable(UnreachableCause::Spawn(e));
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.code() == Some(PROBE_SUCCESS_EXIT_CODE) => {
            debug!("Companion at {} is compatible", path.display());
            ProbeOutcome::Compatible
        }
        Ok(Ok(status)) => {
            debug!("Companion probe at {} exited with {}", path.display(), status);
            ProbeOutcome::Incompatible {
                exit_code: status.code(),
            }
        }
        Ok(Err(e)) => ProbeOutcome::Unreachable(UnreachableCause::Spawn(e)),
        Err(_) => {
            warn!(
                "Companion probe at {} did not exit within {:?}, killing it",
                path.display(),
                timeout
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill companion probe: {}", e);
            }
            ProbeOutcome::Unreachable(UnreachableCause::Timeout)
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::test_support::{write_script, IS_PROBE};
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_probe_success_code() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "ok", &format!("{} && exit 100\nexit 1", IS_PROBE));
        assert!(probe(&script, "java", TIMEOUT).await.is_compatible());
    }

    #[tokio::test]
    async fn test_probe_other_code_is_incompatible() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "old", "exit 3");
        match probe(&script, "java", TIMEOUT).await {
            ProbeOutcome::Incompatible { exit_code } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_timeout_is_unreachable() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "hang", "exec sleep 30");
        let started = std::time::Instant::now();
        let outcome = probe(&script, "java", Duration::from_millis(200)).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unreachable(UnreachableCause::Timeout)
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_unreachable() {
        let dir = tempdir().unwrap();
        let outcome = probe(&dir.path().join("missing"), "java", TIMEOUT).await;
        match outcome {
            ProbeOutcome::Unreachable(UnreachableCause::Spawn(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
