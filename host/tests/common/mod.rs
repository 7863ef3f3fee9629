// Shared helpers for driving the reference companion through a real handle.

#![allow(dead_code)]

use companion_core::{CompanionSettings, ModuleLayout, SettingsStore};
use companion_host::{CompanionHandle, Notifier, SupervisorState, Warning};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Default)]
pub struct Recorder {
    pub warnings: Mutex<Vec<Warning>>,
    pub launches: Mutex<Vec<PathBuf>>,
}

impl Notifier for Recorder {
    fn warn(&self, warning: &Warning) {
        self.warnings.lock().unwrap().push(warning.clone());
    }

    fn launching(&self, path: &Path) {
        self.launches.lock().unwrap().push(path.to_path_buf());
    }
}

pub struct Session {
    pub dir: TempDir,
    pub journal: PathBuf,
    pub recorder: Arc<Recorder>,
    pub handle: CompanionHandle,
}

/// Starts a handle whose companion is the reference companion. The companion
/// delays its listener by `listener_delay_ms`.
///
/// The journal location reaches the companion through the environment, so
/// each test binary may only start sessions from a single test.
pub fn start(listener_delay_ms: u64) -> Session {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("journal.log");
    std::env::set_var("REFERENCE_COMPANION_LOG", &journal);
    std::env::set_var("REFERENCE_COMPANION_DELAY_MS", listener_delay_ms.to_string());

    std::fs::create_dir_all(dir.path().join("assets/Scenes")).unwrap();
    let layout = ModuleLayout {
        name: "game".to_string(),
        compile_output: Some(dir.path().join("out")),
        libraries: vec!["/libs/engine.jar!/".to_string(), "/libs/physics.jar".to_string()],
        resource_roots: vec![dir.path().join("assets")],
    };

    let settings = SettingsStore::new(CompanionSettings {
        companion_path: env!("CARGO_BIN_EXE_reference-companion").to_string(),
        connect_retry_ms: 100,
        startup_grace_ms: 0,
        ..CompanionSettings::default()
    });

    let recorder = Arc::new(Recorder::default());
    let handle = CompanionHandle::new(settings, Arc::new(layout), recorder.clone());

    Session {
        dir,
        journal,
        recorder,
        handle,
    }
}

impl Session {
    pub fn scene(&self) -> PathBuf {
        self.dir.path().join("assets/Scenes/level.j3o")
    }

    pub fn lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.journal)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Polls the journal until `done` holds for its lines.
    pub async fn wait_for_lines(&self, mut done: impl FnMut(&[String]) -> bool) -> Vec<String> {
        let started = Instant::now();
        loop {
            let lines = self.lines();
            if done(&lines) {
                return lines;
            }
            if started.elapsed() > WAIT {
                panic!("journal never reached the expected state: {:?}", lines);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn wait_for_state(&self, wanted: SupervisorState) {
        tokio::time::timeout(WAIT, self.handle.wait_for_state(|s| *s == wanted))
            .await
            .expect("timed out waiting for state")
            .expect("dispatch worker stopped");
    }
}

pub fn count(lines: &[String], prefix: &str) -> usize {
    lines.iter().filter(|l| l.starts_with(prefix)).count()
}
