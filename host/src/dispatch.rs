//! Per-owner dispatch worker.
//!
//! Every command for one owner goes through a single worker task that owns
//! the [`Supervisor`]. Commands are therefore totally ordered and at most one
//! launch runs at a time, no matter how many callers submit concurrently.

use crate::notify::Notifier;
use crate::supervisor::{ProcessExit, Supervisor, SupervisorState};
use companion_core::{OwnerContext, SettingsStore};
use companion_ipc::Command;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

enum Job {
    Send { ensure_ready: bool, command: Command },
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// The host-side entry point for one owner (project/module).
///
/// Must be created inside a tokio runtime. Dropping the handle cancels any
/// launch in progress and stops the companion.
pub struct CompanionHandle {
    owner: Arc<dyn OwnerContext>,
    jobs: mpsc::UnboundedSender<Job>,
    state: watch::Receiver<SupervisorState>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl CompanionHandle {
    pub fn new(
        settings: SettingsStore,
        owner: Arc<dyn OwnerContext>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state_tx, state) = watch::channel(SupervisorState::NotRunning);
        let cancel = CancellationToken::new();
        let (supervisor, exits) =
            Supervisor::new(settings, owner.clone(), notifier, state_tx, cancel.clone());

        let (jobs, job_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(supervisor, job_rx, exits, cancel.clone()));

        Self {
            owner,
            jobs,
            state,
            cancel,
            worker: Some(worker),
        }
    }

    /// Queues `command`. With `ensure_ready` the companion is launched first
    /// if needed; otherwise the command is dropped unless it is running.
    pub fn submit(&self, ensure_ready: bool, command: Command) {
        if self
            .jobs
            .send(Job::Send {
                ensure_ready,
                command,
            })
            .is_err()
        {
            debug!("Dispatch worker stopped, dropping command");
        }
    }

    /// Sends `command`, launching the companion first if it is not running.
    pub fn send_command(&self, command: Command) {
        self.submit(true, command);
    }

    /// Sends `command` only if the companion is running.
    pub fn send_command_if_running(&self, command: Command) {
        if self.state() != SupervisorState::Ready {
            debug!("Companion not running, dropping {}", command.opcode());
            return;
        }
        self.submit(false, command);
    }

    /// Opens `file` in the companion when it lives under the owner's asset
    /// folder. Returns whether a command was queued.
    pub fn open_file(&self, file: &Path) -> bool {
        let Some(asset_folder) = self.owner.asset_folder() else {
            debug!("Owner has no asset folder, not opening {}", file.display());
            return false;
        };
        if self.owner.asset_root_for(file).as_ref() != Some(&asset_folder) {
            debug!("{} is outside {}", file.display(), asset_folder.display());
            return false;
        }

        info!("Opening {} in the companion", file.display());
        self.send_command(Command::OpenFile {
            asset_folder,
            file: file.to_path_buf(),
        });
        true
    }

    /// Tells a running companion to reload the owner's compiled classes.
    pub fn on_build_finished(&self) {
        self.send_command_if_running(Command::LoadCompiledClasses {
            output: self.owner.compile_output(),
        });
    }

    /// Tells a running companion to reload the owner's libraries.
    pub fn on_project_resolved(&self) {
        self.send_command_if_running(Command::LoadLibraries {
            libraries: self.owner.libraries(),
        });
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `predicate`, returning that state.
    /// Returns `None` if the worker has stopped.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&SupervisorState) -> bool,
    ) -> Option<SupervisorState> {
        let mut state = self.state.clone();
        state.wait_for(predicate).await.ok().map(|s| *s)
    }

    /// Waits until every command queued before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.jobs.send(Job::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops the worker and the companion process.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                debug!("Dispatch worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CompanionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    mut supervisor: Supervisor,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut exits: mpsc::UnboundedReceiver<ProcessExit>,
    cancel: CancellationToken,
) {
    debug!("Dispatch worker started");
    loop {
        tokio::select! {
            biased;
            Some(exit) = exits.recv() => supervisor.handle_exit(exit).await,
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(Job::Send { ensure_ready, command }) => {
                    supervisor.dispatch(ensure_ready, command).await
                }
                Some(Job::Barrier(done)) => {
                    let _ = done.send(());
                }
                Some(Job::Shutdown) | None => break,
            },
        }
    }
    supervisor.shutdown().await;
    debug!("Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{layout, RecordingNotifier};
    use companion_core::{CompanionSettings, MessageKey, ModuleLayout};
    use tempfile::tempdir;

    fn handle(owner: ModuleLayout, notifier: Arc<RecordingNotifier>) -> CompanionHandle {
        CompanionHandle::new(
            SettingsStore::new(CompanionSettings::default()),
            Arc::new(owner),
            notifier,
        )
    }

    #[tokio::test]
    async fn test_passive_notifications_dropped_when_not_running() {
        let dir = tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = handle(layout(dir.path()), notifier.clone());

        handle.on_build_finished();
        handle.on_project_resolved();
        handle.flush().await;

        assert_eq!(handle.state(), SupervisorState::NotRunning);
        assert!(notifier.keys().is_empty());
        assert!(notifier.launches().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_file_without_path_warns_once() {
        let dir = tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = handle(layout(dir.path()), notifier.clone());

        assert!(handle.open_file(&dir.path().join("assets/Scenes/level.j3o")));
        handle.flush().await;

        assert_eq!(notifier.keys(), vec![MessageKey::NoPath]);
        assert_eq!(handle.state(), SupervisorState::Failed);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_file_outside_asset_folder_is_ignored() {
        let dir = tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = handle(layout(dir.path()), notifier.clone());

        assert!(!handle.open_file(&dir.path().join("src/main/resources/app.properties")));
        assert!(!handle.open_file(&dir.path().join("README.md")));
        handle.flush().await;

        assert!(notifier.keys().is_empty());
        assert_eq!(handle.state(), SupervisorState::NotRunning);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_launch_is_quiet() {
        let dir = tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = handle(layout(dir.path()), notifier.clone());
        let state = handle.subscribe();

        handle.shutdown().await;

        assert_eq!(*state.borrow(), SupervisorState::NotRunning);
        assert!(notifier.keys().is_empty());
    }
}
