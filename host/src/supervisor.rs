//! Companion process supervisor.
//!
//! The supervisor is owned by the dispatch worker. It is the only place that
//! launches the companion, holds its process and channel references and
//! decides whether a command may be sent. The watcher task owns the spawned
//! child while it runs and reports its exit back by message.

use crate::channel::{ChannelError, CompanionChannel};
use crate::error::LaunchError;
use crate::launch::{
    companion_command, find_free_port, forward_output, ASSET_FOLDER_ENV, COMPILE_OUTPUT_ENV,
    PORT_ENV,
};
use crate::notify::Notifier;
use crate::probe::{probe, ProbeOutcome, UnreachableCause};
use companion_core::{CompanionSettings, OwnerContext, SettingsStore};
use companion_ipc::Command;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotRunning,
    Launching,
    Ready,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::NotRunning => "not running",
            SupervisorState::Launching => "launching",
            SupervisorState::Ready => "ready",
            SupervisorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of the most recent launch attempt.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LaunchAttemptRecord {
    pub resolved_path: Option<PathBuf>,
    pub last_attempt_failed: bool,
    /// `resolved_path` passed the compatibility probe
    pub validated: bool,
}

/// A spawned child handed to the watcher.
pub(crate) struct WatchedProcess {
    generation: u64,
    child: Child,
    kill: oneshot::Receiver<()>,
    exited: CancellationToken,
}

/// Reported by the watcher when a watched child terminates.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    generation: u64,
    status: Option<ExitStatus>,
}

/// The supervisor's reference to the live companion process.
///
/// Dropping it kills the process.
#[derive(Debug)]
struct ProcessRef {
    generation: u64,
    pid: Option<u32>,
    exited: CancellationToken,
    _kill: oneshot::Sender<()>,
}

pub struct Supervisor {
    settings: SettingsStore,
    owner: Arc<dyn OwnerContext>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<SupervisorState>,
    record: LaunchAttemptRecord,
    process: Option<ProcessRef>,
    channel: Option<CompanionChannel>,
    generation: u64,
    watcher: mpsc::UnboundedSender<WatchedProcess>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor and starts its watcher task. Exits observed by the
    /// watcher are delivered on the returned receiver.
    pub(crate) fn new(
        settings: SettingsStore,
        owner: Arc<dyn OwnerContext>,
        notifier: Arc<dyn Notifier>,
        state: watch::Sender<SupervisorState>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessExit>) {
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_watcher(watch_rx, exit_tx));

        let supervisor = Self {
            settings,
            owner,
            notifier,
            state,
            record: LaunchAttemptRecord::default(),
            process: None,
            channel: None,
            generation: 0,
            watcher: watch_tx,
            cancel,
        };
        (supervisor, exit_rx)
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn record(&self) -> &LaunchAttemptRecord {
        &self.record
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Supervisor state {} -> {}", previous, state);
        }
    }

    /// Sends `command`, first launching the companion when `ensure_ready` is set.
    /// Commands that cannot be sent are dropped.
    pub async fn dispatch(&mut self, ensure_ready: bool, command: Command) {
        if ensure_ready {
            self.ensure_ready().await;
        } else {
            self.reap_exited().await;
        }

        if self.state() != SupervisorState::Ready {
            debug!("Companion not ready, dropping {}", command.opcode());
            return;
        }

        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.send(&command).await {
                warn!("Failed to send {} to companion: {}", command.opcode(), e);
            }
        }
    }

    /// Brings the supervisor to `Ready` if possible. Failures are reported
    /// through the notifier and leave the state at `Failed`. A companion that
    /// dies before accepting a connection leaves it at `NotRunning`.
    pub async fn ensure_ready(&mut self) {
        self.reap_exited().await;
        if self.state() == SupervisorState::Ready {
            return;
        }

        let settings = self.settings.snapshot();
        let path = settings.resolved_companion_path();

        let known_bad = self.record.last_attempt_failed && self.record.resolved_path == path;
        if let Some(failed) = path.as_ref().filter(|_| known_bad) {
            debug!("Not relaunching {}: previous attempt failed", failed.display());
            self.report(LaunchError::PreviouslyFailed(failed.clone()));
            self.set_state(SupervisorState::Failed);
            return;
        }

        if self.record.resolved_path != path {
            self.record.validated = false;
        }
        self.record.resolved_path = path.clone();
        self.record.last_attempt_failed = false;
        self.set_state(SupervisorState::Launching);

        match self.launch(path, &settings).await {
            Ok(()) => {
                self.set_state(SupervisorState::Ready);
                info!("Companion is ready");
            }
            Err(e @ (LaunchError::Cancelled | LaunchError::ExitedDuringStartup(_))) => {
                info!("Companion launch ended: {}", e);
                self.set_state(SupervisorState::NotRunning);
            }
            Err(e) => {
                warn!("Companion launch failed: {}", e);
                self.record.last_attempt_failed = e.blames_path();
                self.report(e);
                self.set_state(SupervisorState::Failed);
            }
        }
    }

    fn report(&self, error: LaunchError) {
        if let Some(warning) = error.warning() {
            self.notifier.warn(&warning);
        }
    }

    async fn launch(
        &mut self,
        path: Option<PathBuf>,
        settings: &CompanionSettings,
    ) -> Result<(), LaunchError> {
        let path = path.ok_or(LaunchError::NoPathConfigured)?;
        self.notifier.launching(&path);

        if !self.record.validated {
            self.check_compatibility(&path, settings).await?;
            self.record.validated = true;
        }

        let port = find_free_port(settings.base_port).map_err(|source| LaunchError::NoFreePort {
            base: settings.base_port,
            source,
        })?;
        debug!("Using control port {}", port);

        let child = self.spawn(&path, port, settings)?;

        if let Some(previous) = self.channel.take() {
            debug!("Destroying previous channel to {}", previous.peer());
            previous.close().await;
        }

        let exited = self.watch(child);

        let grace = settings.startup_grace();
        if !grace.is_zero() {
            tokio::select! {
                _ = exited.cancelled() => {}
                _ = tokio::time::sleep(grace) => {}
            }
        }

        let handshake = Command::InitializeClasspath {
            output: self.owner.compile_output(),
            libraries: self.owner.libraries(),
        };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        match CompanionChannel::connect(addr, settings.connect_retry(), &exited, &handshake).await {
            Ok(channel) => {
                self.channel = Some(channel);
                Ok(())
            }
            Err(ChannelError::Cancelled) if self.cancel.is_cancelled() => {
                Err(LaunchError::Cancelled)
            }
            Err(_) => {
                self.process = None;
                Err(LaunchError::ExitedDuringStartup(path))
            }
        }
    }

    async fn check_compatibility(
        &self,
        path: &Path,
        settings: &CompanionSettings,
    ) -> Result<(), LaunchError> {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LaunchError::Cancelled),
            outcome = probe(path, &settings.runtime_launcher, settings.probe_timeout()) => outcome,
        };

        match outcome {
            ProbeOutcome::Compatible => Ok(()),
            ProbeOutcome::Incompatible { exit_code } => Err(LaunchError::Incompatible {
                path: path.to_path_buf(),
                exit_code,
            }),
            ProbeOutcome::Unreachable(UnreachableCause::Timeout) => {
                Err(LaunchError::ProbeTimeout(path.to_path_buf()))
            }
            ProbeOutcome::Unreachable(UnreachableCause::Spawn(source)) => Err(LaunchError::Spawn {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn spawn(
        &self,
        path: &Path,
        port: u16,
        settings: &CompanionSettings,
    ) -> Result<Child, LaunchError> {
        let spawn_error = |source| LaunchError::Spawn {
            path: path.to_path_buf(),
            source,
        };

        let mut cmd = companion_command(path, &settings.runtime_launcher).map_err(spawn_error)?;
        cmd.env(PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(assets) = self.owner.asset_folder() {
            cmd.env(ASSET_FOLDER_ENV, assets);
        }
        if let Some(output) = self.owner.compile_output() {
            cmd.env(COMPILE_OUTPUT_ENV, output);
        }

        debug!("Spawning companion: {:?}", cmd.as_std());
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let pid = child.id();
        info!("Started companion {} (pid {:?})", path.display(), pid);

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout", pid);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr", pid);
        }

        Ok(child)
    }

    /// Hands `child` to the watcher and records it as the live process.
    /// The returned token fires when the child exits or the supervisor is
    /// cancelled.
    fn watch(&mut self, child: Child) -> CancellationToken {
        self.generation += 1;
        let pid = child.id();
        let exited = self.cancel.child_token();
        let (kill_tx, kill_rx) = oneshot::channel();

        let watched = WatchedProcess {
            generation: self.generation,
            child,
            kill: kill_rx,
            exited: exited.clone(),
        };
        if self.watcher.send(watched).is_err() {
            warn!("Companion watcher is gone; process {:?} will not be observed", pid);
        }

        self.process = Some(ProcessRef {
            generation: self.generation,
            pid,
            exited: exited.clone(),
            _kill: kill_tx,
        });
        exited
    }

    /// Resets to `NotRunning` when the live process has already exited but
    /// the watcher's report is still queued.
    async fn reap_exited(&mut self) {
        let exited = self
            .process
            .as_ref()
            .is_some_and(|p| p.exited.is_cancelled() && !self.cancel.is_cancelled());
        if exited {
            self.clear_process().await;
        }
    }

    async fn clear_process(&mut self) {
        let pid = self.process.take().and_then(|p| p.pid);
        info!("Companion (pid {:?}) is gone", pid);
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.set_state(SupervisorState::NotRunning);
    }

    /// Applies an exit reported by the watcher. Exits of processes that are no
    /// longer the live one are ignored.
    pub(crate) async fn handle_exit(&mut self, exit: ProcessExit) {
        let current = self.process.as_ref().map(|p| p.generation);
        if current != Some(exit.generation) {
            debug!("Ignoring exit of stale companion generation {}", exit.generation);
            return;
        }

        debug!("Companion generation {} exited with {:?}", exit.generation, exit.status);
        self.clear_process().await;
    }

    /// Closes the channel and kills the live process.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(process) = self.process.take() {
            debug!("Stopping companion (pid {:?})", process.pid);
        }
        self.set_state(SupervisorState::NotRunning);
    }
}

/// Waits for a process to exist, then for it to terminate, reports the exit
/// and loops.
async fn run_watcher(
    mut processes: mpsc::UnboundedReceiver<WatchedProcess>,
    exits: mpsc::UnboundedSender<ProcessExit>,
) {
    debug!("Started companion watcher");
    while let Some(mut watched) = processes.recv().await {
        debug!("Watching companion process {:?}", watched.child.id());

        let status = tokio::select! {
            status = watched.child.wait() => status.ok(),
            _ = &mut watched.kill => {
                if let Err(e) = watched.child.kill().await {
                    warn!("Failed to kill companion: {}", e);
                }
                watched.child.wait().await.ok()
            }
        };

        watched.exited.cancel();
        if exits
            .send(ProcessExit {
                generation: watched.generation,
                status,
            })
            .is_err()
        {
            break;
        }
    }
    debug!("Companion watcher stopped");
}
