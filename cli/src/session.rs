use crate::output::print_session_help;
use anyhow::{anyhow, Context, Result};
use colored::*;
use companion_core::{ModuleLayout, OwnerContext, SettingsStore};
use companion_host::{CompanionHandle, Notifier, SupervisorState};
use companion_ipc::Command;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

fn load_module(path: &Path) -> Result<Arc<ModuleLayout>> {
    let layout = ModuleLayout::load_from_file(path)
        .with_context(|| format!("Failed to load module layout {}", path.display()))?;
    debug!("Loaded module '{}' from {}", layout.name, path.display());
    Ok(Arc::new(layout))
}

/// Opens `file` in the companion and stays attached until Ctrl-C or until
/// the companion exits.
pub async fn open(
    store: SettingsStore,
    notifier: Arc<dyn Notifier>,
    module: &Path,
    file: &Path,
) -> Result<()> {
    let layout = load_module(module)?;
    let file = absolute(file)?;
    let handle = CompanionHandle::new(store, layout, notifier);

    if !handle.open_file(&file) {
        handle.shutdown().await;
        return Err(anyhow!(
            "{} is not under the module's asset folder",
            file.display()
        ));
    }
    handle.flush().await;
    if handle.state() != SupervisorState::Ready {
        handle.shutdown().await;
        return Err(anyhow!("The companion could not be started"));
    }

    println!("{} {}", "Opened".green(), file.display());
    println!("Press Ctrl-C to stop the companion");
    wait_for_exit(&handle).await;
    handle.shutdown().await;
    Ok(())
}

/// Launches the companion and relays simple commands read from stdin.
pub async fn run(store: SettingsStore, notifier: Arc<dyn Notifier>, module: &Path) -> Result<()> {
    let layout = load_module(module)?;
    let handle = CompanionHandle::new(store, layout.clone(), notifier);

    // Any command that needs a running companion starts it
    handle.send_command(Command::LoadCompiledClasses {
        output: layout.compile_output(),
    });
    handle.flush().await;
    if handle.state() != SupervisorState::Ready {
        handle.shutdown().await;
        return Err(anyhow!("The companion could not be started"));
    }

    print_session_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = handle.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SupervisorState::NotRunning {
                    println!("{}", "The companion exited".yellow());
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !handle_line(&handle, line.trim())? {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Applies one session command. Returns `false` when the session should end.
fn handle_line(handle: &CompanionHandle, line: &str) -> Result<bool> {
    let (verb, arg) = line
        .split_once(char::is_whitespace)
        .map(|(v, a)| (v, a.trim()))
        .unwrap_or((line, ""));

    match verb {
        "" => {}
        "open" if !arg.is_empty() => {
            let file = absolute(Path::new(arg))?;
            if !handle.open_file(&file) {
                eprintln!("{} is not under the asset folder", file.display());
            }
        }
        "build" => handle.on_build_finished(),
        "resolve" => handle.on_project_resolved(),
        "quit" | "exit" => return Ok(false),
        _ => print_session_help(),
    }
    Ok(true)
}

async fn wait_for_exit(handle: &CompanionHandle) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = handle.wait_for_state(|s| *s == SupervisorState::NotRunning) => {
            println!("{}", "The companion exited".yellow());
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to determine the current directory")?;
    Ok(cwd.join(path))
}
