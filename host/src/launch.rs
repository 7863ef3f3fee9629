//! Building the companion's command line and environment.

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Control-channel port the companion must listen on
pub const PORT_ENV: &str = "Server.api.port";
/// Protocol version requested from the companion in self-check mode
pub const API_VERSION_ENV: &str = "Server.api.version";
/// Asset/resource root of the owner
pub const ASSET_FOLDER_ENV: &str = "Editor.assetFolder";
/// Compiled-output directory of the owner
pub const COMPILE_OUTPUT_ENV: &str = "Editor.compileOutput";

/// Protocol version this host speaks
pub const PROTOCOL_VERSION: u32 = 1;
/// Exit code a compatible companion returns in self-check mode
pub const PROBE_SUCCESS_EXIT_CODE: i32 = 100;

const ARCHIVE_EXTENSION: &str = "jar";

/// Builds the base command for the companion at `path`.
///
/// Archive-style companions are started through the runtime launcher
/// (`<launcher> -jar <path>`) from the archive's directory; anything else is
/// executed directly.
pub fn companion_command(path: &Path, runtime_launcher: &str) -> io::Result<Command> {
    if is_archive(path) {
        let launcher = which::which(runtime_launcher).map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("runtime launcher '{}' not found: {}", runtime_launcher, e),
            )
        })?;
        debug!("Using runtime launcher {}", launcher.display());

        let mut cmd = Command::new(launcher);
        cmd.arg("-jar").arg(path);
        if let Some(folder) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            cmd.current_dir(folder);
        }
        Ok(cmd)
    } else {
        Ok(Command::new(path))
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// First port at or above `base` that can be bound on loopback.
pub fn find_free_port(base: u16) -> io::Result<u16> {
    for port in base..=u16::MAX {
        if TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("no free port at or above {}", base),
    ))
}

/// Forwards a child's output stream to the log, line by line, until EOF.
pub(crate) fn forward_output<R>(stream: R, label: &'static str, pid: Option<u32>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if label == "stderr" => {
                    warn!("[companion {} - {:?}]: {}", label, pid, line)
                }
                Ok(Some(line)) => debug!("[companion {} - {:?}]: {}", label, pid, line),
                Ok(None) => {
                    debug!("Companion {} closed ({:?})", label, pid);
                    break;
                }
                Err(e) => {
                    error!("Error reading companion {} ({:?}): {}", label, pid, e);
                    break;
                }
            }
        }
    });
}
