// Minimal companion implementing the companion side of the control protocol.
// Every command received is acknowledged and, when REFERENCE_COMPANION_LOG is
// set, appended to that file one line per command.

use anyhow::{Context, Result};
use companion_host::launch::{API_VERSION_ENV, PORT_ENV, PROBE_SUCCESS_EXIT_CODE, PROTOCOL_VERSION};
use companion_ipc::{decode, encode_server_packet, frame, read_frame, Command, ServerPacket};
use std::env;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "REFERENCE_COMPANION_LOG";
const DELAY_ENV: &str = "REFERENCE_COMPANION_DELAY_MS";
const PROBE_FAILURE_EXIT_CODE: i32 = 2;

/// Append-only record of what the companion received
#[derive(Clone)]
struct Journal {
    file: Option<Arc<Mutex<File>>>,
}

impl Journal {
    fn open(path: Option<PathBuf>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open journal {}", path.display()))?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };
        Ok(Self { file })
    }

    fn record(&self, line: &str) {
        info!("{}", line);
        let Some(file) = &self.file else {
            return;
        };
        let mut file = match file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            warn!("Failed to write journal: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Ok(requested) = env::var(API_VERSION_ENV) {
        let code = if requested.trim() == PROTOCOL_VERSION.to_string() {
            PROBE_SUCCESS_EXIT_CODE
        } else {
            PROBE_FAILURE_EXIT_CODE
        };
        debug!("Self-check for API version {}: exit {}", requested, code);
        std::process::exit(code);
    }

    if let Err(e) = serve().await {
        error!("Reference companion failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn serve() -> Result<()> {
    let port: u16 = env::var(PORT_ENV)
        .with_context(|| format!("{} is not set", PORT_ENV))?
        .parse()
        .with_context(|| format!("{} is not a port number", PORT_ENV))?;
    let journal = Journal::open(env::var_os(LOG_ENV).map(PathBuf::from))?;
    journal.record(&format!("pid {}", std::process::id()));

    let delay = env::var(DELAY_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if delay > 0 {
        debug!("Delaying listener by {}ms", delay);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("Failed to listen on port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, peer, journal.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, journal: Journal) {
    debug!("Host connected from {}", peer);
    let ack = frame(&encode_server_packet(ServerPacket::Acknowledgement));
    loop {
        let packet = match read_frame(&mut stream).await {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => {
                warn!("Connection from {} failed: {}", peer, e);
                break;
            }
        };
        match decode(&packet) {
            Ok(command) => journal.record(&describe(&command)),
            Err(e) => warn!("Ignoring undecodable packet: {}", e),
        }
        if let Err(e) = stream.write_all(&ack).await {
            warn!("Failed to acknowledge: {}", e);
            break;
        }
    }
    debug!("Host at {} disconnected", peer);
}

fn describe(command: &Command) -> String {
    let name = command.opcode().name();
    match command {
        Command::OpenFile { asset_folder, file } => {
            format!("{} {} {}", name, asset_folder.display(), file.display())
        }
        Command::LoadLibraries { libraries } => format!("{} {}", name, join(libraries)),
        Command::LoadCompiledClasses { output } => {
            format!("{} {}", name, display_opt(output.as_deref()))
        }
        Command::InitializeClasspath { output, libraries } => format!(
            "{} {} {}",
            name,
            display_opt(output.as_deref()),
            join(libraries)
        ),
    }
}

fn join(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}
