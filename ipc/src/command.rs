use std::fmt;
use std::path::PathBuf;

/// Identifies a packet variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    OpenFile = 1,
    LoadLibraries = 2,
    LoadCompiledClasses = 3,
    InitializeClasspath = 4,
}

/// Opcodes the host sends to the companion.
pub const CLIENT_OPCODES: &[Opcode] = &[
    Opcode::OpenFile,
    Opcode::LoadLibraries,
    Opcode::LoadCompiledClasses,
    Opcode::InitializeClasspath,
];

/// Opcode the companion uses for its empty acknowledgement packet.
pub const ACKNOWLEDGEMENT_OPCODE: u16 = 1;

impl Opcode {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        CLIENT_OPCODES.iter().copied().find(|opcode| opcode.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::OpenFile => "open-file",
            Opcode::LoadLibraries => "load-libraries",
            Opcode::LoadCompiledClasses => "load-compiled-classes",
            Opcode::InitializeClasspath => "initialize-classpath",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// A command sent from the host to the companion.
///
/// Commands are fire-and-forget: once encoded and written they are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open `file` in the companion, resolved against `asset_folder`.
    OpenFile { asset_folder: PathBuf, file: PathBuf },
    /// Replace the companion's view of the owner's libraries.
    LoadLibraries { libraries: Vec<PathBuf> },
    /// Reload the owner's compiled classes.
    LoadCompiledClasses { output: Option<PathBuf> },
    /// Handshake: always the first command on a fresh channel.
    InitializeClasspath {
        output: Option<PathBuf>,
        libraries: Vec<PathBuf>,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::OpenFile { .. } => Opcode::OpenFile,
            Command::LoadLibraries { .. } => Opcode::LoadLibraries,
            Command::LoadCompiledClasses { .. } => Opcode::LoadCompiledClasses,
            Command::InitializeClasspath { .. } => Opcode::InitializeClasspath,
        }
    }
}

/// A packet sent from the companion to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPacket {
    Acknowledgement,
}
