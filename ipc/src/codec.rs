//! Binary framing for the companion control channel.
//!
//! A packet is `opcode: u16` followed by the variant's fields in declaration
//! order. Strings are a 4-byte length followed by UTF-8 bytes, counts are
//! 4-byte integers, and repeated fields are a count followed by that many
//! elements. An absent path is written as an empty string. All integers are
//! big-endian.
//!
//! On the socket every packet is preceded by a 4-byte frame length covering
//! opcode and body, so a reader can skip packets it does not understand.

use crate::command::{Command, Opcode, ServerPacket, ACKNOWLEDGEMENT_OPCODE};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

/// Upper bound on a single frame (opcode + body)
pub const MAX_FRAME_LEN: usize = 1 << 20;

const OPCODE_LEN: usize = 2;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("Packet truncated: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("Negative length or count: {0}")]
    NegativeLength(i32),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Trailing bytes after packet body: {0}")]
    TrailingBytes(usize),

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encodes a command as opcode + body.
pub fn encode(command: &Command) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&command.opcode().id().to_be_bytes());

    match command {
        Command::OpenFile { asset_folder, file } => {
            write_path(&mut buf, Some(asset_folder));
            write_path(&mut buf, Some(file));
        }
        Command::LoadLibraries { libraries } => {
            write_paths(&mut buf, libraries);
        }
        Command::LoadCompiledClasses { output } => {
            write_path(&mut buf, output.as_deref());
        }
        Command::InitializeClasspath { output, libraries } => {
            write_paths(&mut buf, libraries);
            write_path(&mut buf, output.as_deref());
        }
    }

    buf
}

/// Encodes a command with its frame-length prefix, ready to be written to the socket.
pub fn encode_frame(command: &Command) -> Vec<u8> {
    frame(&encode(command))
}

/// Encodes the companion's acknowledgement packet (opcode only, empty body).
pub fn encode_server_packet(packet: ServerPacket) -> Vec<u8> {
    match packet {
        ServerPacket::Acknowledgement => ACKNOWLEDGEMENT_OPCODE.to_be_bytes().to_vec(),
    }
}

/// Prefixes a packet with its 4-byte frame length.
pub fn frame(packet: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + packet.len());
    buf.extend_from_slice(&(packet.len() as u32).to_be_bytes());
    buf.extend_from_slice(packet);
    buf
}

/// Decodes a host → companion packet (opcode + body).
pub fn decode(packet: &[u8]) -> Result<Command, CodecError> {
    let mut reader = PacketReader::new(packet);
    let id = reader.read_u16()?;
    let opcode = Opcode::from_id(id).ok_or(CodecError::UnknownOpcode(id))?;

    let command = match opcode {
        Opcode::OpenFile => Command::OpenFile {
            asset_folder: PathBuf::from(reader.read_string()?),
            file: PathBuf::from(reader.read_string()?),
        },
        Opcode::LoadLibraries => Command::LoadLibraries {
            libraries: reader.read_paths()?,
        },
        Opcode::LoadCompiledClasses => Command::LoadCompiledClasses {
            output: reader.read_optional_path()?,
        },
        Opcode::InitializeClasspath => {
            let libraries = reader.read_paths()?;
            let output = reader.read_optional_path()?;
            Command::InitializeClasspath { output, libraries }
        }
    };

    reader.finish()?;
    Ok(command)
}

/// Decodes a companion → host packet.
///
/// Only the acknowledgement is recognized; any body it carries is ignored.
pub fn decode_server_packet(packet: &[u8]) -> Result<ServerPacket, CodecError> {
    let mut reader = PacketReader::new(packet);
    match reader.read_u16()? {
        ACKNOWLEDGEMENT_OPCODE => Ok(ServerPacket::Acknowledgement),
        other => Err(CodecError::UnknownOpcode(other)),
    }
}

/// Reads one frame. Returns `Ok(None)` on a clean end of stream before any
/// length byte was read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        warn!("Rejecting frame of {} bytes (limit {})", len, MAX_FRAME_LEN);
        return Err(CodecError::FrameTooLarge(len));
    }
    if len < OPCODE_LEN {
        warn!("Rejecting frame of {} bytes: too short for an opcode", len);
        return Err(CodecError::Truncated {
            offset: 0,
            needed: OPCODE_LEN - len,
        });
    }

    let mut packet = vec![0u8; len];
    reader.read_exact(&mut packet).await?;
    trace!("Read frame of {} bytes", len);
    Ok(Some(packet))
}

/// Writes one already-framed buffer and flushes it.
pub async fn write_frame<W>(writer: &mut W, framed: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(framed).await?;
    writer.flush().await
}

fn write_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_i32(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

fn write_path(buf: &mut Vec<u8>, path: Option<&Path>) {
    match path {
        Some(path) => write_string(buf, &path.to_string_lossy()),
        None => write_string(buf, ""),
    }
}

fn write_paths(buf: &mut Vec<u8>, paths: &[PathBuf]) {
    write_i32(buf, paths.len() as i32);
    for path in paths {
        write_path(buf, Some(path));
    }
}

struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let bytes = self.take(4)?;
        let value = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if value < 0 {
            return Err(CodecError::NegativeLength(value));
        }
        Ok(value as usize)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn read_optional_path(&mut self) -> Result<Option<PathBuf>, CodecError> {
        let value = self.read_string()?;
        Ok((!value.is_empty()).then(|| PathBuf::from(value)))
    }

    fn read_paths(&mut self) -> Result<Vec<PathBuf>, CodecError> {
        let count = self.read_len()?;
        // Each element needs at least its 4-byte length
        let remaining = self.buf.len() - self.pos;
        if count > remaining / 4 {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: count.saturating_mul(4) - remaining,
            });
        }
        (0..count)
            .map(|_| self.read_string().map(PathBuf::from))
            .collect()
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(values: &[&str]) -> Vec<PathBuf> {
        values.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_load_libraries_layout() {
        let bytes = encode(&Command::LoadLibraries {
            libraries: paths(&["/a.jar", "/b.jar"]),
        });

        let mut expected = vec![0, 2, 0, 0, 0, 2];
        expected.extend_from_slice(&[0, 0, 0, 6]);
        expected.extend_from_slice(b"/a.jar");
        expected.extend_from_slice(&[0, 0, 0, 6]);
        expected.extend_from_slice(b"/b.jar");
        assert_eq!(bytes, expected);

        match decode(&bytes).unwrap() {
            Command::LoadLibraries { libraries } => {
                assert_eq!(libraries.len(), 2);
                assert_eq!(libraries, paths(&["/a.jar", "/b.jar"]));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_empty_library_list_is_count_only() {
        let bytes = encode(&Command::LoadLibraries { libraries: vec![] });
        assert_eq!(bytes, vec![0, 2, 0, 0, 0, 0]);
        assert_eq!(
            decode(&bytes).unwrap(),
            Command::LoadLibraries { libraries: vec![] }
        );
    }

    #[test]
    fn test_absent_output_is_empty_string() {
        let bytes = encode(&Command::LoadCompiledClasses { output: None });
        assert_eq!(bytes, vec![0, 3, 0, 0, 0, 0]);
        assert_eq!(
            decode(&bytes).unwrap(),
            Command::LoadCompiledClasses { output: None }
        );
    }

    #[test]
    fn test_initialize_classpath_field_order() {
        let command = Command::InitializeClasspath {
            output: Some(PathBuf::from("/out")),
            libraries: paths(&["/lib.jar"]),
        };
        let bytes = encode(&command);

        let mut expected = vec![0, 4, 0, 0, 0, 1, 0, 0, 0, 8];
        expected.extend_from_slice(b"/lib.jar");
        expected.extend_from_slice(&[0, 0, 0, 4]);
        expected.extend_from_slice(b"/out");
        assert_eq!(bytes, expected);
        assert_eq!(decode(&bytes).unwrap(), command);
    }

    #[test]
    fn test_open_file_utf8_paths() {
        let command = Command::OpenFile {
            asset_folder: PathBuf::from("/projets/jeu/assets"),
            file: PathBuf::from("/projets/jeu/assets/modèles/vaisseau.j3o"),
        };
        assert_eq!(decode(&encode(&command)).unwrap(), command);
    }

    #[test]
    fn test_frame_prefix() {
        let framed = encode_frame(&Command::LoadCompiledClasses { output: None });
        assert_eq!(&framed[..4], &[0, 0, 0, 6]);
        assert_eq!(&framed[4..6], &[0, 3]);
    }

    #[test]
    fn test_decode_rejects_malformed_packets() {
        assert!(matches!(decode(&[0, 9]), Err(CodecError::UnknownOpcode(9))));
        assert!(matches!(
            decode(&[0, 3, 0, 0, 0, 5, b'a']),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode(&[0, 2, 0xff, 0xff, 0xff, 0xff]),
            Err(CodecError::NegativeLength(-1))
        ));
        assert!(matches!(
            decode(&[0, 2, 0x7f, 0xff, 0xff, 0xff]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode(&[0, 3, 0, 0, 0, 0, 1]),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_server_packets() {
        let ack = encode_server_packet(ServerPacket::Acknowledgement);
        assert_eq!(decode_server_packet(&ack).unwrap(), ServerPacket::Acknowledgement);
        assert!(matches!(
            decode_server_packet(&[0, 42]),
            Err(CodecError::UnknownOpcode(42))
        ));
    }

    #[tokio::test]
    async fn test_frame_io_reads_sequential_frames() {
        let mut wire = Vec::new();
        wire.extend(encode_frame(&Command::LoadLibraries { libraries: vec![] }));
        wire.extend(frame(&[0, 77, 1, 2, 3]));

        let mut reader = wire.as_slice();
        let first = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decode(&first).unwrap(), Command::LoadLibraries { libraries: vec![] });

        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(decode(&second), Err(CodecError::UnknownOpcode(77))));

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let wire = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader = &wire[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_shorter_than_opcode_is_rejected() {
        let wire = frame(&[7]);
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::Truncated { offset: 0, needed: 1 })
        ));
    }
}
