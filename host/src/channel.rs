//! Control-channel client endpoint.

use companion_ipc::{
    decode_server_packet, encode_frame, read_frame, write_frame, CodecError, Command, ServerPacket,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("connection attempt cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A live connection to the companion.
///
/// The handshake has already been written by the time a channel is handed
/// out, so nothing sent through it can precede the handshake.
#[derive(Debug)]
pub struct CompanionChannel {
    peer: SocketAddr,
    writer: BufWriter<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

impl CompanionChannel {
    /// Connects to `addr`, retrying every `retry` until a connection is made
    /// or `cancel` fires, then writes `handshake`.
    pub async fn connect(
        addr: SocketAddr,
        retry: Duration,
        cancel: &CancellationToken,
        handshake: &Command,
    ) -> Result<Self, ChannelError> {
        let mut attempt: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            attempt += 1;
            debug!("Connecting to companion at {} (attempt {})", addr, attempt);

            let connected = tokio::select! {
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                result = TcpStream::connect(addr) => result,
            };

            match connected {
                Ok(stream) => match Self::establish(stream, addr, handshake).await {
                    Ok(channel) => {
                        info!("Connected to companion at {} after {} attempt(s)", addr, attempt);
                        return Ok(channel);
                    }
                    Err(e) => warn!("Handshake with companion at {} failed: {}", addr, e),
                },
                Err(e) => debug!("Companion at {} not reachable yet: {}", addr, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                _ = tokio::time::sleep(retry) => {}
            }
        }
    }

    async fn establish(
        stream: TcpStream,
        peer: SocketAddr,
        handshake: &Command,
    ) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = BufWriter::new(write_half);

        write_frame(&mut writer, &encode_frame(handshake)).await?;
        debug!("Sent handshake {} to {}", handshake.opcode(), peer);

        let reader = tokio::spawn(read_inbound(read_half, peer));
        Ok(Self {
            peer,
            writer,
            reader,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, command: &Command) -> Result<(), ChannelError> {
        write_frame(&mut self.writer, &encode_frame(command)).await?;
        debug!("Sent {} to {}", command.opcode(), self.peer);
        Ok(())
    }

    pub async fn close(mut self) {
        debug!("Closing channel to {}", self.peer);
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error shutting down channel to {}: {}", self.peer, e);
        }
        self.reader.abort();
    }
}

impl Drop for CompanionChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// Inbound packets carry no information the host needs beyond "something
// arrived"; anything unrecognized is skipped.
async fn read_inbound(mut reader: OwnedReadHalf, peer: SocketAddr) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(packet)) => match decode_server_packet(&packet) {
                Ok(ServerPacket::Acknowledgement) => debug!("Acknowledgement from {}", peer),
                Err(CodecError::UnknownOpcode(id)) => {
                    warn!("Skipping packet with unknown opcode {} from {}", id, peer)
                }
                Err(e) => warn!("Skipping malformed packet from {}: {}", peer, e),
            },
            Ok(None) => {
                debug!("Companion at {} closed the channel", peer);
                break;
            }
            Err(e) => {
                debug!("Channel to {} failed: {}", peer, e);
                break;
            }
        }
    }
}
