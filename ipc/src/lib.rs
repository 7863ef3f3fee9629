// Inter-process definitions for the companion control channel:
// - Command variants and the opcode table
// - Binary encode/decode and socket framing

pub mod codec;
pub mod command;

pub use codec::{
    decode, decode_server_packet, encode, encode_frame, encode_server_packet, frame, read_frame,
    write_frame, CodecError, MAX_FRAME_LEN,
};
pub use command::{Command, Opcode, ServerPacket, ACKNOWLEDGEMENT_OPCODE, CLIENT_OPCODES};
