// src/core/protocol/mod.rs

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::MessageCodec;
pub use frame::{
    DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_LEN, encode_frame, frame_message, read_message,
    read_typed, write_message,
};
pub use messages::{
    ClientHelloResponse, Command, CommandType, DropProperties, Hello, HostProcessHelloResponse,
    OpenProperties, PROTOCOL_VERSION, PeerType, RelayMessage,
};
