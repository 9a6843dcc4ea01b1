// src/connection/mod.rs

//! Manages the lifecycle of a single relay TCP connection: the handshake, the pairing with
//! a peer, and the raw byte splice that follows.

mod guard;
mod handler;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::{ChannelKind, ConnectionPhase, PeerRole, SessionState};
