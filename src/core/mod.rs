// src/core/mod.rs

//! The central module containing the relay's wire protocol, session registry, and shared state.

pub mod errors;
pub mod metrics;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod state;

pub use errors::RelayError;
pub use peer::{CommandChannel, Outbound, PeerHandle, SessionId};
pub use registry::{AssignDenial, HostRelease, RegistrySnapshot, SessionRegistry};
pub use state::RelayState;
