// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod endpoint;
pub mod server;

// Re-export
pub use crate::core::{RelayError, RelayState};
