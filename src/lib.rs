//! Skiff Library
//!
//! Length-prefixed, frame-oriented TCP file transfer: a sender streams
//! files (or whole directory trees) to a receiver, which writes them under
//! a destination directory with path-safety and byte-count integrity
//! checks, acking each completed file.

pub mod connection;
pub mod frame;
pub mod protocol;
pub mod receiver;
pub mod server;
pub mod transfer;
pub mod wire;
pub mod writer;

/// Port both binaries use unless told otherwise.
pub const DEFAULT_PORT: u16 = 8080;
