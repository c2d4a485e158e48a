//! Core abstractions for the snapshot monitor protocol.
//!
//! This crate provides the fundamental building blocks:
//! - `Request` / `Response` - Wire format and response classification
//! - `SnapshotCatalog` - Parsed `info` response
//! - `SnapshotError` - Error taxonomy
//! - `CommandChannel` trait

pub mod catalog;
pub mod error;
pub mod protocol;
pub mod traits;

pub use catalog::SnapshotCatalog;
pub use error::{ErrorKind, SnapshotError};
pub use protocol::{CHUNK_SIZE, ERROR_SENTINEL, LoadPhase, Request, Response, Verb};
pub use traits::{ChannelError, CommandChannel};
