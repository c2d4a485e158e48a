//! Snapshot monitor protocol client.
//!
//! Provides:
//! - `SnapshotClient` - The six snapshot operations over a `CommandChannel`
//! - `LoadSession` - Chunked upload state machine
//! - Load progress observer trait

pub mod client;
pub mod load;
pub mod observer;

pub use client::SnapshotClient;
pub use load::{Chunk, LoadSession, chunk_count};
pub use observer::{LoadObserver, LogObserver, NoopObserver};
