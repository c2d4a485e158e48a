//! Command channels for the snapshot monitor protocol.
//!
//! Provides:
//! - GDB Remote Serial Protocol packet framing
//! - `RspChannel` - `qRcmd` monitor channel (feature: rsp)
//! - `MemoryTarget` - In-memory emulated target (feature: memory)

pub mod packet;

#[cfg(feature = "rsp")]
pub mod rsp;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "rsp")]
pub use rsp::RspChannel;

#[cfg(feature = "memory")]
pub use memory::{Machine, MemoryTarget};
