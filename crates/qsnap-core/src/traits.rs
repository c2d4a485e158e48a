//! Core trait for the command channel the snapshot protocol runs over.

use async_trait::async_trait;
use thiserror::Error;

/// Transport failure.
///
/// Protocol-level failures never show up here: the remote side reports those
/// inside the response text. This only covers the channel itself breaking.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Framing error: {0}")]
    Framing(String),
    #[error("Remote stub returned error code {0:#04x}")]
    Remote(u8),
    #[error("Remote stub does not support monitor commands")]
    Unsupported,
    #[error("Connection closed")]
    Closed,
}

/// A synchronous text command channel into the debugged target.
///
/// One command line goes in, the complete textual response comes back.
/// Taking `&mut self` guarantees a single request in flight per channel.
#[async_trait]
pub trait CommandChannel: Send {
    /// Execute a single-line command and return the full response.
    async fn execute(&mut self, command: &str) -> Result<String, ChannelError>;
}

#[async_trait]
impl<C: CommandChannel + ?Sized> CommandChannel for &mut C {
    async fn execute(&mut self, command: &str) -> Result<String, ChannelError> {
        (**self).execute(command).await
    }
}

#[async_trait]
impl<C: CommandChannel + ?Sized> CommandChannel for Box<C> {
    async fn execute(&mut self, command: &str) -> Result<String, ChannelError> {
        (**self).execute(command).await
    }
}
