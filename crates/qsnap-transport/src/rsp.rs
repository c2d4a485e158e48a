//! Monitor command channel over the GDB Remote Serial Protocol.
//!
//! Commands travel as `qRcmd,<hex>` packets, which is what a debugger's
//! `monitor` command sends. The stub answers with any number of `O<hex>`
//! console-output packets followed by `OK`, or with a single hex-encoded
//! output packet.

use async_trait::async_trait;
use qsnap_core::{ChannelError, CommandChannel};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::{TcpStream, ToSocketAddrs},
};

use crate::packet::{self, ACK, NACK, PACKET_END, PACKET_START};

/// Default number of retransmissions before giving up on a packet.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// RSP monitor channel over an async byte stream.
pub struct RspChannel<S> {
    stream: BufStream<S>,
    max_retries: usize,
}

impl RspChannel<TcpStream> {
    /// Connect to a GDB stub over TCP.
    ///
    /// # Errors
    /// Returns error if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(peer = ?stream.peer_addr().ok(), "Connected to GDB stub");
        Ok(Self::new(stream))
    }
}

impl<S> RspChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the retransmission limit.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Unwrap the underlying stream. Buffered unread input is dropped.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    async fn send_packet(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let frame = packet::encode(payload);
        for attempt in 0..=self.max_retries {
            tracing::trace!(attempt, frame = %String::from_utf8_lossy(&frame), "-> packet");
            self.stream.write_all(&frame).await?;
            self.stream.flush().await?;

            if self.read_ack().await? == ACK {
                return Ok(());
            }
            tracing::warn!(attempt, "Stub requested retransmission");
        }
        Err(ChannelError::Framing(format!(
            "packet not acknowledged after {} attempts",
            self.max_retries + 1
        )))
    }

    async fn read_ack(&mut self) -> Result<u8, ChannelError> {
        loop {
            match self.read_byte().await? {
                b @ (ACK | NACK) => return Ok(b),
                PACKET_START => {
                    return Err(ChannelError::Framing(
                        "packet received while waiting for acknowledgement".into(),
                    ));
                }
                other => tracing::trace!(byte = other, "Skipping noise before ack"),
            }
        }
    }

    async fn receive_packet(&mut self) -> Result<Vec<u8>, ChannelError> {
        for attempt in 0..=self.max_retries {
            let (data, expected) = self.read_frame().await?;
            let actual = packet::checksum(&data);
            if actual == expected {
                tracing::trace!(packet = %String::from_utf8_lossy(&data), "<- packet");
                self.write_byte(ACK).await?;
                return packet::decode(&data).map_err(|e| ChannelError::Framing(e.to_string()));
            }
            tracing::warn!(attempt, expected, actual, "Checksum mismatch, requesting retransmission");
            self.write_byte(NACK).await?;
        }
        Err(ChannelError::Framing(format!(
            "no intact packet after {} attempts",
            self.max_retries + 1
        )))
    }

    /// Read one raw frame, returning packet-data and the transmitted checksum.
    async fn read_frame(&mut self) -> Result<(Vec<u8>, u8), ChannelError> {
        while self.read_byte().await? != PACKET_START {}

        let mut data = Vec::new();
        self.stream.read_until(PACKET_END, &mut data).await?;
        if data.pop() != Some(PACKET_END) {
            return Err(ChannelError::Closed);
        }

        let mut digits = [0u8; 2];
        self.stream
            .read_exact(&mut digits)
            .await
            .map_err(closed_on_eof)?;
        let expected =
            packet::parse_checksum(digits).map_err(|e| ChannelError::Framing(e.to_string()))?;
        Ok((data, expected))
    }

    async fn read_byte(&mut self) -> Result<u8, ChannelError> {
        self.stream.read_u8().await.map_err(closed_on_eof)
    }

    async fn write_byte(&mut self, b: u8) -> Result<(), ChannelError> {
        self.stream.write_u8(b).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> CommandChannel for RspChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn execute(&mut self, command: &str) -> Result<String, ChannelError> {
        let payload = format!("qRcmd,{}", hex::encode(command));
        self.send_packet(payload.as_bytes()).await?;

        let mut output = Vec::new();
        loop {
            let reply = self.receive_packet().await?;
            match reply.as_slice() {
                b"OK" => break,
                [] => return Err(ChannelError::Unsupported),
                [b'E', digits @ ..] if digits.len() == 2 => {
                    let code = std::str::from_utf8(digits)
                        .ok()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                        .ok_or_else(|| ChannelError::Framing("invalid error packet".into()))?;
                    return Err(ChannelError::Remote(code));
                }
                [b'O', console @ ..] => output.extend(decode_hex(console)?),
                final_output => {
                    output.extend(decode_hex(final_output)?);
                    break;
                }
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

fn decode_hex(data: &[u8]) -> Result<Vec<u8>, ChannelError> {
    hex::decode(data).map_err(|e| ChannelError::Framing(format!("invalid hex output: {e}")))
}

fn closed_on_eof(e: std::io::Error) -> ChannelError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ChannelError::Closed
    } else {
        ChannelError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    fn request(command: &str) -> Vec<u8> {
        packet::encode(format!("qRcmd,{}", hex::encode(command)).as_bytes()).to_vec()
    }

    fn reply(payload: &[u8]) -> Vec<u8> {
        packet::encode(payload).to_vec()
    }

    fn console(text: &str) -> Vec<u8> {
        reply(format!("O{}", hex::encode(text)).as_bytes())
    }

    #[tokio::test]
    async fn test_console_output_then_ok() {
        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"+")
            .read(&console("alpha:0x10\n"))
            .write(b"+")
            .read(&console("beta:0x20\n"))
            .write(b"+")
            .read(&reply(b"OK"))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        let output = channel.execute("snapshot;info").await.unwrap();
        assert_eq!(output, "alpha:0x10\nbeta:0x20\n");
    }

    #[tokio::test]
    async fn test_hex_encoded_final_reply() {
        let mock = Builder::new()
            .write(&request("snapshot;create;name:alpha"))
            .read(b"+")
            .read(&reply(hex::encode("alpha").as_bytes()))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        assert_eq!(channel.execute("snapshot;create;name:alpha").await.unwrap(), "alpha");
    }

    #[tokio::test]
    async fn test_retransmits_on_nack() {
        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"-")
            .write(&request("snapshot;info"))
            .read(b"+")
            .read(&reply(b"OK"))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        assert_eq!(channel.execute("snapshot;info").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"-")
            .write(&request("snapshot;info"))
            .read(b"-")
            .build();

        let mut channel = RspChannel::new(mock).with_max_retries(1);
        let err = channel.execute("snapshot;info").await.unwrap_err();
        assert!(matches!(err, ChannelError::Framing(_)));
    }

    #[tokio::test]
    async fn test_nacks_corrupted_reply() {
        let mut corrupted = reply(b"OK");
        let len = corrupted.len();
        corrupted[len - 1] = b'0';

        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"+")
            .read(&corrupted)
            .write(b"-")
            .read(&reply(b"OK"))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        assert_eq!(channel.execute("snapshot;info").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_error_packet() {
        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"+")
            .read(&reply(b"E01"))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        let err = channel.execute("snapshot;info").await.unwrap_err();
        assert!(matches!(err, ChannelError::Remote(1)));
    }

    #[tokio::test]
    async fn test_empty_reply_is_unsupported() {
        let mock = Builder::new()
            .write(&request("snapshot;info"))
            .read(b"+")
            .read(&reply(b""))
            .write(b"+")
            .build();

        let mut channel = RspChannel::new(mock);
        let err = channel.execute("snapshot;info").await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let mock = Builder::new().write(&request("snapshot;info")).read(b"+").build();

        let mut channel = RspChannel::new(mock);
        let err = channel.execute("snapshot;info").await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
