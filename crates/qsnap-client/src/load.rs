//! Chunked upload state machine for `load`.
//!
//! The command channel carries one text line per request, so a snapshot blob
//! goes up in [`CHUNK_SIZE`] byte windows:
//!
//! ```text
//! START ──ack ok──▶ CONTINUING ──ack ok (last window)──▶ DONE
//!   │                   │  ▲
//!   │                   └──┘ ack ok (more windows)
//!   └───────────────────┴──── ack mismatch / rejection ──▶ FAILED
//! ```
//!
//! The session never touches the channel: the caller asks for the next
//! chunk, sends it, and feeds the response back through
//! [`LoadSession::acknowledge`]. Once every byte has been acknowledged the
//! phase is [`LoadPhase::Done`] and the caller sends the terminal request.

use qsnap_core::{CHUNK_SIZE, LoadPhase, Request, Response, SnapshotError, Verb};

/// Number of data chunks a blob of `len` bytes is sent in.
///
/// An empty blob still takes one (empty) `start` chunk.
#[must_use]
pub const fn chunk_count(len: usize) -> usize {
    if len == 0 { 1 } else { len.div_ceil(CHUNK_SIZE) }
}

/// One data chunk of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub phase: LoadPhase,
    /// Offset of the first byte within the blob.
    pub offset: usize,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// The `load` request carrying this chunk.
    #[must_use]
    pub fn request(&self) -> Request {
        Request::load_chunk(self.phase, self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sending(LoadPhase),
    Failed,
}

/// State of one in-progress upload.
#[derive(Debug)]
pub struct LoadSession<'a> {
    blob: &'a [u8],
    cursor: usize,
    state: State,
}

impl<'a> LoadSession<'a> {
    /// Start a session for `blob`.
    #[must_use]
    pub const fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            cursor: 0,
            state: State::Sending(LoadPhase::Start),
        }
    }

    /// Current phase, `None` once the session failed.
    #[must_use]
    pub const fn phase(&self) -> Option<LoadPhase> {
        match self.state {
            State::Sending(phase) => Some(phase),
            State::Failed => None,
        }
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    /// Bytes acknowledged so far.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total blob length.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.blob.len()
    }

    /// The chunk to send next, `None` when all data is acknowledged or the
    /// session failed.
    #[must_use]
    pub fn next_chunk(&self) -> Option<Chunk<'a>> {
        let State::Sending(phase @ (LoadPhase::Start | LoadPhase::Continuing)) = self.state else {
            return None;
        };
        let end = self.blob.len().min(self.cursor + CHUNK_SIZE);
        Some(Chunk {
            phase,
            offset: self.cursor,
            data: &self.blob[self.cursor..end],
        })
    }

    /// Feed back the remote response to the chunk from [`Self::next_chunk`].
    ///
    /// Returns the acknowledged byte count. Any error moves the session to
    /// its failed state; no further chunks are produced after that.
    ///
    /// # Errors
    /// Returns [`SnapshotError::RemoteRejected`] or
    /// [`SnapshotError::MalformedResponse`] for an unusable response and
    /// [`SnapshotError::ChunkSizeMismatch`] when the count differs from the
    /// chunk length.
    pub fn acknowledge(&mut self, response: &str) -> Result<usize, SnapshotError> {
        let result = self.advance(response);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    fn advance(&mut self, response: &str) -> Result<usize, SnapshotError> {
        let chunk = self
            .next_chunk()
            .ok_or_else(|| SnapshotError::malformed(Verb::Load, "acknowledgement without a chunk in flight"))?;

        let acknowledged = Response::classify(Verb::Load, response)?.ack()?;
        if usize::try_from(acknowledged).ok() != Some(chunk.data.len()) {
            tracing::warn!(
                phase = %chunk.phase,
                offset = chunk.offset,
                sent = chunk.data.len(),
                %acknowledged,
                "Chunk size mismatch, aborting load"
            );
            return Err(SnapshotError::ChunkSizeMismatch {
                phase: chunk.phase,
                offset: chunk.offset,
                sent: chunk.data.len(),
                acknowledged,
            });
        }

        self.cursor += chunk.data.len();
        self.state = if self.cursor < self.blob.len() {
            State::Sending(LoadPhase::Continuing)
        } else {
            State::Sending(LoadPhase::Done)
        };
        Ok(chunk.data.len())
    }
}
