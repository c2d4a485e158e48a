//! Snapshot protocol client.

use qsnap_core::{
    CommandChannel, Request, Response, SnapshotCatalog, SnapshotError, Verb,
    protocol::validate_name,
};

use crate::{
    load::{LoadSession, chunk_count},
    observer::{LoadObserver, NoopObserver},
};

/// Client for the snapshot monitor protocol.
///
/// Every operation sends one or more requests through the channel and waits
/// for each response before forming the next.
pub struct SnapshotClient<C> {
    channel: C,
}

impl<C: CommandChannel> SnapshotClient<C> {
    /// Create a client over a command channel.
    #[must_use]
    pub const fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Borrow the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutably borrow the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Unwrap the underlying channel.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Query the remote catalog.
    ///
    /// # Errors
    /// Returns error if the remote rejects the query or a record is malformed.
    pub async fn list_snapshots(&mut self) -> Result<SnapshotCatalog, SnapshotError> {
        let response = self.send(&Request::info()).await?;
        let response = Response::classify(Verb::Info, &response)?;
        SnapshotCatalog::parse(response.text())
    }

    /// Capture the current state. Without a name the remote side picks one.
    ///
    /// Returns the name of the new snapshot.
    ///
    /// # Errors
    /// Returns error if the remote rejects the request or echoes a different
    /// name than the one requested.
    pub async fn create_snapshot(&mut self, name: Option<&str>) -> Result<String, SnapshotError> {
        if let Some(name) = name {
            validate_name(name)?;
        }

        let response = self.send(&Request::create(name)).await?;
        let response = Response::classify(Verb::Create, &response)?;
        let created = match name {
            Some(name) => expect_echo(&response, name)?,
            None => response.name()?,
        };

        tracing::info!(name = created, "Created snapshot");
        Ok(created.to_string())
    }

    /// Restore the target to a snapshot.
    ///
    /// # Errors
    /// Returns [`SnapshotError::NotFound`] if the catalog does not list the
    /// name, otherwise error if the remote rejects or echoes another name.
    pub async fn restore_snapshot(&mut self, name: &str) -> Result<(), SnapshotError> {
        self.require(name).await?;

        let response = self.send(&Request::restore(name)).await?;
        expect_echo(&Response::classify(Verb::Restore, &response)?, name)?;

        tracing::info!(name, "Restored snapshot");
        Ok(())
    }

    /// Delete a snapshot.
    ///
    /// # Errors
    /// Returns [`SnapshotError::NotFound`] if the catalog does not list the
    /// name, otherwise error if the remote rejects the request.
    pub async fn delete_snapshot(&mut self, name: &str) -> Result<(), SnapshotError> {
        self.require(name).await?;

        let response = self.send(&Request::delete(name)).await?;
        Response::classify(Verb::Delete, &response)?;

        tracing::info!(name, "Deleted snapshot");
        Ok(())
    }

    /// Serialize a snapshot to bytes.
    ///
    /// The whole blob comes back hex-encoded in a single response.
    ///
    /// # Errors
    /// Returns [`SnapshotError::NotFound`] if the catalog does not list the
    /// name, otherwise error if the remote rejects the request or the payload
    /// is not valid hex.
    pub async fn save_snapshot(&mut self, name: &str) -> Result<Vec<u8>, SnapshotError> {
        self.require(name).await?;

        let response = self.send(&Request::save(name)).await?;
        let blob = Response::classify(Verb::Save, &response)?.blob()?;

        tracing::info!(name, len = blob.len(), "Saved snapshot");
        Ok(blob)
    }

    /// Upload a serialized snapshot. Without a name the remote side picks one.
    ///
    /// Returns the name of the materialized snapshot.
    ///
    /// # Errors
    /// See [`Self::load_snapshot_with`].
    pub async fn load_snapshot(
        &mut self,
        blob: &[u8],
        name: Option<&str>,
    ) -> Result<String, SnapshotError> {
        self.load_snapshot_with(blob, name, &mut NoopObserver).await
    }

    /// Upload a serialized snapshot, reporting progress to `observer`.
    ///
    /// Chunks go out strictly in order; the first failed chunk aborts the
    /// upload and nothing after it is sent.
    ///
    /// # Errors
    /// Returns [`SnapshotError::ChunkSizeMismatch`] if a chunk is not fully
    /// acknowledged, [`SnapshotError::RemoteRejected`] or
    /// [`SnapshotError::MalformedResponse`] for unusable responses, and
    /// [`SnapshotError::NameMismatch`] if the final echo differs from the
    /// requested name.
    pub async fn load_snapshot_with(
        &mut self,
        blob: &[u8],
        name: Option<&str>,
        observer: &mut dyn LoadObserver,
    ) -> Result<String, SnapshotError> {
        if let Some(name) = name {
            validate_name(name)?;
        }

        tracing::debug!(len = blob.len(), chunks = chunk_count(blob.len()), "Starting load");
        let mut session = LoadSession::new(blob);
        while let Some(chunk) = session.next_chunk() {
            tracing::debug!(phase = %chunk.phase, offset = chunk.offset, len = chunk.data.len(), "Sending chunk");
            let response = self.send(&chunk.request()).await?;
            session.acknowledge(&response)?;
            observer.on_chunk(chunk.phase, session.cursor(), session.total());
        }

        let response = self.send(&Request::load_done(name)).await?;
        let response = Response::classify(Verb::Load, &response)?;
        let loaded = match name {
            Some(name) => expect_echo(&response, name)?,
            None => response.name()?,
        };

        observer.on_finished(loaded);
        tracing::info!(name = loaded, len = blob.len(), "Loaded snapshot");
        Ok(loaded.to_string())
    }

    async fn send(&mut self, request: &Request) -> Result<String, SnapshotError> {
        let line = request.command_line();
        tracing::debug!(verb = %request.verb, len = line.len(), "Sending snapshot command");
        let response = self.channel.execute(&line).await?;
        tracing::debug!(verb = %request.verb, len = response.len(), "Received response");
        Ok(response)
    }

    /// Check a fresh catalog for `name` before operating on it.
    async fn require(&mut self, name: &str) -> Result<(), SnapshotError> {
        validate_name(name)?;
        if self.list_snapshots().await?.contains(name) {
            Ok(())
        } else {
            tracing::warn!(name, "Snapshot not found");
            Err(SnapshotError::NotFound(name.to_string()))
        }
    }
}

fn expect_echo<'a>(response: &Response<'a>, expected: &str) -> Result<&'a str, SnapshotError> {
    let actual = response.text().trim();
    if actual == expected {
        Ok(actual)
    } else {
        tracing::warn!(verb = %response.verb(), expected, actual, "Echoed name mismatch");
        Err(SnapshotError::NameMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
