//! Caller-owned streaming session.

use livetail_core::SessionStatus;
use tracing::warn;

use crate::buffer::{BufferConfig, StreamBuffer};
use crate::client::{ClientError, SessionClient, SessionSink};

/// One producer run being streamed to the server.
///
/// Created with [`StreamSession::start`] and consumed with
/// [`StreamSession::finish`]. Dropping it unfinished ends the session as
/// Failed in the background.
pub struct StreamSession {
    client: SessionClient,
    session_id: String,
    buffer: StreamBuffer,
    finished: bool,
}

impl StreamSession {
    /// Open a server session and wire a buffer that pushes into it.
    pub async fn start(
        client: SessionClient,
        producer_ref: i64,
        config: BufferConfig,
    ) -> Result<Self, ClientError> {
        let session_id = client.start_session(producer_ref).await?;
        let sink = SessionSink::new(client.clone(), session_id.clone());
        let buffer = StreamBuffer::new(config, sink);

        Ok(Self {
            client,
            session_id,
            buffer,
            finished: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Feed output bytes. Never blocks on the network and never fails.
    pub fn write(&self, bytes: &[u8]) {
        self.buffer.write(bytes);
    }

    /// Bytes discarded under backpressure so far.
    pub fn dropped_bytes(&self) -> u64 {
        self.buffer.dropped_bytes()
    }

    /// Drain every pending chunk, then end the session with `status`.
    pub async fn finish(mut self, status: SessionStatus) -> Result<(), ClientError> {
        self.finished = true;
        self.buffer.close().await;
        let dropped = self.buffer.dropped_bytes();
        if dropped > 0 {
            warn!(session_id = %self.session_id, dropped, "Session lost output under backpressure");
        }
        self.client.end_session(&self.session_id, status).await
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(session_id = %self.session_id, "Streaming session dropped unfinished, ending as failed");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.session_id, "No runtime to end the session; it will be swept");
            return;
        };

        let client = self.client.clone();
        let buffer = self.buffer.clone();
        let session_id = std::mem::take(&mut self.session_id);
        runtime.spawn(async move {
            buffer.close().await;
            if let Err(e) = client.end_session(&session_id, SessionStatus::Failed).await {
                warn!(%session_id, error = %e, "Failed to end dropped session");
            }
        });
    }
}
