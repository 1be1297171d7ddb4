//! Output batching.
//!
//! [`StreamBuffer`] accumulates raw output bytes and flushes them as
//! sequenced, base64 encoded chunks: 100 ms after the first unflushed write,
//! or immediately once 4096 bytes are pending. Flushed chunks are handed to a
//! [`ChunkSink`] by a single worker task, one at a time and in sequence
//! order. Sink failures are logged and never reach the writer.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use livetail_core::codec::encode_chunk;
use livetail_core::config::ProducerConfig;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

/// Destination of flushed chunks.
pub trait ChunkSink: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    fn push(
        &self,
        sequence: u64,
        content: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Flush policy and queue bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    /// Chunks allowed to wait for the sink; further flushes are dropped.
    pub max_pending_chunks: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::from(&ProducerConfig::default())
    }
}

impl From<&ProducerConfig> for BufferConfig {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            flush_threshold: config.flush_threshold_bytes,
            max_pending_chunks: config.max_pending_chunks,
        }
    }
}

type Outbound = (u64, String);

struct State {
    pending: Vec<u8>,
    next_sequence: u64,
    timer: Option<(u64, AbortHandle)>,
    timer_generation: u64,
    tx: Option<mpsc::Sender<Outbound>>,
    closed: bool,
}

struct Inner {
    config: BufferConfig,
    state: Mutex<State>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    dropped_bytes: AtomicU64,
}

/// Time/size batching buffer in front of a [`ChunkSink`].
///
/// Cloning yields another handle to the same buffer. `write` must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct StreamBuffer {
    inner: Arc<Inner>,
}

impl StreamBuffer {
    pub fn new<S: ChunkSink>(config: BufferConfig, sink: S) -> Self {
        let (tx, rx) = mpsc::channel(config.max_pending_chunks.max(1));
        let worker = tokio::spawn(deliver(rx, sink));

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    pending: Vec::new(),
                    next_sequence: 0,
                    timer: None,
                    timer_generation: 0,
                    tx: Some(tx),
                    closed: false,
                }),
                worker: tokio::sync::Mutex::new(Some(worker)),
                dropped_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Append output bytes. Never fails; after `close` this is a no-op.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.inner.lock_state();
        if state.closed {
            warn!(bytes = bytes.len(), "Write after close ignored");
            return;
        }

        state.pending.extend_from_slice(bytes);
        if state.pending.len() >= self.inner.config.flush_threshold {
            self.inner.flush_locked(&mut state);
        } else if state.timer.is_none() {
            state.timer_generation += 1;
            let generation = state.timer_generation;
            let inner = Arc::clone(&self.inner);
            let delay = self.inner.config.flush_interval;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.flush_from_timer(generation);
            });
            state.timer = Some((generation, handle.abort_handle()));
        }
    }

    /// Flush what is pending, stop accepting writes, and wait until every
    /// queued chunk has been handed to the sink. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.inner.lock_state();
            if !state.closed {
                self.inner.flush_locked(&mut state);
                state.closed = true;
                state.tx = None;
            }
        }

        let mut worker = self.inner.worker.lock().await;
        if let Some(handle) = worker.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Chunk delivery task failed");
        }
    }

    /// Sequence the next flushed chunk will carry.
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock_state().next_sequence
    }

    /// Bytes discarded because the outbound queue was full.
    pub fn dropped_bytes(&self) -> u64 {
        self.inner.dropped_bytes.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_from_timer(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.timer.as_ref().map(|(g, _)| *g) != Some(generation) {
            return;
        }
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut State) {
        if let Some((_, timer)) = state.timer.take() {
            timer.abort();
        }
        if state.pending.is_empty() {
            return;
        }
        let Some(tx) = state.tx.as_ref() else {
            return;
        };

        match tx.try_reserve() {
            Ok(permit) => {
                let snapshot = std::mem::take(&mut state.pending);
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                debug!(sequence, bytes = snapshot.len(), "Flushing chunk");
                permit.send((sequence, encode_chunk(&snapshot)));
            }
            Err(TrySendError::Full(())) => {
                let dropped = std::mem::take(&mut state.pending);
                self.dropped_bytes
                    .fetch_add(dropped.len() as u64, Ordering::Relaxed);
                warn!(
                    bytes = dropped.len(),
                    queued = self.config.max_pending_chunks,
                    "Outbound queue full, dropping output"
                );
            }
            Err(TrySendError::Closed(())) => {
                let dropped = std::mem::take(&mut state.pending);
                self.dropped_bytes
                    .fetch_add(dropped.len() as u64, Ordering::Relaxed);
                warn!(bytes = dropped.len(), "Chunk delivery stopped, dropping output");
            }
        }
    }
}

async fn deliver<S: ChunkSink>(mut rx: mpsc::Receiver<Outbound>, sink: S) {
    while let Some((sequence, content)) = rx.recv().await {
        if let Err(e) = sink.push(sequence, content).await {
            warn!(sequence, error = %e, "Chunk push failed, dropping chunk");
        }
    }
}
