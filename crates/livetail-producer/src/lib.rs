//! livetail producer
//!
//! Captures a process's output and streams it to the livetail server:
//! - [`buffer`]: time/size batching into sequenced chunks
//! - [`client`]: HTTP client for the ingestion API
//! - [`session`]: caller-owned streaming session
//! - [`runner`]: child-process runner that tees output into a session

pub mod buffer;
pub mod client;
pub mod runner;
pub mod session;

pub use buffer::{BufferConfig, ChunkSink, StreamBuffer};
pub use client::{ClientError, SessionClient};
pub use runner::{RunError, RunOutcome, run_streamed};
pub use session::StreamSession;
