//! `livetail` Core Library
//!
//! Shared functionality for the `livetail` components:
//! - Session and chunk data model
//! - Wire protocol (ingestion bodies and stream events)
//! - Chunk transport encoding
//! - Configuration resolution and hierarchy
//! - Shared `SQLite` helpers and tracing initialisation

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Chunk, Session, SessionStatus};
pub use protocol::StreamEvent;
