//! `SQLite` session store for the livetail server.
//!
//! Provides persistence for sessions, their output chunks, and the
//! out-of-band schedule value behind countdown events.

mod db;
mod queries_chunks;
mod queries_schedule;
mod queries_sessions;


pub use db::{DatabaseError, StreamDatabase};
pub use livetail_core::model::{Chunk, Session, SessionStatus};
pub use queries_sessions::EndSessionOutcome;
