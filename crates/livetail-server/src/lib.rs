//! livetail server
//!
//! Ingests producer output over HTTP, persists it as ordered chunks in
//! `SQLite`, and broadcasts it to subscribers over Server-Sent Events.

pub mod auth;
pub mod broadcast;
pub mod error;
pub mod lifecycle;
pub mod routes;
pub mod storage;
pub mod sweep;
