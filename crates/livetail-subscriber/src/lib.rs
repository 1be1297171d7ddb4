//! livetail subscriber
//!
//! Follows the broadcast stream of a livetail server:
//! - [`sse`]: incremental Server-Sent Events parsing
//! - [`transcript`]: UTF-8 reassembly and the bounded line transcript
//! - [`policy`]: reconnect timing
//! - [`state`]: observable connection state
//! - [`subscriber`]: event application and the reconnecting connection loop

pub mod policy;
pub mod sse;
pub mod state;
pub mod subscriber;
pub mod transcript;

pub use policy::{ReconnectPolicy, ReconnectReason};
pub use state::{ConnectionState, ConnectionStatus};
pub use subscriber::{
    Flow, StreamTracker, Subscriber, SubscriberError, SubscriberOptions, SubscriberUpdate,
};
pub use transcript::{Transcript, Utf8Decoder};
