//! Transport seam of the sound-server control client
//!
//! This crate defines the boundary between the client facade and whatever
//! actually speaks the server's protocol: the raw entity records, the
//! closed [`Command`] surface, the subscription wire format and the
//! [`Transport`] trait itself. With the `test-support` feature enabled it
//! also ships an in-memory server and transport pair for running the full
//! client stack without a real daemon.

pub mod command;
#[cfg(feature = "test-support")]
pub mod mock;
pub mod subscribe;
pub mod transport;
pub mod types;

pub use command::{Command, Record, Reply};
#[cfg(feature = "test-support")]
pub use mock::{MockServer, MockTransport};
pub use transport::{
    CallError, ConnectFlags, ContextState, ReplyHandler, StateCallback, SubscribeCallback,
    Transport,
};
