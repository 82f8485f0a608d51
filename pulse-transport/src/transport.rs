//! The transport seam: context state, connect flags and the `Transport` trait

use thiserror::Error;

use crate::command::{Command, Reply};

/// Lifecycle of a transport context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

impl ContextState {
    /// Whether the context is still usable (not failed or torn down)
    pub fn is_good(self) -> bool {
        !matches!(self, ContextState::Failed | ContextState::Terminated)
    }
}

/// Options for the transport connect call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    /// Allow the transport to launch a server instance if none is running
    pub autospawn: bool,
    /// Treat connection failure as retriable rather than immediately fatal
    pub wait_for_daemon: bool,
}

/// Synchronous rejection of a call at submission time
///
/// This is the one error path where the transport can supply its own
/// human-readable explanation; asynchronous completions only report a
/// success flag.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CallError(pub String);

/// Connection state notifications, fired from loop dispatch
pub type StateCallback = Box<dyn FnMut(ContextState)>;

/// Raw change notifications: packed event value plus target index
pub type SubscribeCallback = Box<dyn FnMut(u32, u32)>;

/// Receives the reply stream of one submitted command
pub type ReplyHandler = Box<dyn FnMut(Reply)>;

/// The opaque protocol/transport handle this library is built against
///
/// Implementations deliver all completions asynchronously from mainloop
/// dispatch — never from inside `submit` itself. The wire encoding behind
/// these calls is entirely the implementation's business.
pub trait Transport {
    /// Start connecting to the given server locator (`None` = default
    /// auto-discovery; otherwise a socket path or `host:port`, passed
    /// through verbatim). Resolution arrives via the state callback.
    fn connect(&mut self, server: Option<&str>, flags: ConnectFlags) -> Result<(), CallError>;

    /// Ask for an orderly teardown; the state callback observes
    /// `Terminated` once done.
    fn disconnect(&mut self);

    fn state(&self) -> ContextState;

    /// Text of the transport's most recent error, when it has one
    fn last_error(&self) -> Option<String>;

    fn set_state_callback(&mut self, cb: Option<StateCallback>);

    fn set_subscribe_callback(&mut self, cb: Option<SubscribeCallback>);

    /// Submit one asynchronous command
    ///
    /// `Err` is the synchronous rejection path (bad argument, not
    /// connected); otherwise the handler sees zero or more records
    /// followed by exactly one `Reply::Done`.
    fn submit(&mut self, command: Command, handler: ReplyHandler) -> Result<(), CallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_goodness() {
        assert!(ContextState::Unconnected.is_good());
        assert!(ContextState::Connecting.is_good());
        assert!(ContextState::Ready.is_good());
        assert!(!ContextState::Failed.is_good());
        assert!(!ContextState::Terminated.is_good());
    }
}
