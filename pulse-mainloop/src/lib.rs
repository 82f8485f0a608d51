//! Single-threaded cooperative event loop for the pulsectl transport
//!
//! One `Mainloop` per connection multiplexes the transport's io against
//! timers and deferred callbacks. The loop is driven, never spawned: the
//! blocking entry points of the client repeatedly call [`Mainloop::iterate`]
//! until whatever they are waiting for resolves.
//!
//! The `prepare`/`poll`/`dispatch` steps are exposed individually so a
//! caller implementing a bounded wait can interleave its own deadline check
//! between prepare and poll, and the poll step itself is pluggable via
//! [`Mainloop::set_poll_func`] for embedding into a host loop.
//!
//! # Example
//!
//! ```rust
//! use pulse_mainloop::Mainloop;
//!
//! let ml = Mainloop::new()?;
//! let api = ml.api();
//! let _tick = ml.defer_new(Box::new(move |_| api.quit(0)));
//! assert_eq!(ml.run()?, 0);
//! # Ok::<(), pulse_mainloop::MainloopError>(())
//! ```

mod error;
mod events;
mod mainloop;
mod poll;

pub use error::{MainloopError, Result};
pub use events::{
    DeferEvent, DeferEventCb, IoEvent, IoEventCb, IoEventFlags, TimeEvent, TimeEventCb,
};
pub use mainloop::{IterateResult, Mainloop, MainloopApi, Step};
pub use poll::{native_poll, PollFd, PollFunc};
