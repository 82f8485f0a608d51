//! Blocking high-level client for sound-server mixer and introspection
//! controls
//!
//! The server's native control API is asynchronous: every call returns
//! immediately and completes later from event-loop dispatch. This crate
//! hides that behind [`Pulse`], a facade whose methods block by pumping a
//! single-threaded [`pulse_mainloop::Mainloop`] until the matching
//! completion arrives, so listing sinks or setting a volume reads like an
//! ordinary function call.
//!
//! ```no_run
//! use pulse_mainloop::Mainloop;
//! use pulse_transport::{MockServer, MockTransport};
//! use pulsectl::Pulse;
//!
//! # fn main() -> pulsectl::Result<()> {
//! let mainloop = Mainloop::new()?;
//! let server = MockServer::with_defaults();
//! let transport = MockTransport::new(&server, mainloop.api());
//!
//! let pulse = Pulse::new("my-mixer", None, mainloop, Box::new(transport));
//! pulse.connect(false, false, None)?;
//! for sink in pulse.sink_list()? {
//!     println!("{}: {:.0}%", sink.name, sink.volume.value_flat() * 100.0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Change notifications work the same way: select facilities with
//! [`Pulse::event_mask_set`], install a callback and block in
//! [`Pulse::event_listen`] until the callback returns
//! [`EventAction::Stop`] or a timeout passes.

pub mod error;
pub mod event;
pub mod logging;
mod ops;
pub mod pulse;
pub mod types;
pub mod volume;

pub use error::{Error, Result};
pub use event::{Event, EventAction, EventFacility, EventMask, EventType};
pub use pulse::{EventCallback, EventIterator, Pulse};
pub use types::{
    CardInfo, CardProfileInfo, ClientInfo, Entity, EntityKind, ModuleInfo, PortInfo, ServerInfo,
    SinkInfo, SinkInputInfo, SourceInfo, SourceOutputInfo, StreamRestoreInfo, VolumeEntity,
};
pub use volume::Volume;
