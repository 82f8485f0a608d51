//! Event registrations and their opaque handles
//!
//! Three event kinds back the transport's abstract loop interface:
//! io watches (fd readiness), time events (one-shot monotonic deadline,
//! restartable from the callback for repetition) and defer events (run on
//! every iteration while enabled).
//!
//! All handle operations — enable, restart, free — are safe to call from
//! within the event's own callback: dispatch works over an id snapshot and
//! a freed event is only reaped once the dispatch pass has finished.

use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::unix::io::RawFd;
use std::rc::Weak;
use std::time::Instant;

use crate::mainloop::Inner;

/// Readiness flags for io watches
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct IoEventFlags(u16);

impl IoEventFlags {
    pub const NULL: Self = Self(0);
    pub const INPUT: Self = Self(1);
    pub const OUTPUT: Self = Self(2);
    pub const HANGUP: Self = Self(4);
    pub const ERROR: Self = Self(8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn to_poll_events(self) -> i16 {
        let mut ev = 0;
        if self.contains(Self::INPUT) {
            ev |= libc::POLLIN;
        }
        if self.contains(Self::OUTPUT) {
            ev |= libc::POLLOUT;
        }
        // HANGUP and ERROR are always reported by poll(2); no request bits.
        ev
    }

    pub(crate) fn from_poll_events(ev: i16) -> Self {
        let mut flags = Self::NULL;
        if ev & libc::POLLIN != 0 {
            flags |= Self::INPUT;
        }
        if ev & libc::POLLOUT != 0 {
            flags |= Self::OUTPUT;
        }
        if ev & libc::POLLHUP != 0 {
            flags |= Self::HANGUP;
        }
        if ev & (libc::POLLERR | libc::POLLNVAL) != 0 {
            flags |= Self::ERROR;
        }
        flags
    }
}

impl BitOr for IoEventFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoEventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for IoEventFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::fmt::Debug for IoEventFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::INPUT, "INPUT"),
            (Self::OUTPUT, "OUTPUT"),
            (Self::HANGUP, "HANGUP"),
            (Self::ERROR, "ERROR"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Callback for an io watch: receives its own handle, the fd and the
/// readiness that triggered it.
pub type IoEventCb = Box<dyn FnMut(&IoEvent, RawFd, IoEventFlags)>;
/// Callback for a time event. The event is disarmed before delivery;
/// call [`TimeEvent::restart`] from inside to repeat.
pub type TimeEventCb = Box<dyn FnMut(&TimeEvent)>;
/// Callback for a defer event, run every iteration while enabled.
pub type DeferEventCb = Box<dyn FnMut(&DeferEvent)>;

pub(crate) struct IoSlot {
    pub(crate) fd: RawFd,
    pub(crate) interest: IoEventFlags,
    pub(crate) dead: bool,
    pub(crate) cb: Option<IoEventCb>,
}

pub(crate) struct TimeSlot {
    pub(crate) deadline: Option<Instant>,
    pub(crate) dead: bool,
    pub(crate) cb: Option<TimeEventCb>,
}

pub(crate) struct DeferSlot {
    pub(crate) enabled: bool,
    pub(crate) dead: bool,
    pub(crate) cb: Option<DeferEventCb>,
}

/// Opaque handle to a registered io watch
#[derive(Clone)]
pub struct IoEvent {
    pub(crate) id: u64,
    pub(crate) loop_ref: Weak<Inner>,
}

impl IoEvent {
    /// Change the readiness this watch polls for; `NULL` disables it
    /// without freeing the registration.
    pub fn enable(&self, interest: IoEventFlags) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.io_enable(self.id, interest);
        }
    }

    /// Unregister the watch. Safe from within the watch's own callback.
    pub fn free(&self) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.io_free(self.id);
        }
    }
}

/// Opaque handle to a time event
#[derive(Clone)]
pub struct TimeEvent {
    pub(crate) id: u64,
    pub(crate) loop_ref: Weak<Inner>,
}

impl TimeEvent {
    /// Re-arm the event for a new deadline, whether or not it has fired.
    pub fn restart(&self, deadline: Instant) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.time_restart(self.id, deadline);
        }
    }

    /// Disarm without freeing; `restart` re-arms.
    pub fn disable(&self) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.time_disable(self.id);
        }
    }

    pub fn free(&self) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.time_free(self.id);
        }
    }
}

/// Opaque handle to a defer event
#[derive(Clone)]
pub struct DeferEvent {
    pub(crate) id: u64,
    pub(crate) loop_ref: Weak<Inner>,
}

impl DeferEvent {
    pub fn enable(&self, on: bool) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.defer_enable(self.id, on);
        }
    }

    pub fn free(&self) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.defer_free(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_ops() {
        let both = IoEventFlags::INPUT | IoEventFlags::OUTPUT;
        assert!(both.contains(IoEventFlags::INPUT));
        assert!(both.contains(IoEventFlags::OUTPUT));
        assert!(!both.contains(IoEventFlags::HANGUP));
        assert!(IoEventFlags::NULL.is_empty());
        assert_eq!(format!("{:?}", both), "INPUT|OUTPUT");
        assert_eq!(format!("{:?}", IoEventFlags::NULL), "NULL");
    }

    #[test]
    fn test_poll_event_mapping() {
        let flags = IoEventFlags::from_poll_events(libc::POLLIN | libc::POLLHUP);
        assert!(flags.contains(IoEventFlags::INPUT));
        assert!(flags.contains(IoEventFlags::HANGUP));
        assert!(!flags.contains(IoEventFlags::OUTPUT));
    }
}
