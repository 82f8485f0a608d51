//! Poll descriptors and the pluggable poll backend
//!
//! The loop's poll step can be swapped for a caller-supplied function via
//! [`Mainloop::set_poll_func`](crate::Mainloop::set_poll_func), which is how
//! the loop gets embedded into a host application's own readiness mechanism.
//! The default backend is `poll(2)`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::events::IoEventFlags;

/// One descriptor of interest for a poll cycle
///
/// Layout-compatible with `struct pollfd` so the default backend can hand
/// the slice straight to `poll(2)`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub fd: RawFd,
    pub events: i16,
    pub revents: i16,
}

impl PollFd {
    pub fn new(fd: RawFd, interest: IoEventFlags) -> Self {
        Self {
            fd,
            events: interest.to_poll_events(),
            revents: 0,
        }
    }

    /// Readiness reported by the last poll cycle
    pub fn ready(&self) -> IoEventFlags {
        IoEventFlags::from_poll_events(self.revents)
    }
}

/// A caller-supplied replacement for the poll step
///
/// Receives the descriptors of interest and a timeout (`None` blocks
/// indefinitely) and returns the number of ready descriptors, with their
/// `revents` fields filled in.
pub type PollFunc = Box<dyn FnMut(&mut [PollFd], Option<Duration>) -> io::Result<usize>>;

/// Default poll backend: a single blocking `poll(2)` call
///
/// `EINTR` is reported as zero ready descriptors rather than an error; any
/// other failure is fatal to the loop.
pub fn native_poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        // Round up so a sub-millisecond timeout does not busy-spin as 0ms.
        Some(d) => {
            let mut ms = d.as_millis();
            if d.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    };
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr() as *mut libc::pollfd,
            fds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pollfd_round_trip_flags() {
        let pfd = PollFd::new(3, IoEventFlags::INPUT | IoEventFlags::OUTPUT);
        assert_eq!(pfd.events, libc::POLLIN | libc::POLLOUT);
        assert!(pfd.ready().is_empty());
    }

    #[test]
    fn test_native_poll_zero_timeout_empty_set() {
        let mut fds = [];
        let n = native_poll(&mut fds, Some(Duration::ZERO)).unwrap();
        assert_eq!(n, 0);
    }
}
