//! The loop proper: prepare/poll/dispatch and the combined iterate step

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{MainloopError, Result};
use crate::events::{
    DeferEvent, DeferEventCb, DeferSlot, IoEvent, IoEventCb, IoEventFlags, IoSlot, TimeEvent,
    TimeEventCb, TimeSlot,
};
use crate::poll::{native_poll, PollFd, PollFunc};

/// Outcome of `prepare`: either go on to poll, or the loop was asked to
/// stop. A quit is a control signal, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Step {
    Continue,
    Quit(i32),
}

/// Outcome of one full iterate cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterateResult {
    /// Number of callbacks dispatched this cycle
    Success(usize),
    /// The loop was asked to stop, with the given status code
    Quit(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Prepared,
    Polled,
}

pub(crate) struct Inner {
    ios: RefCell<BTreeMap<u64, IoSlot>>,
    times: RefCell<BTreeMap<u64, TimeSlot>>,
    defers: RefCell<BTreeMap<u64, DeferSlot>>,
    next_id: Cell<u64>,

    quit_ret: Cell<Option<i32>>,
    phase: Cell<Phase>,

    pollfds: RefCell<Vec<PollFd>>,
    // Parallel to `pollfds`; None marks the wakeup pipe entry.
    pollfd_ids: RefCell<Vec<Option<u64>>>,
    poll_timeout: Cell<Option<Duration>>,
    poll_func: RefCell<Option<PollFunc>>,

    wake_r: RawFd,
    wake_w: RawFd,
}

impl Drop for Inner {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_r);
            libc::close(self.wake_w);
        }
    }
}

/// Single-threaded cooperative event loop
///
/// Owns the io/time/defer registrations backing a transport context.
/// Exactly one of these exists per connection; the connection drives it
/// from its blocking entry points. Registration handles hold weak
/// references, so dropping the `Mainloop` tears everything down without
/// reference cycles through user callbacks.
pub struct Mainloop {
    inner: Rc<Inner>,
}

/// Cloneable registration surface handed to the transport
///
/// This is the abstract loop interface a transport uses to schedule its
/// own io watches, timers and deferred work. It holds only a weak
/// reference: operations after the loop is gone are silently inert.
#[derive(Clone)]
pub struct MainloopApi {
    loop_ref: Weak<Inner>,
}

impl Mainloop {
    pub fn new() -> Result<Self> {
        let mut pipe = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(pipe.as_mut_ptr()) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        for fd in pipe {
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
            }
        }
        debug!(wake_r = pipe[0], wake_w = pipe[1], "mainloop created");
        Ok(Self {
            inner: Rc::new(Inner {
                ios: RefCell::new(BTreeMap::new()),
                times: RefCell::new(BTreeMap::new()),
                defers: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(1),
                quit_ret: Cell::new(None),
                phase: Cell::new(Phase::Idle),
                pollfds: RefCell::new(Vec::new()),
                pollfd_ids: RefCell::new(Vec::new()),
                poll_timeout: Cell::new(None),
                poll_func: RefCell::new(None),
                wake_r: pipe[0],
                wake_w: pipe[1],
            }),
        })
    }

    /// Registration surface for the transport
    pub fn api(&self) -> MainloopApi {
        MainloopApi {
            loop_ref: Rc::downgrade(&self.inner),
        }
    }

    /// Swap the poll step for a caller-supplied backend
    ///
    /// The backend receives the descriptors of interest and the effective
    /// timeout computed by `prepare`, and reports the ready count with
    /// `revents` filled in. This is the hook for driving the loop from a
    /// host application's own readiness mechanism.
    pub fn set_poll_func<F>(&self, f: F)
    where
        F: FnMut(&mut [PollFd], Option<Duration>) -> std::io::Result<usize> + 'static,
    {
        *self.inner.poll_func.borrow_mut() = Some(Box::new(f));
    }

    pub fn io_new(&self, fd: RawFd, interest: IoEventFlags, cb: IoEventCb) -> IoEvent {
        self.inner.io_new(fd, interest, cb)
    }

    pub fn time_new(&self, deadline: Instant, cb: TimeEventCb) -> TimeEvent {
        self.inner.time_new(deadline, cb)
    }

    pub fn defer_new(&self, cb: DeferEventCb) -> DeferEvent {
        self.inner.defer_new(cb)
    }

    /// Build the descriptor set and compute the effective poll timeout
    ///
    /// The given timeout is capped by the next armed time event, and forced
    /// to zero while any defer event is enabled. `None` means block until
    /// something happens.
    pub fn prepare(&self, timeout: Option<Duration>) -> Result<Step> {
        self.inner.prepare(timeout)
    }

    /// Run the poll backend over the prepared descriptor set
    pub fn poll(&self) -> Result<usize> {
        self.inner.poll()
    }

    /// Deliver ready callbacks: defers first, then io, then expired timers
    ///
    /// Returns the number of callbacks dispatched. A quit requested by one
    /// of them stops further delivery within this cycle.
    pub fn dispatch(&self) -> Result<usize> {
        self.inner.dispatch()
    }

    /// One full prepare/poll/dispatch cycle
    ///
    /// With `block = false` the cycle never waits: if nothing is ready it
    /// dispatches nothing and returns.
    pub fn iterate(&self, block: bool) -> Result<IterateResult> {
        let timeout = if block { None } else { Some(Duration::ZERO) };
        match self.prepare(timeout)? {
            Step::Quit(retval) => return Ok(IterateResult::Quit(retval)),
            Step::Continue => {}
        }
        self.poll()?;
        let n = self.dispatch()?;
        Ok(IterateResult::Success(n))
    }

    /// Iterate until a quit is requested; returns the quit status code
    pub fn run(&self) -> Result<i32> {
        loop {
            if let IterateResult::Quit(retval) = self.iterate(true)? {
                debug!(retval, "mainloop run finished");
                return Ok(retval);
            }
        }
    }

    /// Ask the loop to stop with the given status code
    ///
    /// Sticky: every subsequent `prepare` reports the quit until the loop
    /// is dropped. Also wakes a blocking poll so the request is observed
    /// promptly.
    pub fn quit(&self, retval: i32) {
        self.inner.quit_ret.set(Some(retval));
        self.inner.wakeup();
    }

    /// Interrupt a blocking poll from another scheduling context
    pub fn wakeup(&self) {
        self.inner.wakeup();
    }
}

impl MainloopApi {
    pub fn io_new(&self, fd: RawFd, interest: IoEventFlags, cb: IoEventCb) -> IoEvent {
        match self.loop_ref.upgrade() {
            Some(l) => l.io_new(fd, interest, cb),
            None => self.inert(|id, loop_ref| IoEvent { id, loop_ref }),
        }
    }

    pub fn time_new(&self, deadline: Instant, cb: TimeEventCb) -> TimeEvent {
        match self.loop_ref.upgrade() {
            Some(l) => l.time_new(deadline, cb),
            None => self.inert(|id, loop_ref| TimeEvent { id, loop_ref }),
        }
    }

    pub fn defer_new(&self, cb: DeferEventCb) -> DeferEvent {
        match self.loop_ref.upgrade() {
            Some(l) => l.defer_new(cb),
            None => self.inert(|id, loop_ref| DeferEvent { id, loop_ref }),
        }
    }

    pub fn quit(&self, retval: i32) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.quit_ret.set(Some(retval));
            l.wakeup();
        }
    }

    pub fn wakeup(&self) {
        if let Some(l) = self.loop_ref.upgrade() {
            l.wakeup();
        }
    }

    // Id 0 is never allocated; the handle is permanently inert.
    fn inert<T>(&self, make: impl FnOnce(u64, Weak<Inner>) -> T) -> T {
        trace!("event registration on a dropped mainloop");
        make(0, self.loop_ref.clone())
    }
}

impl Inner {
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn io_new(self: &Rc<Self>, fd: RawFd, interest: IoEventFlags, cb: IoEventCb) -> IoEvent {
        let id = self.alloc_id();
        self.ios.borrow_mut().insert(
            id,
            IoSlot {
                fd,
                interest,
                dead: false,
                cb: Some(cb),
            },
        );
        trace!(id, fd, ?interest, "io watch registered");
        IoEvent {
            id,
            loop_ref: Rc::downgrade(self),
        }
    }

    fn time_new(self: &Rc<Self>, deadline: Instant, cb: TimeEventCb) -> TimeEvent {
        let id = self.alloc_id();
        self.times.borrow_mut().insert(
            id,
            TimeSlot {
                deadline: Some(deadline),
                dead: false,
                cb: Some(cb),
            },
        );
        TimeEvent {
            id,
            loop_ref: Rc::downgrade(self),
        }
    }

    fn defer_new(self: &Rc<Self>, cb: DeferEventCb) -> DeferEvent {
        let id = self.alloc_id();
        self.defers.borrow_mut().insert(
            id,
            DeferSlot {
                enabled: true,
                dead: false,
                cb: Some(cb),
            },
        );
        DeferEvent {
            id,
            loop_ref: Rc::downgrade(self),
        }
    }

    pub(crate) fn io_enable(&self, id: u64, interest: IoEventFlags) {
        if let Some(slot) = self.ios.borrow_mut().get_mut(&id) {
            slot.interest = interest;
        }
    }

    pub(crate) fn io_free(&self, id: u64) {
        if let Some(slot) = self.ios.borrow_mut().get_mut(&id) {
            slot.dead = true;
        }
    }

    pub(crate) fn time_restart(&self, id: u64, deadline: Instant) {
        if let Some(slot) = self.times.borrow_mut().get_mut(&id) {
            slot.deadline = Some(deadline);
        }
    }

    pub(crate) fn time_disable(&self, id: u64) {
        if let Some(slot) = self.times.borrow_mut().get_mut(&id) {
            slot.deadline = None;
        }
    }

    pub(crate) fn time_free(&self, id: u64) {
        if let Some(slot) = self.times.borrow_mut().get_mut(&id) {
            slot.dead = true;
        }
    }

    pub(crate) fn defer_enable(&self, id: u64, on: bool) {
        if let Some(slot) = self.defers.borrow_mut().get_mut(&id) {
            slot.enabled = on;
        }
    }

    pub(crate) fn defer_free(&self, id: u64) {
        if let Some(slot) = self.defers.borrow_mut().get_mut(&id) {
            slot.dead = true;
        }
    }

    fn wakeup(&self) {
        let buf = [1u8; 1];
        // EAGAIN just means the pipe already holds a pending wakeup.
        unsafe { libc::write(self.wake_w, buf.as_ptr() as *const libc::c_void, 1) };
    }

    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.wake_r, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }

    fn prepare(&self, timeout: Option<Duration>) -> Result<Step> {
        if let Some(retval) = self.quit_ret.get() {
            return Ok(Step::Quit(retval));
        }

        let mut fds = self.pollfds.borrow_mut();
        let mut ids = self.pollfd_ids.borrow_mut();
        fds.clear();
        ids.clear();
        fds.push(PollFd::new(self.wake_r, IoEventFlags::INPUT));
        ids.push(None);
        for (id, slot) in self.ios.borrow().iter() {
            if !slot.dead && !slot.interest.is_empty() {
                fds.push(PollFd::new(slot.fd, slot.interest));
                ids.push(Some(*id));
            }
        }

        let mut effective = timeout;
        if self
            .defers
            .borrow()
            .values()
            .any(|s| s.enabled && !s.dead)
        {
            // Pending defer work must not be delayed by a blocking poll.
            effective = Some(Duration::ZERO);
        } else if let Some(next) = self.next_deadline() {
            let remaining = next.saturating_duration_since(Instant::now());
            effective = Some(match effective {
                Some(t) => t.min(remaining),
                None => remaining,
            });
        }
        self.poll_timeout.set(effective);
        self.phase.set(Phase::Prepared);
        Ok(Step::Continue)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.times
            .borrow()
            .values()
            .filter(|s| !s.dead)
            .filter_map(|s| s.deadline)
            .min()
    }

    fn poll(&self) -> Result<usize> {
        if self.phase.get() != Phase::Prepared {
            return Err(MainloopError::OutOfOrder("poll without prepare"));
        }
        let timeout = self.poll_timeout.get();
        let mut fds = self.pollfds.borrow_mut();
        let n = match &mut *self.poll_func.borrow_mut() {
            Some(f) => f(&mut fds, timeout)?,
            None => native_poll(&mut fds, timeout)?,
        };
        trace!(ready = n, ?timeout, "poll returned");
        self.phase.set(Phase::Polled);
        Ok(n)
    }

    fn dispatch(self: &Rc<Self>) -> Result<usize> {
        if self.phase.get() != Phase::Polled {
            return Err(MainloopError::OutOfOrder("dispatch without poll"));
        }
        self.phase.set(Phase::Idle);
        if self.quit_ret.get().is_some() {
            return Ok(0);
        }

        let mut dispatched = self.dispatch_defers();
        if self.quit_ret.get().is_none() {
            dispatched += self.dispatch_ios();
        }
        if self.quit_ret.get().is_none() {
            dispatched += self.dispatch_times();
        }
        self.reap();
        Ok(dispatched)
    }

    fn dispatch_defers(self: &Rc<Self>) -> usize {
        let ids: Vec<u64> = self
            .defers
            .borrow()
            .iter()
            .filter(|(_, s)| s.enabled && !s.dead)
            .map(|(id, _)| *id)
            .collect();
        let mut n = 0;
        for id in ids {
            // Take the callback out of the slot so it may enable/free its
            // own registration without aliasing the borrow.
            let cb = {
                let mut defers = self.defers.borrow_mut();
                match defers.get_mut(&id) {
                    Some(s) if s.enabled && !s.dead => s.cb.take(),
                    _ => None,
                }
            };
            if let Some(mut cb) = cb {
                let handle = DeferEvent {
                    id,
                    loop_ref: Rc::downgrade(self),
                };
                cb(&handle);
                n += 1;
                let mut defers = self.defers.borrow_mut();
                if let Some(s) = defers.get_mut(&id) {
                    if !s.dead {
                        s.cb = Some(cb);
                    }
                }
            }
            if self.quit_ret.get().is_some() {
                break;
            }
        }
        n
    }

    fn dispatch_ios(self: &Rc<Self>) -> usize {
        let ready: Vec<(Option<u64>, IoEventFlags)> = {
            let fds = self.pollfds.borrow();
            let ids = self.pollfd_ids.borrow();
            fds.iter()
                .zip(ids.iter())
                .filter(|(pfd, _)| !pfd.ready().is_empty())
                .map(|(pfd, id)| (*id, pfd.ready()))
                .collect()
        };
        let mut n = 0;
        for (id, revents) in ready {
            let id = match id {
                None => {
                    self.drain_wake_pipe();
                    continue;
                }
                Some(id) => id,
            };
            let taken = {
                let mut ios = self.ios.borrow_mut();
                match ios.get_mut(&id) {
                    Some(s) if !s.dead => s.cb.take().map(|cb| (cb, s.fd)),
                    _ => None,
                }
            };
            if let Some((mut cb, fd)) = taken {
                let handle = IoEvent {
                    id,
                    loop_ref: Rc::downgrade(self),
                };
                cb(&handle, fd, revents);
                n += 1;
                let mut ios = self.ios.borrow_mut();
                if let Some(s) = ios.get_mut(&id) {
                    if !s.dead {
                        s.cb = Some(cb);
                    }
                }
            }
            if self.quit_ret.get().is_some() {
                break;
            }
        }
        n
    }

    fn dispatch_times(self: &Rc<Self>) -> usize {
        let now = Instant::now();
        let ids: Vec<u64> = self
            .times
            .borrow()
            .iter()
            .filter(|(_, s)| !s.dead && s.deadline.map_or(false, |d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        let mut n = 0;
        for id in ids {
            let cb = {
                let mut times = self.times.borrow_mut();
                match times.get_mut(&id) {
                    Some(s) if !s.dead => {
                        // One-shot: disarm before delivery, restart re-arms.
                        s.deadline = None;
                        s.cb.take()
                    }
                    _ => None,
                }
            };
            if let Some(mut cb) = cb {
                let handle = TimeEvent {
                    id,
                    loop_ref: Rc::downgrade(self),
                };
                cb(&handle);
                n += 1;
                let mut times = self.times.borrow_mut();
                if let Some(s) = times.get_mut(&id) {
                    if !s.dead {
                        s.cb = Some(cb);
                    }
                }
            }
            if self.quit_ret.get().is_some() {
                break;
            }
        }
        n
    }

    fn reap(&self) {
        self.ios.borrow_mut().retain(|_, s| !s.dead);
        self.times.borrow_mut().retain(|_, s| !s.dead);
        self.defers.borrow_mut().retain(|_, s| !s.dead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_defer_runs_without_blocking() {
        let ml = Mainloop::new().unwrap();
        let hits = Rc::new(Cell::new(0u32));
        let hits2 = Rc::clone(&hits);
        let ev = ml.defer_new(Box::new(move |_| hits2.set(hits2.get() + 1)));
        assert!(matches!(
            ml.iterate(false).unwrap(),
            IterateResult::Success(1)
        ));
        assert_eq!(hits.get(), 1);

        ev.enable(false);
        assert!(matches!(
            ml.iterate(false).unwrap(),
            IterateResult::Success(0)
        ));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_defer_can_free_itself() {
        let ml = Mainloop::new().unwrap();
        let hits = Rc::new(Cell::new(0u32));
        let hits2 = Rc::clone(&hits);
        let _ev = ml.defer_new(Box::new(move |me| {
            hits2.set(hits2.get() + 1);
            me.free();
        }));
        ml.iterate(false).unwrap();
        ml.iterate(false).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_time_event_fires_and_restarts() {
        let ml = Mainloop::new().unwrap();
        let hits = Rc::new(Cell::new(0u32));
        let hits2 = Rc::clone(&hits);
        let _ev = ml.time_new(
            Instant::now() + Duration::from_millis(5),
            Box::new(move |me| {
                hits2.set(hits2.get() + 1);
                if hits2.get() < 2 {
                    me.restart(Instant::now() + Duration::from_millis(5));
                }
            }),
        );
        let start = Instant::now();
        while hits.get() < 2 && start.elapsed() < Duration::from_secs(2) {
            ml.iterate(true).unwrap();
        }
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_quit_from_callback_stops_run() {
        let ml = Mainloop::new().unwrap();
        let api = ml.api();
        let _ev = ml.defer_new(Box::new(move |_| api.quit(7)));
        assert_eq!(ml.run().unwrap(), 7);
        // Sticky: the next cycle still reports the quit.
        assert!(matches!(ml.iterate(false).unwrap(), IterateResult::Quit(7)));
    }

    #[test]
    fn test_custom_poll_backend_is_used() {
        let ml = Mainloop::new().unwrap();
        let calls = Rc::new(Cell::new(0u32));
        let calls2 = Rc::clone(&calls);
        ml.set_poll_func(move |fds, _timeout| {
            calls2.set(calls2.get() + 1);
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
            }
            Ok(0)
        });
        ml.iterate(false).unwrap();
        ml.iterate(false).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_io_watch_delivery_and_self_free() {
        let mut pipe = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(pipe.as_mut_ptr()) }, 0);
        let ml = Mainloop::new().unwrap();
        let hits = Rc::new(Cell::new(0u32));
        let hits2 = Rc::clone(&hits);
        let _ev = ml.io_new(
            pipe[0],
            IoEventFlags::INPUT,
            Box::new(move |me, fd, flags| {
                assert!(flags.contains(IoEventFlags::INPUT));
                let mut buf = [0u8; 8];
                unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                hits2.set(hits2.get() + 1);
                me.free();
            }),
        );
        let byte = [0u8; 1];
        unsafe { libc::write(pipe[1], byte.as_ptr() as *const libc::c_void, 1) };
        ml.iterate(true).unwrap();
        assert_eq!(hits.get(), 1);

        // Freed from its own callback: further writes dispatch nothing.
        unsafe { libc::write(pipe[1], byte.as_ptr() as *const libc::c_void, 1) };
        assert!(matches!(
            ml.iterate(false).unwrap(),
            IterateResult::Success(0)
        ));
        unsafe {
            libc::close(pipe[0]);
            libc::close(pipe[1]);
        }
    }

    #[test]
    fn test_wakeup_interrupts_blocking_poll() {
        let ml = Mainloop::new().unwrap();
        ml.wakeup();
        let start = Instant::now();
        ml.iterate(true).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_step_order_enforced() {
        let ml = Mainloop::new().unwrap();
        assert!(matches!(ml.poll(), Err(MainloopError::OutOfOrder(_))));
        let _ = ml.prepare(Some(Duration::ZERO)).unwrap();
        assert!(matches!(ml.dispatch(), Err(MainloopError::OutOfOrder(_))));
    }

    #[test]
    fn test_prepare_reports_quit() {
        let ml = Mainloop::new().unwrap();
        ml.quit(3);
        assert_eq!(ml.prepare(None).unwrap(), Step::Quit(3));
    }
}
