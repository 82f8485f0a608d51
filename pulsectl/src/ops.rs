//! Correlation of submitted commands with their completions
//!
//! Every submitted command gets a monotonically increasing token and a
//! pending slot. The transport's reply handler fills the slot from loop
//! dispatch; the blocking caller pumps the loop until its own token is
//! finished. Losing the connection finishes every pending slot at once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::trace;

/// Terminal state of one tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
    Disconnected,
}

#[derive(Default)]
pub(crate) struct OperationTracker {
    next_token: Cell<u64>,
    pending: RefCell<HashMap<u64, Option<Outcome>>>,
}

impl OperationTracker {
    /// Allocate a token with an unfinished slot
    pub(crate) fn begin(&self) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.pending.borrow_mut().insert(token, None);
        token
    }

    /// Record the completion reported by the server. First writer wins;
    /// a slot already finished by a disconnect stays as it is.
    pub(crate) fn complete(&self, token: u64, success: bool) {
        if let Some(slot @ None) = self.pending.borrow_mut().get_mut(&token) {
            *slot = Some(if success {
                Outcome::Success
            } else {
                Outcome::Failure
            });
        }
    }

    /// Remove and return the outcome once the slot is finished
    pub(crate) fn take_finished(&self, token: u64) -> Option<Outcome> {
        let mut pending = self.pending.borrow_mut();
        match pending.get(&token) {
            Some(Some(_)) => pending.remove(&token).flatten(),
            _ => None,
        }
    }

    /// Drop a slot whose submission was rejected before tracking mattered
    pub(crate) fn abandon(&self, token: u64) {
        self.pending.borrow_mut().remove(&token);
    }

    /// Finish every unfinished slot with [`Outcome::Disconnected`]
    pub(crate) fn disconnect_all(&self) {
        let mut pending = self.pending.borrow_mut();
        let mut n = 0;
        for slot in pending.values_mut() {
            if slot.is_none() {
                *slot = Some(Outcome::Disconnected);
                n += 1;
            }
        }
        if n > 0 {
            trace!(failed = n, "pending operations finished by disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_increasing() {
        let ops = OperationTracker::default();
        let a = ops.begin();
        let b = ops.begin();
        assert!(b > a);
    }

    #[test]
    fn test_completion_is_observed_once() {
        let ops = OperationTracker::default();
        let token = ops.begin();
        assert_eq!(ops.take_finished(token), None);
        ops.complete(token, true);
        assert_eq!(ops.take_finished(token), Some(Outcome::Success));
        assert_eq!(ops.take_finished(token), None);
    }

    #[test]
    fn test_disconnect_finishes_pending_only() {
        let ops = OperationTracker::default();
        let done = ops.begin();
        let pending = ops.begin();
        ops.complete(done, false);
        ops.disconnect_all();
        assert_eq!(ops.take_finished(done), Some(Outcome::Failure));
        assert_eq!(ops.take_finished(pending), Some(Outcome::Disconnected));
    }

    #[test]
    fn test_late_completion_after_disconnect_is_ignored() {
        let ops = OperationTracker::default();
        let token = ops.begin();
        ops.disconnect_all();
        ops.complete(token, true);
        assert_eq!(ops.take_finished(token), Some(Outcome::Disconnected));
    }
}
