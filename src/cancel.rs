//! Cooperative cancellation primitives.
//!
//! Cancellation in mzflow is cooperative, never preemptive: any observer may
//! request it at any time, and the running work function is expected to poll
//! [`CancellationToken::is_canceled`] at safe points and unwind. A work loop
//! that never polls runs to completion even after a request — that is the
//! intended trade-off for CPU-bound numeric work.
//!
//! To keep the polling discipline uniform across modules, loops should go
//! through [`CancellationToken::checked`], which wraps any iterator and polls
//! the token every `stride` items instead of every module reinventing ad-hoc
//! checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker returned when a cancellation request was observed.
///
/// Converts into [`WorkError::Canceled`](crate::task::WorkError::Canceled),
/// so work functions can propagate it with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

/// Shared cancellation flag for one task.
///
/// Cloning the token clones a handle to the same flag. `request_cancel` is
/// idempotent and callable from any thread; `is_canceled` is a cheap relaxed
/// read safe inside tight loops. The token itself never blocks and never
/// fails.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cooperative cancellation. Idempotent; repeated calls are
    /// indistinguishable from a single call.
    pub fn request_cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Non-blocking check, usable from inside tight loops.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Canceled)` if cancellation has been requested.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Wrap an iterator so that the token is polled every `stride` items.
    ///
    /// Yields `Ok(item)` until a poll observes cancellation, then yields a
    /// single `Err(Canceled)` and fuses. A `stride` of 0 is treated as 1.
    ///
    /// ```
    /// use mzflow::cancel::CancellationToken;
    ///
    /// let token = CancellationToken::new();
    /// let sum: Result<u64, _> = token
    ///     .checked(1..=100u64, 16)
    ///     .try_fold(0u64, |acc, item| item.map(|v| acc + v));
    /// assert_eq!(sum, Ok(5050));
    /// ```
    pub fn checked<I>(&self, iter: I, stride: usize) -> Checked<I::IntoIter>
    where
        I: IntoIterator,
    {
        Checked {
            token: self.clone(),
            inner: iter.into_iter(),
            stride: stride.max(1),
            since_check: 0,
            done: false,
        }
    }
}

/// Cancellation-aware iterator adapter returned by
/// [`CancellationToken::checked`].
pub struct Checked<I> {
    token: CancellationToken,
    inner: I,
    stride: usize,
    since_check: usize,
    done: bool,
}

impl<I: Iterator> Iterator for Checked<I> {
    type Item = Result<I::Item, Canceled>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.since_check == 0 && self.token.is_canceled() {
            self.done = true;
            return Some(Err(Canceled));
        }
        self.since_check = (self.since_check + 1) % self.stride;
        match self.inner.next() {
            Some(item) => Some(Ok(item)),
            None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        token.request_cancel();
        token.request_cancel();
        token.request_cancel();
        assert!(token.is_canceled());
        assert_eq!(token.check(), Err(Canceled));
    }

    #[test]
    fn test_clone_shares_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        observer.request_cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn test_checked_runs_to_completion_when_not_canceled() {
        let token = CancellationToken::new();
        let items: Result<Vec<_>, _> = token.checked(0..10, 3).collect();
        assert_eq!(items.expect("no cancellation"), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_checked_stops_at_next_poll() {
        let token = CancellationToken::new();
        let mut iter = token.checked(0..100, 4);
        // First poll happens before item 0; not canceled yet.
        assert_eq!(iter.next(), Some(Ok(0)));
        assert_eq!(iter.next(), Some(Ok(1)));
        token.request_cancel();
        // Items 2 and 3 are still inside the current stride window.
        assert_eq!(iter.next(), Some(Ok(2)));
        assert_eq!(iter.next(), Some(Ok(3)));
        // Next poll observes the request.
        assert_eq!(iter.next(), Some(Err(Canceled)));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_checked_zero_stride_polls_every_item() {
        let token = CancellationToken::new();
        token.request_cancel();
        let mut iter = token.checked(0..10, 0);
        assert_eq!(iter.next(), Some(Err(Canceled)));
        assert_eq!(iter.next(), None);
    }
}
