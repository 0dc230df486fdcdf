//! Blocking-wait integration.
//!
//! The single-completion wait is the only place the engine sleeps in the
//! kernel. A cooperative host runtime that multiplexes other work on the
//! calling thread can install a [`WaitGuard`] to release its scheduler
//! lock for the duration of the sleep and take it back on wake.

use std::io;

use crate::cqueue;
use crate::sys;
use crate::uring::Uring;

/// Hooks bracketing the blocking `io_uring_enter` call.
///
/// `enter_blocking_region` runs immediately before the thread may sleep in
/// the kernel and `exit_blocking_region` immediately after it wakes,
/// whether the wait produced a completion or was interrupted. The default
/// implementations do nothing, which is correct for a plain thread.
pub trait WaitGuard {
    fn enter_blocking_region(&mut self) {}
    fn exit_blocking_region(&mut self) {}
}

/// Wait directly on the calling thread.
#[derive(Debug, Default)]
pub struct DirectWait;

impl WaitGuard for DirectWait {}

/// Block until one completion is available and consume it from the queue.
///
/// An already-visible completion is returned without entering the kernel.
/// `EINTR`/`EAGAIN` from an interrupted wait are surfaced to the caller
/// with nothing consumed, so the wait can simply be retried.
pub(crate) fn wait_for_cqe(
    uring: &mut Uring,
    guard: &mut dyn WaitGuard,
) -> io::Result<cqueue::Entry> {
    loop {
        if let Some(entry) = uring.completion_mut().pop() {
            return Ok(entry);
        }

        guard.enter_blocking_region();
        let res = unsafe { uring.submitter().enter(0, 1, sys::IORING_ENTER_GETEVENTS) };
        guard.exit_blocking_region();
        res?;
    }
}
