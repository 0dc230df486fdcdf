//! Submission queue.

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic;

use crate::sys;
use crate::util::{unsync_load, Mmap};

/// An io_uring instance's submission queue. This is used to send I/O
/// requests to the kernel.
///
/// The queue is owned by a single submitter thread; only the kernel reads
/// from the far side, so the head is loaded with `Acquire` and the tail
/// published with `Release` on every push.
pub struct SubmissionQueue {
    head: *const atomic::AtomicU32,
    tail: *const atomic::AtomicU32,
    ring_mask: u32,
    ring_entries: u32,
    flags: *const atomic::AtomicU32,
    dropped: *const atomic::AtomicU32,

    sqes: *mut sys::io_uring_sqe,
}

/// A submission queue entry (SQE), representing a request for one I/O
/// operation.
///
/// These are created via the builders in [`opcode`](crate::opcode).
#[repr(transparent)]
#[derive(Clone)]
pub struct Entry(pub(crate) sys::io_uring_sqe);

/// An error pushing to the submission queue due to it being full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushError;

impl SubmissionQueue {
    #[rustfmt::skip]
    pub(crate) unsafe fn new(
        sq_mmap: &Mmap,
        sqe_mmap: &Mmap,
        p: &sys::io_uring_params,
    ) -> SubmissionQueue {
        let head         = sq_mmap.offset(p.sq_off.head        ) as *const atomic::AtomicU32;
        let tail         = sq_mmap.offset(p.sq_off.tail        ) as *const atomic::AtomicU32;
        let ring_mask    = sq_mmap.offset(p.sq_off.ring_mask   ).cast::<u32>().read();
        let ring_entries = sq_mmap.offset(p.sq_off.ring_entries).cast::<u32>().read();
        let flags        = sq_mmap.offset(p.sq_off.flags       ) as *const atomic::AtomicU32;
        let dropped      = sq_mmap.offset(p.sq_off.dropped     ) as *const atomic::AtomicU32;
        let array        = sq_mmap.offset(p.sq_off.array       ) as *mut u32;

        let sqes         = sqe_mmap.as_mut_ptr() as *mut sys::io_uring_sqe;

        // To keep it simple, map the index array directly to `sqes`.
        for i in 0..ring_entries {
            array.add(i as usize).write_volatile(i);
        }

        SubmissionQueue {
            head,
            tail,
            ring_mask,
            ring_entries,
            flags,
            dropped,
            sqes,
        }
    }

    /// Whether the completion queue has overflown on the kernel side.
    pub fn cq_overflow(&self) -> bool {
        unsafe {
            (*self.flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_CQ_OVERFLOW != 0
        }
    }

    /// The number of invalid submission queue entries the kernel has
    /// encountered in the ring buffer.
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.dropped).load(atomic::Ordering::Acquire) }
    }

    /// Get the total number of entries in the submission queue ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring_entries as usize
    }

    /// Get the number of submission queue events in the ring buffer.
    #[inline]
    pub fn len(&self) -> usize {
        unsafe {
            let head = (*self.head).load(atomic::Ordering::Acquire);
            let tail = unsync_load(self.tail);
            tail.wrapping_sub(head) as usize
        }
    }

    /// Returns `true` if the submission queue ring buffer has reached
    /// capacity, and no more events can be added before the kernel consumes
    /// some.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Attempts to push an entry into the queue and publish it to the
    /// kernel. If the queue is full, an error is returned.
    ///
    /// # Safety
    ///
    /// Developers must ensure that parameters of the entry (such as buffer)
    /// are valid and will be valid for the entire duration of the
    /// operation, otherwise it may cause memory problems.
    #[inline]
    pub unsafe fn push(&mut self, entry: Entry) -> Result<(), PushError> {
        if self.is_full() {
            return Err(PushError);
        }

        let tail = unsync_load(self.tail);
        *self.sqes.add((tail & self.ring_mask) as usize) = entry.0;
        (*self.tail).store(tail.wrapping_add(1), atomic::Ordering::Release);
        Ok(())
    }
}

impl Entry {
    /// Set the user data. This is an application-supplied value that will
    /// be passed straight through into the completion queue entry.
    #[inline]
    pub fn user_data(mut self, user_data: u64) -> Entry {
        self.0.user_data = user_data;
        self
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("op_code", &self.0.opcode)
            .field("flags", &self.0.flags)
            .field("user_data", &self.0.user_data)
            .finish()
    }
}

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("submission queue is full")
    }
}

impl Error for PushError {}
