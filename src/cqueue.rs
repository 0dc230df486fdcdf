//! Completion queue.

use std::sync::atomic;

use crate::sys;
use crate::util::{unsync_load, Mmap};

/// An io_uring instance's completion queue. This stores all the I/O
/// operations that have completed.
pub struct CompletionQueue {
    head: *const atomic::AtomicU32,
    tail: *const atomic::AtomicU32,
    ring_mask: *const u32,
    ring_entries: *const u32,

    overflow: *const atomic::AtomicU32,

    cqes: *const sys::io_uring_cqe,
}

/// An entry in the completion queue, representing a complete I/O operation.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Entry(pub(crate) sys::io_uring_cqe);

impl CompletionQueue {
    #[rustfmt::skip]
    pub(crate) unsafe fn new(cq_mmap: &Mmap, p: &sys::io_uring_params) -> CompletionQueue {
        let head         = cq_mmap.offset(p.cq_off.head         ) as *const atomic::AtomicU32;
        let tail         = cq_mmap.offset(p.cq_off.tail         ) as *const atomic::AtomicU32;
        let ring_mask    = cq_mmap.offset(p.cq_off.ring_mask    ) as *const u32;
        let ring_entries = cq_mmap.offset(p.cq_off.ring_entries ) as *const u32;
        let overflow     = cq_mmap.offset(p.cq_off.overflow     ) as *const atomic::AtomicU32;
        let cqes         = cq_mmap.offset(p.cq_off.cqes         ) as *const sys::io_uring_cqe;

        CompletionQueue {
            head,
            tail,
            ring_mask,
            ring_entries,
            overflow,
            cqes,
        }
    }

    /// The number of completion events the kernel had to drop because the
    /// queue was full.
    pub fn overflow(&self) -> u32 {
        unsafe { (*self.overflow).load(atomic::Ordering::Acquire) }
    }

    /// Get the total number of entries in the completion queue ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.ring_entries.read() as usize }
    }

    /// Get the number of unread completion queue events in the ring buffer.
    #[inline]
    pub fn len(&self) -> usize {
        unsafe {
            let head = unsync_load(self.head);
            let tail = (*self.tail).load(atomic::Ordering::Acquire);
            tail.wrapping_sub(head) as usize
        }
    }

    /// Returns `true` if there are no completion queue events to be
    /// processed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the entry `offset` slots past the current head without
    /// consuming anything.
    ///
    /// Pair with [`advance`](Self::advance) once a batch has been handled.
    #[inline]
    pub fn peek(&self, offset: usize) -> Option<Entry> {
        if offset >= self.len() {
            return None;
        }
        unsafe {
            let head = unsync_load(self.head).wrapping_add(offset as u32);
            Some(Entry(*self.cqes.add((head & *self.ring_mask) as usize)))
        }
    }

    /// Mark `n` entries as seen, freeing their slots for the kernel.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        unsafe {
            let head = unsync_load(self.head);
            (*self.head).store(head.wrapping_add(n as u32), atomic::Ordering::Release);
        }
    }

    /// Consume and return the entry at the head, if any.
    #[inline]
    pub fn pop(&mut self) -> Option<Entry> {
        let entry = self.peek(0)?;
        self.advance(1);
        Some(entry)
    }
}

impl Entry {
    /// The operation-specific result code, equivalent to the return value
    /// of the matching system call.
    #[inline]
    pub fn result(&self) -> i32 {
        self.0.res
    }

    /// The user data of the request, as set on the submission queue entry.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.0.user_data
    }

    /// Metadata related to the operation: the `F_MORE`/`F_BUFFER` bits and,
    /// for buffer-ring completions, the selected buffer id in the upper
    /// half.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.0.flags
    }

    /// Whether the kernel has promised further completions for this
    /// submission.
    #[inline]
    pub fn more(&self) -> bool {
        self.0.flags & sys::IORING_CQE_F_MORE != 0
    }

    /// The buffer-ring buffer consumed by this completion, if any.
    #[inline]
    pub fn buffer_id(&self) -> Option<u16> {
        if self.0.flags & sys::IORING_CQE_F_BUFFER != 0 {
            Some((self.0.flags >> sys::IORING_CQE_BUFFER_SHIFT) as u16)
        } else {
            None
        }
    }
}
