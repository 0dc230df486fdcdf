//! Kernel entry points: `io_uring_enter(2)` and `io_uring_register(2)`.

use std::os::unix::io::AsRawFd;
use std::sync::atomic;
use std::{io, ptr};

use crate::sys;
use crate::util::{cast_ptr, cvt, unsync_load, OwnedFd};

/// Interface for submitting queued submission entries to the kernel and for
/// registering resources (buffer rings) with the instance.
pub(crate) struct Submitter<'a> {
    fd: &'a OwnedFd,

    sq_head: *const atomic::AtomicU32,
    sq_tail: *const atomic::AtomicU32,
    sq_flags: *const atomic::AtomicU32,
}

impl<'a> Submitter<'a> {
    pub(crate) const fn new(
        fd: &'a OwnedFd,
        sq_head: *const atomic::AtomicU32,
        sq_tail: *const atomic::AtomicU32,
        sq_flags: *const atomic::AtomicU32,
    ) -> Submitter<'a> {
        Submitter {
            fd,
            sq_head,
            sq_tail,
            sq_flags,
        }
    }

    #[inline]
    fn sq_len(&self) -> usize {
        unsafe {
            let head = (*self.sq_head).load(atomic::Ordering::Acquire);
            let tail = unsync_load(self.sq_tail);
            tail.wrapping_sub(head) as usize
        }
    }

    /// CQ ring is overflown.
    fn sq_cq_overflow(&self) -> bool {
        unsafe {
            (*self.sq_flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_CQ_OVERFLOW != 0
        }
    }

    /// Initiate and/or complete asynchronous I/O. This is a low-level
    /// wrapper around `io_uring_enter` - see `man io_uring_enter` for more
    /// details.
    ///
    /// # Safety
    ///
    /// This provides a raw interface so developer must ensure that
    /// parameters are correct.
    pub unsafe fn enter(
        &self,
        to_submit: u32,
        min_complete: u32,
        flag: u32,
    ) -> io::Result<usize> {
        let ret = sys::io_uring_enter(
            self.fd.as_raw_fd(),
            to_submit,
            min_complete,
            flag,
            ptr::null(),
        );
        cvt(ret).map(|n| n as usize)
    }

    /// Submit all queued submission queue events to the kernel.
    #[inline]
    pub fn submit(&self) -> io::Result<usize> {
        self.submit_and_wait(0)
    }

    /// Submit all queued submission queue events to the kernel and wait for
    /// at least `want` completion events to arrive.
    pub fn submit_and_wait(&self, want: usize) -> io::Result<usize> {
        let len = self.sq_len();
        let mut flags = 0;

        if want > 0 || self.sq_cq_overflow() {
            flags |= sys::IORING_ENTER_GETEVENTS;
        }

        unsafe { self.enter(len as _, want as _, flags) }
    }

    /// Flush kernel-side overflowed completions into the queue.
    pub fn getevents(&self) -> io::Result<()> {
        unsafe { self.enter(0, 0, sys::IORING_ENTER_GETEVENTS).map(drop) }
    }

    /// Register a buffer ring for provided buffers under `bgid`.
    ///
    /// Available since 5.19.
    ///
    /// # Safety
    ///
    /// Developers must ensure that `ring_addr` and its length represented
    /// by `ring_entries` are valid and will be valid until the bgid is
    /// unregistered or the ring destroyed, otherwise undefined behaviour
    /// may occur.
    pub unsafe fn register_buf_ring(
        &self,
        ring_addr: u64,
        ring_entries: u16,
        bgid: u16,
    ) -> io::Result<()> {
        let arg = sys::io_uring_buf_reg {
            ring_addr,
            ring_entries: ring_entries as _,
            bgid,
            ..Default::default()
        };
        self.execute(
            sys::IORING_REGISTER_PBUF_RING,
            cast_ptr::<sys::io_uring_buf_reg>(&arg).cast(),
            1,
        )
        .map(drop)
    }

    /// Unregister a previously registered buffer ring.
    pub fn unregister_buf_ring(&self, bgid: u16) -> io::Result<()> {
        let arg = sys::io_uring_buf_reg {
            ring_addr: 0,
            ring_entries: 0,
            bgid,
            ..Default::default()
        };
        self.execute(
            sys::IORING_UNREGISTER_PBUF_RING,
            cast_ptr::<sys::io_uring_buf_reg>(&arg).cast(),
            1,
        )
        .map(drop)
    }

    fn execute(
        &self,
        opcode: libc::c_uint,
        arg: *const libc::c_void,
        len: libc::c_uint,
    ) -> io::Result<u32> {
        let ret = unsafe { sys::io_uring_register(self.fd.as_raw_fd(), opcode, arg, len) };
        cvt(ret).map(|n| n as u32)
    }
}
