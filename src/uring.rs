//! Raw io_uring instance: setup syscall, queue memory maps, teardown.

use std::convert::TryInto;
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic;
use std::{cmp, io, mem};

use crate::cqueue::CompletionQueue;
use crate::squeue::SubmissionQueue;
use crate::submit::Submitter;
use crate::sys;
use crate::types::SetupFlags;
use crate::util::{Mmap, OwnedFd};

/// A live kernel ring pair: submission and completion queues mapped into
/// this process, plus the owning descriptor.
///
/// Dropping the instance unmaps the queues and closes the ring descriptor,
/// the moral equivalent of `io_uring_queue_exit`.
pub(crate) struct Uring {
    fd: OwnedFd,
    memory: ManuallyDrop<MemoryMap>,
    sq: SubmissionQueue,
    cq: CompletionQueue,
    sq_head: *const atomic::AtomicU32,
    sq_tail: *const atomic::AtomicU32,
    sq_flags: *const atomic::AtomicU32,
}

#[allow(dead_code)]
struct MemoryMap {
    sq_mmap: Mmap,
    sqe_mmap: Mmap,
    cq_mmap: Option<Mmap>,
}

impl Uring {
    /// Create an instance with `entries` submission slots.
    ///
    /// `entries` should be a power of two; the kernel rounds up otherwise.
    pub(crate) fn with_flags(entries: u32, flags: SetupFlags) -> io::Result<Uring> {
        let mut p = sys::io_uring_params {
            flags: flags.bits(),
            ..Default::default()
        };

        // NOTE: The `SubmissionQueue` and `CompletionQueue` hold pointers
        // into `MemoryMap`, so their lifetime can never exceed it.
        #[inline]
        unsafe fn setup_queue(
            fd: &OwnedFd,
            p: &sys::io_uring_params,
        ) -> io::Result<(MemoryMap, SubmissionQueue, CompletionQueue)> {
            let sq_len = p.sq_off.array as usize + p.sq_entries as usize * mem::size_of::<u32>();
            let cq_len = p.cq_off.cqes as usize
                + p.cq_entries as usize * mem::size_of::<sys::io_uring_cqe>();
            let sqe_len = p.sq_entries as usize * mem::size_of::<sys::io_uring_sqe>();
            let sqe_mmap = Mmap::new(fd, sys::IORING_OFF_SQES, sqe_len)?;

            if p.features & sys::IORING_FEAT_SINGLE_MMAP != 0 {
                let scq_mmap = Mmap::new(fd, sys::IORING_OFF_SQ_RING, cmp::max(sq_len, cq_len))?;

                let sq = SubmissionQueue::new(&scq_mmap, &sqe_mmap, p);
                let cq = CompletionQueue::new(&scq_mmap, p);
                let mm = MemoryMap {
                    sq_mmap: scq_mmap,
                    cq_mmap: None,
                    sqe_mmap,
                };

                Ok((mm, sq, cq))
            } else {
                let sq_mmap = Mmap::new(fd, sys::IORING_OFF_SQ_RING, sq_len)?;
                let cq_mmap = Mmap::new(fd, sys::IORING_OFF_CQ_RING, cq_len)?;

                let sq = SubmissionQueue::new(&sq_mmap, &sqe_mmap, p);
                let cq = CompletionQueue::new(&cq_mmap, p);
                let mm = MemoryMap {
                    cq_mmap: Some(cq_mmap),
                    sq_mmap,
                    sqe_mmap,
                };

                Ok((mm, sq, cq))
            }
        }

        let fd: OwnedFd = unsafe {
            sys::io_uring_setup(entries, &mut p)
                .try_into()
                .map_err(|ret: libc::c_int| io::Error::from_raw_os_error(-ret))?
        };

        let (mm, sq, cq) = unsafe { setup_queue(&fd, &p)? };

        let (sq_head, sq_tail, sq_flags) = unsafe {
            let sq_ptr = mm.sq_mmap.as_mut_ptr();
            (
                sq_ptr.add(p.sq_off.head as usize) as *const atomic::AtomicU32,
                sq_ptr.add(p.sq_off.tail as usize) as *const atomic::AtomicU32,
                sq_ptr.add(p.sq_off.flags as usize) as *const atomic::AtomicU32,
            )
        };

        Ok(Uring {
            fd,
            sq,
            cq,
            memory: ManuallyDrop::new(mm),
            sq_head,
            sq_tail,
            sq_flags,
        })
    }

    #[inline]
    pub(crate) fn submitter(&self) -> Submitter<'_> {
        Submitter::new(&self.fd, self.sq_head, self.sq_tail, self.sq_flags)
    }

    /// Get submission queue.
    #[inline]
    pub(crate) fn submission(&mut self) -> &mut SubmissionQueue {
        &mut self.sq
    }

    #[inline]
    pub(crate) fn sq_capacity(&self) -> usize {
        self.sq.capacity()
    }

    /// Whether the kernel holds overflowed completions that need a
    /// `GETEVENTS` enter to become visible.
    #[inline]
    pub(crate) fn cq_needs_flush(&self) -> bool {
        self.sq.cq_overflow()
    }

    /// Get completion queue.
    #[inline]
    pub(crate) fn completion(&self) -> &CompletionQueue {
        &self.cq
    }

    #[inline]
    pub(crate) fn completion_mut(&mut self) -> &mut CompletionQueue {
        &mut self.cq
    }
}

impl Drop for Uring {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.memory);
        }
    }
}

impl AsRawFd for Uring {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
