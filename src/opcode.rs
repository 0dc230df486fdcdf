//! Operation code builders.
//!
//! Each builder fills one submission queue entry; required parameters go
//! through `new`, optional ones through chained setters.

#![allow(clippy::new_without_default)]

use std::os::unix::io::RawFd;

use crate::squeue::Entry;
use crate::sys;
use crate::types::{Timespec, TimeoutFlags};

macro_rules! opcode {
    (
        $( #[$outer:meta] )*
        pub struct $name:ident {
            $( #[$new_meta:meta] )*
            $( $field:ident : $tname:ty ),* $(,)?
            ;;
            $(
                $( #[$opt_meta:meta] )*
                $opt_field:ident : $opt_tname:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $( #[$outer] )*
        pub struct $name {
            $( $field : $tname, )*
            $( $opt_field : $opt_tname, )*
        }

        impl $name {
            $( #[$new_meta] )*
            pub const fn new( $( $field : $tname ),* ) -> Self {
                $name {
                    $( $field , )*
                    $( $opt_field: $default, )*
                }
            }

            $(
                $( #[$opt_meta] )*
                pub const fn $opt_field(mut self, $opt_field: $opt_tname) -> Self {
                    self.$opt_field = $opt_field;
                    self
                }
            )*
        }
    }
}

#[inline]
fn sqe_zeroed() -> sys::io_uring_sqe {
    unsafe { std::mem::zeroed() }
}

opcode!(
    /// Do not perform any I/O.
    ///
    /// A nop still round-trips through the kernel and produces a completion,
    /// which makes it useful for injecting synthetic events.
    #[derive(Debug)]
    pub struct Nop { ;; }
);

opcode!(
    /// Accept a connection on a listening socket, equivalent to `accept4(2)`.
    #[derive(Debug)]
    pub struct Accept {
        fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        ;;
        flags: i32 = 0
    }
);

opcode!(
    /// Accept connections repeatedly from a single submission until
    /// cancelled or the socket fails.
    ///
    /// Available since 5.19.
    #[derive(Debug)]
    pub struct AcceptMulti {
        fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        ;;
        flags: i32 = 0
    }
);

opcode!(
    /// Close a file descriptor, equivalent to `close(2)`.
    #[derive(Debug)]
    pub struct Close {
        fd: RawFd,
        ;;
    }
);

opcode!(
    /// Read into a plain buffer, equivalent to `read(2)` when `offset` is
    /// left at the current file position.
    #[derive(Debug)]
    pub struct Read {
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        ;;
        offset: i64 = -1
    }
);

opcode!(
    /// Read repeatedly from a single submission, filling kernel-selected
    /// buffers from the registered buffer group.
    ///
    /// Available since 6.7.
    #[derive(Debug)]
    pub struct ReadMulti {
        fd: RawFd,
        buf_group: u16,
        ;;
    }
);

opcode!(
    /// Write from a plain buffer, equivalent to `write(2)` when `offset` is
    /// left at the current file position.
    #[derive(Debug)]
    pub struct Write {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        ;;
        offset: i64 = -1
    }
);

opcode!(
    /// Register a timeout operation.
    ///
    /// The request completes with `-ETIME` when the timer expires, or
    /// `-ECANCELED` if it is cancelled first. With
    /// [`TimeoutFlags::MULTISHOT`] the timer re-arms after every
    /// expiration.
    #[derive(Debug)]
    pub struct Timeout {
        timespec: *const Timespec,
        ;;
        /// `count` may contain a completion event count.
        count: u32 = 0,
        flags: TimeoutFlags = TimeoutFlags::empty()
    }
);

opcode!(
    /// Cancel an in-flight operation by its `user_data` value.
    ///
    /// The cancellation produces its own completion, and the target (if
    /// found) completes with `-ECANCELED`.
    #[derive(Debug)]
    pub struct AsyncCancel {
        user_data: u64,
        ;;
    }
);

impl Nop {
    pub fn build(self) -> Entry {
        let Nop {} = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_NOP;
        Entry(sqe)
    }
}

impl Accept {
    pub fn build(self) -> Entry {
        let Accept {
            fd,
            addr,
            addrlen,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_ACCEPT;
        sqe.fd = fd;
        sqe.addr = addr as _;
        sqe.off = addrlen as _;
        sqe.op_flags = flags as _;
        Entry(sqe)
    }
}

impl AcceptMulti {
    pub fn build(self) -> Entry {
        let AcceptMulti {
            fd,
            addr,
            addrlen,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_ACCEPT;
        sqe.fd = fd;
        sqe.ioprio = sys::IORING_ACCEPT_MULTISHOT;
        sqe.addr = addr as _;
        sqe.off = addrlen as _;
        sqe.op_flags = flags as _;
        Entry(sqe)
    }
}

impl Close {
    pub fn build(self) -> Entry {
        let Close { fd } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_CLOSE;
        sqe.fd = fd;
        Entry(sqe)
    }
}

impl Read {
    pub fn build(self) -> Entry {
        let Read {
            fd,
            buf,
            len,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_READ;
        sqe.fd = fd;
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        Entry(sqe)
    }
}

impl ReadMulti {
    pub fn build(self) -> Entry {
        let ReadMulti { fd, buf_group } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_READ_MULTISHOT;
        sqe.fd = fd;
        sqe.off = -1i64 as _;
        sqe.buf_index = buf_group;
        sqe.flags = sys::IOSQE_BUFFER_SELECT;
        Entry(sqe)
    }
}

impl Write {
    pub fn build(self) -> Entry {
        let Write {
            fd,
            buf,
            len,
            offset,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_WRITE;
        sqe.fd = fd;
        sqe.addr = buf as _;
        sqe.len = len;
        sqe.off = offset as _;
        Entry(sqe)
    }
}

impl Timeout {
    pub fn build(self) -> Entry {
        let Timeout {
            timespec,
            count,
            flags,
        } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_TIMEOUT;
        sqe.addr = timespec as _;
        sqe.len = 1;
        sqe.off = count as _;
        sqe.op_flags = flags.bits();
        Entry(sqe)
    }
}

impl AsyncCancel {
    pub fn build(self) -> Entry {
        let AsyncCancel { user_data } = self;

        let mut sqe = sqe_zeroed();
        sqe.opcode = sys::IORING_OP_ASYNC_CANCEL;
        sqe.addr = user_data;
        Entry(sqe)
    }
}
