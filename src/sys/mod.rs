#![allow(non_camel_case_types, non_upper_case_globals, dead_code)]
#![allow(clippy::unreadable_literal, clippy::missing_safety_doc)]

use core::mem;
use libc::*;

include!("sys.rs");

// All wrappers follow the raw-syscall convention and return `-errno` on
// failure, regardless of backend.

#[cfg(not(feature = "direct-syscall"))]
unsafe fn to_result(ret: c_long) -> c_int {
    if ret < 0 {
        -*__errno_location()
    } else {
        ret as c_int
    }
}

#[cfg(not(feature = "direct-syscall"))]
pub unsafe fn io_uring_setup(entries: c_uint, p: *mut io_uring_params) -> c_int {
    to_result(syscall(
        libc::SYS_io_uring_setup,
        entries as c_long,
        p as c_long,
    ))
}

#[cfg(feature = "direct-syscall")]
pub unsafe fn io_uring_setup(entries: c_uint, p: *mut io_uring_params) -> c_int {
    sc::syscall2(
        libc::SYS_io_uring_setup as usize,
        entries as usize,
        p as usize,
    ) as _
}

#[cfg(not(feature = "direct-syscall"))]
pub unsafe fn io_uring_enter(
    fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
    sig: *const sigset_t,
) -> c_int {
    to_result(syscall(
        libc::SYS_io_uring_enter,
        fd as c_long,
        to_submit as c_long,
        min_complete as c_long,
        flags as c_long,
        sig as c_long,
        mem::size_of::<sigset_t>() as c_long,
    ))
}

#[cfg(feature = "direct-syscall")]
pub unsafe fn io_uring_enter(
    fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
    sig: *const sigset_t,
) -> c_int {
    sc::syscall6(
        libc::SYS_io_uring_enter as usize,
        fd as usize,
        to_submit as usize,
        min_complete as usize,
        flags as usize,
        sig as usize,
        mem::size_of::<sigset_t>(),
    ) as _
}

#[cfg(not(feature = "direct-syscall"))]
pub unsafe fn io_uring_register(
    fd: c_int,
    opcode: c_uint,
    arg: *const c_void,
    nr_args: c_uint,
) -> c_int {
    to_result(syscall(
        libc::SYS_io_uring_register,
        fd as c_long,
        opcode as c_long,
        arg as c_long,
        nr_args as c_long,
    ))
}

#[cfg(feature = "direct-syscall")]
pub unsafe fn io_uring_register(
    fd: c_int,
    opcode: c_uint,
    arg: *const c_void,
    nr_args: c_uint,
) -> c_int {
    sc::syscall4(
        libc::SYS_io_uring_register as usize,
        fd as usize,
        opcode as usize,
        arg as usize,
        nr_args as usize,
    ) as _
}
