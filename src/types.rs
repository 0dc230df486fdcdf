//! Common types shared between the opcode builders and the ring façade.

use crate::sys;
use bitflags::bitflags;

bitflags! {
    /// `io_uring_setup(2)` flags the engine may request.
    pub struct SetupFlags: u32 {
        const SUBMIT_ALL = sys::IORING_SETUP_SUBMIT_ALL;
        const COOP_TASKRUN = sys::IORING_SETUP_COOP_TASKRUN;
    }
}

bitflags! {
    /// Options for [`Timeout`](crate::opcode::Timeout).
    pub struct TimeoutFlags: u32 {
        const ABS = sys::IORING_TIMEOUT_ABS;

        const MULTISHOT = sys::IORING_TIMEOUT_MULTISHOT;
    }
}

/// Kernel timespec carried by timeout operations.
#[derive(Default, Debug, Clone, Copy)]
#[repr(transparent)]
pub struct Timespec(pub(crate) sys::__kernel_timespec);

impl Timespec {
    #[inline]
    pub const fn new() -> Self {
        Timespec(sys::__kernel_timespec {
            tv_sec: 0,
            tv_nsec: 0,
        })
    }

    #[inline]
    pub const fn sec(mut self, sec: u64) -> Self {
        self.0.tv_sec = sec as _;
        self
    }

    #[inline]
    pub const fn nsec(mut self, nsec: u32) -> Self {
        self.0.tv_nsec = nsec as _;
        self
    }

    /// Convert a non-negative interval in fractional seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        let sec = secs.floor();
        let nsec = ((secs - sec) * 1_000_000_000.0).floor();
        Timespec(sys::__kernel_timespec {
            tv_sec: sec as i64,
            tv_nsec: nsec as i64,
        })
    }

    pub fn tv_sec(&self) -> i64 {
        self.0.tv_sec
    }

    pub fn tv_nsec(&self) -> i64 {
        self.0.tv_nsec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_from_secs_f64() {
        let ts = Timespec::from_secs_f64(0.0);
        assert_eq!((ts.tv_sec(), ts.tv_nsec()), (0, 0));

        let ts = Timespec::from_secs_f64(0.05);
        assert_eq!(ts.tv_sec(), 0);
        assert!((ts.tv_nsec() - 50_000_000).abs() <= 1);

        let ts = Timespec::from_secs_f64(2.5);
        assert_eq!(ts.tv_sec(), 2);
        assert!((ts.tv_nsec() - 500_000_000).abs() <= 1);

        let ts = Timespec::from_secs_f64(3.0);
        assert_eq!((ts.tv_sec(), ts.tv_nsec()), (3, 0));
    }

    #[test]
    fn test_timespec_builder() {
        let ts = Timespec::new().sec(1).nsec(250);
        assert_eq!((ts.tv_sec(), ts.tv_nsec()), (1, 250));
    }
}
