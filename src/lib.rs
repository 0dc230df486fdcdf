//! A high-level asynchronous I/O engine on top of Linux io_uring.
//!
//! The engine lets a caller prepare batches of I/O operations (accept,
//! close, read, write, timeout, nop, cancel), submit them to the kernel,
//! and consume completions one at a time, in drains, or in an indefinite
//! loop. Completions are routed back to per-operation callbacks or yielded
//! to a caller-supplied consumer along with the original descriptor.
//!
//! ```no_run
//! use iou::{OpSpec, Ring};
//!
//! # fn main() -> iou::Result<()> {
//! let mut ring = Ring::new()?;
//! ring.prep_timeout(OpSpec::new().interval(0.05).block(|spec| {
//!     println!("timer fired: {:?}", spec.result);
//! }))?;
//! ring.process_completions(true)?;
//! # Ok(())
//! # }
//! ```
//!
//! Requires Linux with io_uring; multishot reads via buffer rings need
//! kernel 6.7 or later.

mod buf_ring;
mod submit;
mod sys;
mod uring;
mod util;

pub mod cqueue;
pub mod error;
pub mod op;
pub mod opcode;
pub mod ring;
pub mod squeue;
pub mod types;
pub mod wait;

pub use error::{Error, Result};
pub use op::{Buffer, OpContext, OpKind, OpSpec, PendingOps, Signal};
pub use ring::{CancelTarget, Ring};
pub use types::Timespec;
pub use wait::{DirectWait, WaitGuard};

pub use buf_ring::MAX_BUFFER_RINGS;
