//! The ring façade: io_uring lifecycle, submission-queue pressure, and
//! completion demultiplexing.

use std::slice;

use crate::buf_ring::BufRingRegistry;
use crate::cqueue;
use crate::error::{Error, Result};
use crate::op::{Buffer, OpContext, OpKind, OpSpec, PendingOps, ReadMeta, Signal};
use crate::opcode;
use crate::squeue;
use crate::types::{SetupFlags, Timespec, TimeoutFlags};
use crate::uring::Uring;
use crate::wait::{self, DirectWait, WaitGuard};

// Kernel ring capacity requested at init; halved on ENOMEM down to the
// floor before giving up.
const RING_CAPACITY: u32 = 1024;
const RING_CAPACITY_FLOOR: u32 = 64;

/// Target of a [`prep_cancel`](Ring::prep_cancel) call: a submission id,
/// given either directly or through a descriptor that carries one.
pub enum CancelTarget {
    Id(u32),
}

impl From<u32> for CancelTarget {
    fn from(id: u32) -> CancelTarget {
        CancelTarget::Id(id)
    }
}

impl From<&OpSpec> for CancelTarget {
    fn from(spec: &OpSpec) -> CancelTarget {
        CancelTarget::Id(spec.id)
    }
}

/// Where processed completions are delivered: an inline consumer supplied
/// by the caller wins over the per-operation callback.
enum Sink<'a> {
    Callbacks,
    Consumer(&'a mut dyn FnMut(&mut OpSpec)),
}

/// A high-level io_uring instance.
///
/// Operations are prepared against the ring with a descriptor, submitted in
/// batches, and demultiplexed back to their descriptors as completions
/// arrive. The ring is single-threaded from its own viewpoint: it is not
/// `Send`, and every suspension point is inside the blocking wait.
///
/// ```no_run
/// # fn main() -> iou::Result<()> {
/// let mut ring = iou::Ring::new()?;
/// let id = ring.prep_nop()?;
/// ring.submit()?;
/// let spec = ring.wait_for_completion()?;
/// assert_eq!(spec.id, id);
/// # Ok(())
/// # }
/// ```
pub struct Ring {
    uring: Option<Uring>,
    op_counter: u32,
    unsubmitted_sqes: u32,
    pending_ops: PendingOps,
    buf_rings: BufRingRegistry,
    wait_guard: Box<dyn WaitGuard>,
}

impl Ring {
    /// Create and initialize a ring.
    ///
    /// The kernel queue is sized at 1024 entries; on `ENOMEM` the capacity
    /// is halved and retried, down to a floor of 64. Any other setup error
    /// is fatal for the instance.
    pub fn new() -> Result<Ring> {
        let mut entries = RING_CAPACITY;
        let mut flags = SetupFlags::SUBMIT_ALL | SetupFlags::COOP_TASKRUN;

        let uring = loop {
            match Uring::with_flags(entries, flags) {
                Ok(uring) => break uring,
                Err(e) => match e.raw_os_error() {
                    Some(libc::ENOMEM) if entries > RING_CAPACITY_FLOOR => entries /= 2,
                    // an old kernel that predates these setup flags
                    Some(libc::EINVAL) if !flags.is_empty() => flags = SetupFlags::empty(),
                    _ => return Err(Error::Os(e)),
                },
            }
        };

        Ok(Ring {
            uring: Some(uring),
            op_counter: 0,
            unsubmitted_sqes: 0,
            pending_ops: PendingOps::new(),
            buf_rings: BufRingRegistry::new(),
            wait_guard: Box::new(DirectWait),
        })
    }

    /// Close the ring: free every buffer ring, then exit the io_uring.
    ///
    /// Idempotent. In-flight operations are dropped without completing;
    /// callers that care should drain completions first.
    pub fn close(&mut self) {
        if let Some(uring) = self.uring.take() {
            self.buf_rings.teardown(&uring.submitter());
            self.pending_ops.clear();
        }
    }

    /// Whether the ring has been closed (or never initialized).
    pub fn is_closed(&self) -> bool {
        self.uring.is_none()
    }

    /// Observer view of the in-flight operation table.
    pub fn pending_ops(&self) -> &PendingOps {
        &self.pending_ops
    }

    /// Total number of submission slots in the kernel ring.
    pub fn sq_capacity(&self) -> Result<usize> {
        match &self.uring {
            Some(uring) => Ok(uring.sq_capacity()),
            None => Err(Error::Uninitialized),
        }
    }

    /// Number of operations prepared since the last submit.
    pub fn sq_pending(&self) -> u32 {
        self.unsubmitted_sqes
    }

    /// Install the guard bracketing blocking waits (see
    /// [`WaitGuard`](crate::WaitGuard)).
    pub fn set_wait_guard<G>(&mut self, guard: G)
    where
        G: WaitGuard + 'static,
    {
        self.wait_guard = Box::new(guard);
    }

    /// Register a ring of `count` kernel-selected buffers of `size` bytes
    /// each for multishot reads, returning its buffer-group id.
    pub fn setup_buffer_ring(&mut self, count: u32, size: u32) -> Result<u16> {
        let uring = match &self.uring {
            Some(uring) => uring,
            None => return Err(Error::Uninitialized),
        };
        self.buf_rings.setup(&uring.submitter(), count, size)
    }

    /// Prepare a no-op. No context is stored; the completion arrives as a
    /// bare `{id, result}` descriptor.
    pub fn prep_nop(&mut self) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let entry = opcode::Nop::new().build().user_data(id as u64);
        self.push_entry(entry)?;
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare an accept on `fd`. With `multishot`, one submission keeps
    /// producing a completion per incoming connection until cancelled.
    pub fn prep_accept(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let fd = spec.fd.ok_or(Error::MissingArgument("fd"))?;
        let multishot = spec.multishot;

        let mut ctx = OpContext::new(OpKind::Accept, spec, id);
        // the kernel holds these pointers until the operation retires
        let (addr, addrlen) = ctx.sockaddr_mut();
        let entry = if multishot {
            opcode::AcceptMulti::new(fd, addr, addrlen).build()
        } else {
            opcode::Accept::new(fd, addr, addrlen).build()
        }
        .user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare a close of `fd`.
    pub fn prep_close(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let fd = spec.fd.ok_or(Error::MissingArgument("fd"))?;

        let ctx = OpContext::new(OpKind::Close, spec, id);
        let entry = opcode::Close::new(fd).build().user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare a read on `fd`.
    ///
    /// One-shot form: reads up to `len` bytes into the descriptor's
    /// `buffer` at `buffer_offset` (negative offsets count from one past
    /// the end). The buffer is expanded up front and trimmed to the bytes
    /// actually read on completion.
    ///
    /// Multishot form (`multishot` plus a `buffer_group`): the kernel picks
    /// a buffer from the registered ring for every chunk that arrives and
    /// the materialised payload replaces the descriptor's `buffer` each
    /// completion.
    pub fn prep_read(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;

        if spec.multishot {
            return self.prep_read_multishot(spec);
        }

        let id = self.mint_id();

        let fd = spec.fd.ok_or(Error::MissingArgument("fd"))?;
        let len = spec.len.ok_or(Error::MissingArgument("len"))? as usize;
        match &spec.buffer {
            Some(Buffer::Bytes(_)) => {}
            Some(_) => return Err(Error::BadArgument("buffer")),
            None => return Err(Error::MissingArgument("buffer")),
        }
        let raw_offset = spec.buffer_offset.unwrap_or(0);
        let utf8 = spec.utf8;

        let mut ctx = OpContext::new(OpKind::Read, spec, id);
        let (ptr, offset) = {
            let buf = match ctx.spec_mut().buffer.as_mut() {
                Some(Buffer::Bytes(buf)) => buf,
                _ => return Err(Error::BadArgument("buffer")),
            };
            let current = buf.len() as i64;
            let offset = if raw_offset < 0 {
                current + raw_offset + 1
            } else {
                raw_offset
            };
            if offset < 0 {
                return Err(Error::BadArgument("buffer_offset"));
            }
            let offset = offset as usize;
            let needed = offset + len;
            if buf.len() < needed {
                buf.resize(needed, 0);
            }
            (unsafe { buf.as_mut_ptr().add(offset) }, offset)
        };
        ctx.set_read_meta(ReadMeta {
            offset,
            buf_group: None,
            utf8,
        });

        let entry = opcode::Read::new(fd, ptr, len as u32)
            .build()
            .user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    fn prep_read_multishot(&mut self, spec: OpSpec) -> Result<u32> {
        let id = self.mint_id();

        let fd = spec.fd.ok_or(Error::MissingArgument("fd"))?;
        let buf_group = spec
            .buffer_group
            .ok_or(Error::MissingArgument("buffer_group"))?;
        let utf8 = spec.utf8;

        let mut ctx = OpContext::new(OpKind::Read, spec, id);
        ctx.set_read_meta(ReadMeta {
            offset: 0,
            buf_group: Some(buf_group),
            utf8,
        });

        let entry = opcode::ReadMulti::new(fd, buf_group)
            .build()
            .user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare a write of the descriptor's `buffer` to `fd`. `len` limits
    /// the write and defaults to the whole buffer.
    pub fn prep_write(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let fd = spec.fd.ok_or(Error::MissingArgument("fd"))?;
        let buf_len = match &spec.buffer {
            Some(buffer) => buffer.len(),
            None => return Err(Error::MissingArgument("buffer")),
        };
        let nbytes = match spec.len {
            Some(len) if len as usize > buf_len => return Err(Error::BadArgument("len")),
            Some(len) => len,
            None => buf_len as u32,
        };

        let ctx = OpContext::new(OpKind::Write, spec, id);
        let ptr = match ctx.spec().buffer.as_ref() {
            Some(buffer) => buffer.as_bytes().as_ptr(),
            None => return Err(Error::MissingArgument("buffer")),
        };
        let entry = opcode::Write::new(fd, ptr, nbytes)
            .build()
            .user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare a timeout for the descriptor's `interval` (fractional
    /// seconds). Expiration completes with `-ETIME`; with `multishot` the
    /// timer re-arms after every expiration.
    pub fn prep_timeout(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let interval = spec.interval.ok_or(Error::MissingArgument("interval"))?;
        let flags = if spec.multishot {
            TimeoutFlags::MULTISHOT
        } else {
            TimeoutFlags::empty()
        };

        let mut ctx = OpContext::new(OpKind::Timeout, spec, id);
        let ts = ctx.set_timespec(Timespec::from_secs_f64(interval));
        let entry = opcode::Timeout::new(ts)
            .flags(flags)
            .build()
            .user_data(id as u64);

        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Prepare a cancellation of the operation identified by `target`.
    ///
    /// No context is stored for the cancellation itself; its completion
    /// arrives as a bare `{id, result}` descriptor, while the cancelled
    /// operation completes through its own context (typically with
    /// `-ECANCELED`).
    pub fn prep_cancel(&mut self, target: impl Into<CancelTarget>) -> Result<u32> {
        self.ensure_open()?;

        let CancelTarget::Id(target_id) = target.into();
        if target_id == 0 {
            return Err(Error::MissingArgument("id"));
        }

        let id = self.mint_id();
        let entry = opcode::AsyncCancel::new(target_id as u64)
            .build()
            .user_data(id as u64);

        self.push_entry(entry)?;
        self.unsubmitted_sqes += 1;
        Ok(id)
    }

    /// Submit a no-op carrying an arbitrary descriptor, immediately.
    ///
    /// This is the mechanism for injecting synchronous events into the
    /// completion stream; a descriptor with `signal: Stop` makes
    /// [`process_completions_loop`](Self::process_completions_loop) exit
    /// once it is observed. Everything previously prepared is flushed along
    /// with it.
    pub fn emit(&mut self, spec: OpSpec) -> Result<u32> {
        self.ensure_open()?;
        let id = self.mint_id();

        let stop = spec.signal == Some(Signal::Stop);
        let mut ctx = OpContext::new(OpKind::Emit, spec, id);
        if stop {
            ctx.set_stop_signal();
        }

        let entry = opcode::Nop::new().build().user_data(id as u64);
        self.push_entry(entry)?;
        self.pending_ops.insert(id, ctx);

        if let Some(uring) = &self.uring {
            uring.submitter().submit().map_err(Error::Os)?;
        }
        self.unsubmitted_sqes = 0;
        Ok(id)
    }

    /// Submit all prepared operations to the kernel. A no-op when nothing
    /// is pending.
    pub fn submit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.unsubmitted_sqes == 0 {
            return Ok(());
        }
        self.flush_unsubmitted()
    }

    /// Block until the next completion and return its descriptor, synthetic
    /// if the id is not tracked. Per-operation callbacks are not invoked on
    /// this path.
    pub fn wait_for_completion(&mut self) -> Result<OpSpec> {
        self.ensure_open()?;
        let entry = self.wait_pop()?;
        Ok(self.take_cqe_spec(entry))
    }

    /// Process completions, delivering each to its operation's callback.
    ///
    /// Pending operations are auto-submitted first. With `wait`, blocks for
    /// one completion before draining whatever else is ready. Returns the
    /// number of completions processed.
    pub fn process_completions(&mut self, wait: bool) -> Result<u32> {
        self.process_completions_inner(wait, &mut Sink::Callbacks)
    }

    /// Like [`process_completions`](Self::process_completions), but yields
    /// every descriptor to `consumer` instead of the per-operation
    /// callbacks.
    pub fn process_completions_with<F>(&mut self, wait: bool, mut consumer: F) -> Result<u32>
    where
        F: FnMut(&mut OpSpec),
    {
        self.process_completions_inner(wait, &mut Sink::Consumer(&mut consumer))
    }

    /// Process completions indefinitely, blocking between batches. Returns
    /// once an emit carrying `signal: Stop` is observed.
    pub fn process_completions_loop(&mut self) -> Result<()> {
        self.process_completions_loop_inner(&mut Sink::Callbacks)
    }

    /// Loop form with an inline consumer, like
    /// [`process_completions_with`](Self::process_completions_with).
    pub fn process_completions_loop_with<F>(&mut self, mut consumer: F) -> Result<()>
    where
        F: FnMut(&mut OpSpec),
    {
        self.process_completions_loop_inner(&mut Sink::Consumer(&mut consumer))
    }

    fn process_completions_inner(&mut self, wait: bool, sink: &mut Sink<'_>) -> Result<u32> {
        self.ensure_open()?;
        let mut count = 0;

        self.flush_unsubmitted()?;

        if wait {
            let entry = self.wait_pop()?;
            count += 1;
            self.process_cqe(entry, sink, None);
        }

        count += self.process_ready_cqes(sink, None)?;
        Ok(count)
    }

    fn process_completions_loop_inner(&mut self, sink: &mut Sink<'_>) -> Result<()> {
        self.ensure_open()?;
        let mut stop = false;

        loop {
            self.flush_unsubmitted()?;

            let entry = self.wait_pop()?;
            self.process_cqe(entry, sink, Some(&mut stop));
            if stop {
                break;
            }

            self.process_ready_cqes(sink, Some(&mut stop))?;
            if stop {
                break;
            }
        }
        Ok(())
    }

    /// Drain every currently visible completion, then check for kernel-side
    /// overflow: if the overflow flag is up, flush with `GETEVENTS` and
    /// take one more pass.
    fn process_ready_cqes(
        &mut self,
        sink: &mut Sink<'_>,
        mut stop_flag: Option<&mut bool>,
    ) -> Result<u32> {
        let mut total = 0u32;
        let mut overflow_checked = false;

        loop {
            let mut count = 0;
            let mut stopped = false;
            loop {
                let entry = match &self.uring {
                    Some(uring) => uring.completion().peek(count),
                    None => None,
                };
                let entry = match entry {
                    Some(entry) => entry,
                    None => break,
                };
                count += 1;
                self.process_cqe(entry, sink, stop_flag.as_deref_mut());
                if stop_flag.as_deref().map_or(false, |stop| *stop) {
                    stopped = true;
                    break;
                }
            }
            if let Some(uring) = self.uring.as_mut() {
                uring.completion_mut().advance(count);
            }
            total += count as u32;

            if stopped || overflow_checked {
                break;
            }

            let needs_flush = match &self.uring {
                Some(uring) => uring.cq_needs_flush(),
                None => false,
            };
            if !needs_flush {
                break;
            }
            if let Some(uring) = &self.uring {
                uring.submitter().getevents().map_err(Error::Os)?;
            }
            overflow_checked = true;
        }

        Ok(total)
    }

    /// Route one completion: look up its context, post-process, release the
    /// context unless more completions are promised, and deliver the
    /// descriptor.
    fn process_cqe(
        &mut self,
        cqe: cqueue::Entry,
        sink: &mut Sink<'_>,
        mut stop_flag: Option<&mut bool>,
    ) {
        if let Some(stop) = stop_flag.as_deref_mut() {
            *stop = false;
        }

        let id = cqe.user_data() as u32;
        let result = cqe.result();

        if !self.pending_ops.contains(id) {
            let mut spec = OpSpec::synthetic(id, result);
            if let Sink::Consumer(consumer) = sink {
                consumer(&mut spec);
            }
            return;
        }

        let mut stopping = false;
        if let Some(ctx) = self.pending_ops.get_mut(id) {
            match ctx.kind() {
                OpKind::Read => update_read_buffer(ctx, &mut self.buf_rings, &cqe),
                OpKind::Emit => stopping = ctx.stop_signal(),
                _ => {}
            }
        }
        // a raised stop flag short-circuits delivery, but only on the loop
        // path where someone is watching it
        let stop_requested = stopping && stop_flag.is_some();
        if stopping {
            if let Some(stop) = stop_flag.as_deref_mut() {
                *stop = true;
            }
        }

        if cqe.more() {
            // multishot: the context stays in the table for the next CQE
            let ctx = match self.pending_ops.get_mut(id) {
                Some(ctx) => ctx,
                None => return,
            };
            ctx.spec_mut().result = Some(result);
            if stop_requested {
                return;
            }
            match sink {
                Sink::Consumer(consumer) => consumer(ctx.spec_mut()),
                Sink::Callbacks => {
                    let (spec, block) = ctx.spec_and_block();
                    if let Some(callback) = block {
                        callback(spec);
                    }
                }
            }
        } else {
            let mut ctx = match self.pending_ops.remove(id) {
                Some(ctx) => ctx,
                None => return,
            };
            ctx.spec_mut().result = Some(result);
            if stop_requested {
                return;
            }
            match sink {
                Sink::Consumer(consumer) => consumer(ctx.spec_mut()),
                Sink::Callbacks => {
                    let (spec, block) = ctx.spec_and_block();
                    if let Some(callback) = block {
                        callback(spec);
                    }
                }
            }
            // ctx dropped here, after the callback has returned
        }
    }

    /// Like [`process_cqe`](Self::process_cqe) minus delivery: returns the
    /// completed descriptor instead.
    fn take_cqe_spec(&mut self, cqe: cqueue::Entry) -> OpSpec {
        let id = cqe.user_data() as u32;
        let result = cqe.result();

        if !self.pending_ops.contains(id) {
            return OpSpec::synthetic(id, result);
        }

        if let Some(ctx) = self.pending_ops.get_mut(id) {
            if ctx.kind() == OpKind::Read {
                update_read_buffer(ctx, &mut self.buf_rings, &cqe);
            }
        }

        if cqe.more() {
            match self.pending_ops.get_mut(id) {
                Some(ctx) => {
                    ctx.spec_mut().result = Some(result);
                    ctx.spec().snapshot()
                }
                None => OpSpec::synthetic(id, result),
            }
        } else {
            match self.pending_ops.remove(id) {
                Some(mut ctx) => {
                    ctx.spec_mut().result = Some(result);
                    ctx.into_spec()
                }
                None => OpSpec::synthetic(id, result),
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.uring.is_some() {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }

    fn mint_id(&mut self) -> u32 {
        // ids are never recycled within one ring's lifetime
        self.op_counter = self
            .op_counter
            .checked_add(1)
            .expect("submission id space exhausted");
        self.op_counter
    }

    fn push_entry(&mut self, entry: squeue::Entry) -> Result<()> {
        match self.uring.as_mut() {
            Some(uring) => {
                unsafe { uring.submission().push(entry) }.map_err(|_| Error::RingFull)
            }
            None => Err(Error::Uninitialized),
        }
    }

    fn flush_unsubmitted(&mut self) -> Result<()> {
        if self.unsubmitted_sqes == 0 {
            return Ok(());
        }
        self.unsubmitted_sqes = 0;
        match &self.uring {
            Some(uring) => {
                uring.submitter().submit().map_err(Error::Os)?;
                Ok(())
            }
            None => Err(Error::Uninitialized),
        }
    }

    fn wait_pop(&mut self) -> Result<cqueue::Entry> {
        match self.uring.as_mut() {
            Some(uring) => {
                wait::wait_for_cqe(uring, &mut *self.wait_guard).map_err(Error::Os)
            }
            None => Err(Error::Uninitialized),
        }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        self.close();
    }
}

/// Post-completion work for reads: trim the caller's buffer to the bytes
/// read, or materialise and hand back the kernel-selected buffer.
fn update_read_buffer(ctx: &mut OpContext, rings: &mut BufRingRegistry, cqe: &cqueue::Entry) {
    let res = cqe.result();
    if res < 0 {
        return;
    }

    if let Some(buf_index) = cqe.buffer_id() {
        let meta = match ctx.read_meta() {
            Some(meta) => meta,
            None => return,
        };
        if res == 0 {
            ctx.spec_mut().buffer = Some(if meta.utf8 {
                Buffer::Text(String::new())
            } else {
                Buffer::Bytes(Vec::new())
            });
            return;
        }
        let buf_group = match meta.buf_group {
            Some(buf_group) => buf_group,
            None => return,
        };
        let ring = match rings.get_mut(buf_group) {
            Some(ring) => ring,
            None => return,
        };

        let data = unsafe { slice::from_raw_parts(ring.buffer_ptr(buf_index), res as usize) };
        ctx.spec_mut().buffer = Some(if meta.utf8 {
            Buffer::Text(String::from_utf8_lossy(data).into_owned())
        } else {
            Buffer::Bytes(data.to_vec())
        });
        // payload copied out; the buffer goes straight back to the kernel
        ring.recycle(buf_index);
        return;
    }

    let meta = match ctx.read_meta() {
        Some(meta) => meta,
        None => return,
    };
    // the pre-expanded buffer shrinks back to offset + bytes actually read
    if let Some(Buffer::Bytes(buf)) = ctx.spec_mut().buffer.as_mut() {
        buf.truncate(meta.offset + res as usize);
    }
}
