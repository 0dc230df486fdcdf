//! Operation descriptors and per-submission contexts.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::os::unix::io::RawFd;

use crate::types::Timespec;

/// The kind of an operation, assigned by the ring when the operation is
/// prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Cancel,
    Close,
    Emit,
    Nop,
    Read,
    Timeout,
    Write,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Accept => "accept",
            OpKind::Cancel => "cancel",
            OpKind::Close => "close",
            OpKind::Emit => "emit",
            OpKind::Nop => "nop",
            OpKind::Read => "read",
            OpKind::Timeout => "timeout",
            OpKind::Write => "write",
        }
    }
}

/// In-band signals carried by [`emit`](crate::Ring::emit) descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the completion loop to exit after processing this emit.
    Stop,
}

/// An I/O payload: raw bytes, or text materialised from a UTF-8-tagged
/// read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffer {
    Bytes(Vec<u8>),
    Text(String),
}

impl Buffer {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Bytes(b) => b.len(),
            Buffer::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Buffer::Bytes(b) => b,
            Buffer::Text(s) => s.as_bytes(),
        }
    }

    /// The payload as text. `Bytes` are re-checked on the fly.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Buffer::Bytes(b) => std::str::from_utf8(b).ok(),
            Buffer::Text(s) => Some(s),
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(b: Vec<u8>) -> Buffer {
        Buffer::Bytes(b)
    }
}

impl From<&[u8]> for Buffer {
    fn from(b: &[u8]) -> Buffer {
        Buffer::Bytes(b.to_vec())
    }
}

impl From<String> for Buffer {
    fn from(s: String) -> Buffer {
        Buffer::Text(s)
    }
}

impl From<&str> for Buffer {
    fn from(s: &str) -> Buffer {
        Buffer::Text(s.to_owned())
    }
}

/// A completion callback, invoked with the finished descriptor: once for
/// one-shot operations, once per completion for multishot ones.
pub type Callback = Box<dyn FnMut(&mut OpSpec)>;

/// An operation descriptor.
///
/// Callers fill in the fields the operation needs (missing required fields
/// surface as [`MissingArgument`](crate::Error::MissingArgument) at prep
/// time); the ring assigns `id` and `op` when the operation is prepared and
/// writes `result` - and for reads, `buffer` - when it completes.
#[derive(Default)]
pub struct OpSpec {
    /// Submission id, minted by the ring.
    pub id: u32,
    /// Operation kind, tagged by the ring.
    pub op: Option<OpKind>,
    /// Kernel result: non-negative on success, `-errno` on failure.
    pub result: Option<i32>,

    pub fd: Option<RawFd>,
    pub buffer: Option<Buffer>,
    pub buffer_offset: Option<i64>,
    pub len: Option<u32>,
    pub buffer_group: Option<u16>,
    pub multishot: bool,
    pub utf8: bool,
    pub interval: Option<f64>,
    pub signal: Option<Signal>,

    pub block: Option<Callback>,
}

impl OpSpec {
    pub fn new() -> OpSpec {
        OpSpec::default()
    }

    pub fn fd(mut self, fd: RawFd) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn buffer(mut self, buffer: impl Into<Buffer>) -> Self {
        self.buffer = Some(buffer.into());
        self
    }

    /// Offset into the read buffer; negative values count from one past
    /// the end, so `-1` appends.
    pub fn buffer_offset(mut self, offset: i64) -> Self {
        self.buffer_offset = Some(offset);
        self
    }

    pub fn len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }

    pub fn buffer_group(mut self, bgid: u16) -> Self {
        self.buffer_group = Some(bgid);
        self
    }

    pub fn multishot(mut self) -> Self {
        self.multishot = true;
        self
    }

    /// Materialise buffer-ring payloads as text.
    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    /// Timeout interval in fractional seconds.
    pub fn interval(mut self, secs: f64) -> Self {
        self.interval = Some(secs);
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attach a completion callback.
    pub fn block<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut OpSpec) + 'static,
    {
        self.block = Some(Box::new(f));
        self
    }

    /// Clone of the data fields; any attached callback stays behind.
    pub(crate) fn snapshot(&self) -> OpSpec {
        OpSpec {
            id: self.id,
            op: self.op,
            result: self.result,
            fd: self.fd,
            buffer: self.buffer.clone(),
            buffer_offset: self.buffer_offset,
            len: self.len,
            buffer_group: self.buffer_group,
            multishot: self.multishot,
            utf8: self.utf8,
            interval: self.interval,
            signal: self.signal,
            block: None,
        }
    }

    /// Descriptor carrying only an id and a result, used for completions
    /// whose context is no longer (or never was) tracked.
    pub(crate) fn synthetic(id: u32, result: i32) -> OpSpec {
        OpSpec {
            id,
            result: Some(result),
            ..OpSpec::default()
        }
    }
}

impl Debug for OpSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("OpSpec");
        d.field("id", &self.id);
        if let Some(op) = self.op {
            d.field("op", &op.name());
        }
        if let Some(result) = self.result {
            d.field("result", &result);
        }
        if let Some(fd) = self.fd {
            d.field("fd", &fd);
        }
        if let Some(buffer) = &self.buffer {
            d.field("buffer", buffer);
        }
        if self.block.is_some() {
            d.field("block", &"<callback>");
        }
        d.finish_non_exhaustive()
    }
}

/// Read bookkeeping that must survive until the completion arrives.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadMeta {
    /// Resolved offset into the caller's buffer (one-shot reads).
    pub offset: usize,
    /// Buffer group feeding this read (multishot reads).
    pub buf_group: Option<u16>,
    pub utf8: bool,
}

/// Storage the kernel keeps pointers into across a submission. Lives in the
/// boxed context so the addresses never move.
pub(crate) enum Scratch {
    None,
    Timespec(Timespec),
    Sockaddr(Box<SockaddrData>),
    Read(ReadMeta),
}

#[repr(C)]
pub(crate) struct SockaddrData {
    pub addr: libc::sockaddr_storage,
    pub len: libc::socklen_t,
}

/// Everything about one in-flight operation that must outlive the prep
/// call: the user-visible descriptor, the optional callback, and
/// op-specific scratch storage.
pub struct OpContext {
    kind: OpKind,
    spec: OpSpec,
    block: Option<Callback>,
    stop_signal: bool,
    scratch: Scratch,
}

impl OpContext {
    pub(crate) fn new(kind: OpKind, mut spec: OpSpec, id: u32) -> Box<OpContext> {
        spec.id = id;
        spec.op = Some(kind);
        let block = spec.block.take();
        Box::new(OpContext {
            kind,
            spec,
            block,
            stop_signal: false,
            scratch: Scratch::None,
        })
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn spec(&self) -> &OpSpec {
        &self.spec
    }

    pub(crate) fn spec_mut(&mut self) -> &mut OpSpec {
        &mut self.spec
    }

    pub(crate) fn into_spec(self) -> OpSpec {
        self.spec
    }

    pub fn stop_signal(&self) -> bool {
        self.stop_signal
    }

    pub(crate) fn set_stop_signal(&mut self) {
        self.stop_signal = true;
    }

    /// Split borrow for invoking the stored callback against the spec.
    pub(crate) fn spec_and_block(&mut self) -> (&mut OpSpec, Option<&mut Callback>) {
        (&mut self.spec, self.block.as_mut())
    }

    pub(crate) fn take_block(&mut self) -> Option<Callback> {
        self.block.take()
    }

    /// Store the timeout interval and return a pointer the kernel may hold
    /// on to for the lifetime of this context.
    pub(crate) fn set_timespec(&mut self, ts: Timespec) -> *const Timespec {
        self.scratch = Scratch::Timespec(ts);
        match &self.scratch {
            Scratch::Timespec(ts) => ts,
            _ => unreachable!(),
        }
    }

    /// The timeout value pinned for this operation, if it is a timeout.
    pub fn timespec(&self) -> Option<Timespec> {
        match &self.scratch {
            Scratch::Timespec(ts) => Some(*ts),
            _ => None,
        }
    }

    /// The socket address the kernel filled in for an accept, if any.
    pub fn sockaddr(&self) -> Option<(&libc::sockaddr_storage, libc::socklen_t)> {
        match &self.scratch {
            Scratch::Sockaddr(sa) => Some((&sa.addr, sa.len)),
            _ => None,
        }
    }

    /// Socket-address storage for accept operations; pinned like the
    /// timespec above.
    pub(crate) fn sockaddr_mut(&mut self) -> (*mut libc::sockaddr, *mut libc::socklen_t) {
        let mut data = Box::new(SockaddrData {
            addr: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        });
        let ptrs = (
            &mut data.addr as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut data.len as *mut libc::socklen_t,
        );
        self.scratch = Scratch::Sockaddr(data);
        ptrs
    }

    pub(crate) fn set_read_meta(&mut self, meta: ReadMeta) {
        self.scratch = Scratch::Read(meta);
    }

    pub(crate) fn read_meta(&self) -> Option<ReadMeta> {
        match &self.scratch {
            Scratch::Read(meta) => Some(*meta),
            _ => None,
        }
    }
}

impl Debug for OpContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("kind", &self.kind)
            .field("spec", &self.spec)
            .field("stop_signal", &self.stop_signal)
            .finish_non_exhaustive()
    }
}

/// The pending-op table: sole owner of every in-flight context, keyed by
/// submission id.
#[derive(Default)]
pub struct PendingOps {
    ops: HashMap<u32, Box<OpContext>>,
}

impl PendingOps {
    pub(crate) fn new() -> PendingOps {
        PendingOps::default()
    }

    pub(crate) fn insert(&mut self, id: u32, ctx: Box<OpContext>) {
        self.ops.insert(id, ctx);
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<Box<OpContext>> {
        self.ops.remove(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut OpContext> {
        self.ops.get_mut(&id).map(|ctx| &mut **ctx)
    }

    pub(crate) fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ops.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&OpContext> {
        self.ops.get(&id).map(|ctx| &**ctx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &OpContext)> {
        self.ops.iter().map(|(id, ctx)| (*id, &**ctx))
    }
}
