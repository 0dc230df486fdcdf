mod common;

use std::cell::Cell;
use std::rc::Rc;

use iou::{Error, OpSpec, Ring, WaitGuard};

#[test]
fn test_nop_roundtrip() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let id = ring.prep_nop()?;
    assert_eq!(ring.sq_pending(), 1);

    ring.submit()?;
    assert_eq!(ring.sq_pending(), 0);

    let spec = ring.wait_for_completion()?;
    assert_eq!(spec.id, id);
    assert_eq!(spec.result, Some(0));

    // nops store no context
    assert!(ring.pending_ops().is_empty());
    Ok(())
}

#[test]
fn test_ids_are_minted_in_order() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    assert_eq!(ring.prep_nop()?, 1);
    assert_eq!(ring.prep_nop()?, 2);
    assert_eq!(ring.prep_nop()?, 3);

    ring.submit()?;
    let mut seen = 0;
    while seen < 3 {
        seen += ring.process_completions(true)?;
    }
    Ok(())
}

#[test]
fn test_submit_is_noop_when_nothing_pending() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    assert_eq!(ring.sq_pending(), 0);
    ring.submit()?;
    ring.submit()?;
    Ok(())
}

#[test]
fn test_close_is_idempotent() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    assert!(!ring.is_closed());

    ring.close();
    assert!(ring.is_closed());
    ring.close();
    assert!(ring.is_closed());

    assert!(matches!(ring.prep_nop(), Err(Error::Uninitialized)));
    assert!(matches!(ring.submit(), Err(Error::Uninitialized)));
    assert!(matches!(
        ring.process_completions(false),
        Err(Error::Uninitialized)
    ));
    assert!(matches!(
        ring.wait_for_completion(),
        Err(Error::Uninitialized)
    ));
    Ok(())
}

#[test]
fn test_ring_full_when_sq_exhausted() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    let capacity = ring.sq_capacity()?;

    for _ in 0..capacity {
        ring.prep_nop()?;
    }
    assert!(matches!(ring.prep_nop(), Err(Error::RingFull)));

    // submitting frees the slots again
    ring.submit()?;
    ring.prep_nop()?;
    Ok(())
}

#[test]
fn test_missing_arguments() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    assert!(matches!(
        ring.prep_accept(OpSpec::new()),
        Err(Error::MissingArgument("fd"))
    ));
    assert!(matches!(
        ring.prep_close(OpSpec::new()),
        Err(Error::MissingArgument("fd"))
    ));
    assert!(matches!(
        ring.prep_read(OpSpec::new().fd(0)),
        Err(Error::MissingArgument("len"))
    ));
    assert!(matches!(
        ring.prep_read(OpSpec::new().fd(0).len(8)),
        Err(Error::MissingArgument("buffer"))
    ));
    assert!(matches!(
        ring.prep_read(OpSpec::new().fd(0).multishot()),
        Err(Error::MissingArgument("buffer_group"))
    ));
    assert!(matches!(
        ring.prep_write(OpSpec::new().fd(0)),
        Err(Error::MissingArgument("buffer"))
    ));
    assert!(matches!(
        ring.prep_timeout(OpSpec::new()),
        Err(Error::MissingArgument("interval"))
    ));
    assert!(matches!(
        ring.prep_cancel(&OpSpec::new()),
        Err(Error::MissingArgument("id"))
    ));

    // argument errors never leave anything queued
    assert_eq!(ring.sq_pending(), 0);
    assert!(ring.pending_ops().is_empty());
    Ok(())
}

#[test]
fn test_bad_arguments() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    // a text buffer cannot back a raw read
    assert!(matches!(
        ring.prep_read(OpSpec::new().fd(0).len(4).buffer("text")),
        Err(Error::BadArgument("buffer"))
    ));
    // an offset pointing before the start of the buffer
    assert!(matches!(
        ring.prep_read(
            OpSpec::new()
                .fd(0)
                .len(4)
                .buffer(Vec::new())
                .buffer_offset(-2)
        ),
        Err(Error::BadArgument("buffer_offset"))
    ));
    // a write length beyond the end of the buffer
    assert!(matches!(
        ring.prep_write(OpSpec::new().fd(0).buffer(&b"abc"[..]).len(4)),
        Err(Error::BadArgument("len"))
    ));
    Ok(())
}

struct CountingGuard {
    entered: Rc<Cell<u32>>,
    exited: Rc<Cell<u32>>,
}

impl WaitGuard for CountingGuard {
    fn enter_blocking_region(&mut self) {
        self.entered.set(self.entered.get() + 1);
    }

    fn exit_blocking_region(&mut self) {
        self.exited.set(self.exited.get() + 1);
    }
}

#[test]
fn test_wait_guard_brackets_blocking_wait() -> anyhow::Result<()> {
    let entered = Rc::new(Cell::new(0));
    let exited = Rc::new(Cell::new(0));

    let mut ring = Ring::new()?;
    ring.set_wait_guard(CountingGuard {
        entered: Rc::clone(&entered),
        exited: Rc::clone(&exited),
    });

    ring.prep_timeout(OpSpec::new().interval(0.02))?;
    ring.submit()?;
    let spec = ring.wait_for_completion()?;
    assert_eq!(spec.result, Some(-libc::ETIME));

    assert!(entered.get() >= 1);
    assert_eq!(entered.get(), exited.get());
    Ok(())
}
