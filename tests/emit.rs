mod common;

use std::time::{Duration, Instant};

use iou::{OpKind, OpSpec, Ring, Signal};

#[test]
fn test_emit_roundtrip() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    // emit submits by itself
    let id = ring.emit(OpSpec::new())?;
    assert_eq!(ring.sq_pending(), 0);

    let mut seen = Vec::new();
    while seen.is_empty() {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.id, spec.op, spec.result));
        })?;
    }
    assert_eq!(seen, vec![(id, Some(OpKind::Emit), Some(0))]);
    Ok(())
}

#[test]
fn test_emit_flushes_prepared_ops() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let nop_id = ring.prep_nop()?;
    assert_eq!(ring.sq_pending(), 1);

    ring.emit(OpSpec::new())?;
    assert_eq!(ring.sq_pending(), 0);

    // the earlier nop went to the kernel together with the emit
    let mut seen = Vec::new();
    while seen.len() < 2 {
        ring.process_completions_with(true, |spec| {
            seen.push(spec.id);
        })?;
    }
    assert!(seen.contains(&nop_id));
    Ok(())
}

#[test]
fn test_emit_stop_exits_loop() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let timeout_id = ring.prep_timeout(OpSpec::new().interval(1.0))?;
    ring.emit(OpSpec::new().signal(Signal::Stop))?;

    let start = Instant::now();
    let mut seen = Vec::new();
    ring.process_completions_loop_with(|spec| {
        seen.push(spec.id);
    })?;

    // the loop exits on the emit, well before the pending timeout fires
    assert!(start.elapsed() < Duration::from_millis(900));

    // the stop descriptor itself is never delivered
    assert!(seen.is_empty());

    // the timeout has not completed and stays tracked
    assert!(ring.pending_ops().contains(timeout_id));
    Ok(())
}

#[test]
fn test_emit_stop_with_callbacks_loop() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    ring.prep_timeout(OpSpec::new().interval(1.0))?;
    ring.emit(OpSpec::new().signal(Signal::Stop))?;

    let start = Instant::now();
    ring.process_completions_loop()?;
    assert!(start.elapsed() < Duration::from_millis(900));
    Ok(())
}

#[test]
fn test_stop_signal_outside_loop_is_delivered() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    // without a loop watching the stop flag, the emit is an ordinary event
    let id = ring.emit(OpSpec::new().signal(Signal::Stop))?;

    let mut seen = Vec::new();
    while seen.is_empty() {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.id, spec.signal));
        })?;
    }
    assert_eq!(seen, vec![(id, Some(Signal::Stop))]);
    Ok(())
}
