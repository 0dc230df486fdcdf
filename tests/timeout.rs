mod common;

use std::time::{Duration, Instant};

use common::op_unsupported;
use iou::{OpKind, OpSpec, Ring};

#[test]
fn test_timeout() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    ring.prep_timeout(OpSpec::new().interval(0.05))?;

    let start = Instant::now();
    let mut seen = Vec::new();
    while seen.is_empty() {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.op, spec.result));
        })?;
    }

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(seen, vec![(Some(OpKind::Timeout), Some(-libc::ETIME))]);
    assert!(ring.pending_ops().is_empty());
    Ok(())
}

#[test]
fn test_cancel_timeout() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let timeout_id = ring.prep_timeout(OpSpec::new().interval(10.0))?;
    let cancel_id = ring.prep_cancel(timeout_id)?;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.id, spec.op, spec.result));
        })?;
    }

    let timeout = seen.iter().find(|s| s.0 == timeout_id).unwrap();
    assert_eq!(timeout.1, Some(OpKind::Timeout));
    assert_eq!(timeout.2, Some(-libc::ECANCELED));

    // the cancellation itself is not tracked, so its completion is synthetic
    let cancel = seen.iter().find(|s| s.0 == cancel_id).unwrap();
    assert_eq!(cancel.1, None);
    assert_eq!(cancel.2, Some(0));

    assert!(ring.pending_ops().is_empty());
    Ok(())
}

#[test]
fn test_cancel_by_spec() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let timeout_id = ring.prep_timeout(OpSpec::new().interval(10.0))?;
    let target = OpSpec {
        id: timeout_id,
        ..OpSpec::default()
    };
    ring.prep_cancel(&target)?;

    let mut cancelled = false;
    while !cancelled {
        ring.process_completions_with(true, |spec| {
            if spec.id == timeout_id {
                assert_eq!(spec.result, Some(-libc::ECANCELED));
                cancelled = true;
            }
        })?;
    }
    Ok(())
}

#[test]
fn test_cancel_unknown_id() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let cancel_id = ring.prep_cancel(0xdead_u32)?;

    let mut result = None;
    while result.is_none() {
        ring.process_completions_with(true, |spec| {
            assert_eq!(spec.id, cancel_id);
            result = spec.result;
        })?;
    }
    assert_eq!(result, Some(-libc::ENOENT));
    Ok(())
}

#[test]
fn test_multishot_timeout() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;

    let id = ring.prep_timeout(OpSpec::new().interval(0.01).multishot())?;

    let mut results = Vec::new();
    while results.len() < 3 {
        ring.process_completions_with(true, |spec| {
            results.push(spec.result.unwrap());
        })?;
        if results.first().map_or(false, |r| op_unsupported(*r)) {
            // multishot timeouts need kernel 6.4
            eprintln!("multishot timeout not supported, skipping");
            return Ok(());
        }
    }

    assert!(results.iter().all(|r| *r == -libc::ETIME));
    // the promised follow-ups keep the context alive
    assert!(ring.pending_ops().contains(id));

    ring.prep_cancel(id)?;
    while ring.pending_ops().contains(id) {
        ring.process_completions_with(true, |_| {})?;
    }
    Ok(())
}
