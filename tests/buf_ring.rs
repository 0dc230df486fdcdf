mod common;

use common::{op_unsupported, Pipe};
use iou::{Error, OpSpec, Ring, MAX_BUFFER_RINGS};

/// Buffer-ring registration needs kernel 5.19.
fn buf_rings_supported(ring: &mut Ring) -> anyhow::Result<bool> {
    match ring.setup_buffer_ring(4, 64) {
        Ok(_) => Ok(true),
        Err(Error::Os(e)) => {
            eprintln!("buffer rings not supported, skipping: {}", e);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[test]
fn test_buffer_group_ids_are_dense() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    if !buf_rings_supported(&mut ring)? {
        return Ok(());
    }

    // id 0 was taken by the probe above
    assert_eq!(ring.setup_buffer_ring(4, 64)?, 1);
    assert_eq!(ring.setup_buffer_ring(8, 128)?, 2);
    Ok(())
}

#[test]
fn test_registry_capacity() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    if !buf_rings_supported(&mut ring)? {
        return Ok(());
    }

    for _ in 1..MAX_BUFFER_RINGS {
        ring.setup_buffer_ring(4, 64)?;
    }
    assert!(matches!(
        ring.setup_buffer_ring(4, 64),
        Err(Error::TooManyBufferRings)
    ));
    Ok(())
}

#[test]
fn test_zero_count_is_rejected() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    assert!(matches!(
        ring.setup_buffer_ring(0, 64),
        Err(Error::BadArgument("count"))
    ));
    Ok(())
}

#[test]
fn test_multishot_read() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    if !buf_rings_supported(&mut ring)? {
        return Ok(());
    }
    let pipe = Pipe::new()?;

    let bg = ring.setup_buffer_ring(4, 1024)?;
    let id = ring.prep_read(OpSpec::new().fd(pipe.r).buffer_group(bg).multishot())?;

    // six bursts through a four-buffer ring proves the hand-back works
    for chunk in &[b"a", b"b", b"c", b"d", b"e", b"f"] {
        pipe.write(*chunk)?;

        let mut seen = Vec::new();
        while seen.is_empty() {
            ring.process_completions_with(true, |spec| {
                seen.push((spec.id, spec.result, spec.buffer.take()));
            })?;
        }

        let (seen_id, result, buffer) = seen.remove(0);
        if result.map_or(false, op_unsupported) {
            // multishot reads need kernel 6.7
            eprintln!("multishot read not supported, skipping");
            return Ok(());
        }

        assert_eq!(seen_id, id);
        assert_eq!(result, Some(1));
        assert_eq!(buffer.unwrap().as_bytes(), *chunk);

        // the submission stays live for the next burst
        assert!(ring.pending_ops().contains(id));
    }

    ring.prep_cancel(id)?;
    while ring.pending_ops().contains(id) {
        ring.process_completions_with(true, |_| {})?;
    }
    Ok(())
}

#[test]
fn test_multishot_read_utf8() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    if !buf_rings_supported(&mut ring)? {
        return Ok(());
    }
    let pipe = Pipe::new()?;

    let bg = ring.setup_buffer_ring(4, 1024)?;
    ring.prep_read(
        OpSpec::new()
            .fd(pipe.r)
            .buffer_group(bg)
            .multishot()
            .utf8(),
    )?;
    pipe.write("héllo".as_bytes())?;

    let mut seen = Vec::new();
    while seen.is_empty() {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.result, spec.buffer.take()));
        })?;
    }

    let (result, buffer) = seen.remove(0);
    if result.map_or(false, op_unsupported) {
        eprintln!("multishot read not supported, skipping");
        return Ok(());
    }
    assert_eq!(result, Some(6));
    assert_eq!(buffer.unwrap().as_str(), Some("héllo"));
    Ok(())
}
