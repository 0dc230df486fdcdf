mod common;

use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::thread;

use common::op_unsupported;
use iou::{OpKind, OpSpec, Ring};

#[test]
fn test_accept() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let id = ring.prep_accept(OpSpec::new().fd(listener.as_raw_fd()))?;
    assert!(ring.pending_ops().contains(id));

    let client = thread::spawn(move || TcpStream::connect(addr));

    let mut seen = Vec::new();
    while seen.is_empty() {
        ring.process_completions_with(true, |spec| {
            seen.push((spec.id, spec.op, spec.result));
        })?;
    }
    client.join().unwrap()?;

    let (seen_id, op, result) = seen.remove(0);
    assert_eq!(seen_id, id);
    assert_eq!(op, Some(OpKind::Accept));
    let conn_fd = result.unwrap();
    assert!(conn_fd >= 0);
    let _ = nix::unistd::close(conn_fd);

    assert!(ring.pending_ops().is_empty());
    Ok(())
}

#[test]
fn test_accept_multishot() -> anyhow::Result<()> {
    let mut ring = Ring::new()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let id = ring.prep_accept(OpSpec::new().fd(listener.as_raw_fd()).multishot())?;
    ring.submit()?;

    let mut conns = Vec::new();
    for _ in 0..2 {
        let client = thread::spawn(move || TcpStream::connect(addr));

        let mut seen = Vec::new();
        while seen.is_empty() {
            ring.process_completions_with(true, |spec| {
                seen.push((spec.id, spec.result));
            })?;
        }
        client.join().unwrap()?;

        let (seen_id, result) = seen.remove(0);
        let conn_fd = result.unwrap();
        if op_unsupported(conn_fd) {
            // multishot accepts need kernel 5.19
            eprintln!("multishot accept not supported, skipping");
            return Ok(());
        }
        assert_eq!(seen_id, id);
        assert!(conn_fd >= 0);
        conns.push(conn_fd);

        // one submission keeps accepting
        assert!(ring.pending_ops().contains(id));
    }

    ring.prep_cancel(id)?;
    while ring.pending_ops().contains(id) {
        ring.process_completions_with(true, |_| {})?;
    }

    for fd in conns {
        let _ = nix::unistd::close(fd);
    }
    Ok(())
}
