#![allow(dead_code)]

use std::os::unix::io::RawFd;

/// A plain pipe whose ends are closed on drop.
pub struct Pipe {
    pub r: RawFd,
    pub w: RawFd,
}

impl Pipe {
    pub fn new() -> anyhow::Result<Pipe> {
        let (r, w) = nix::unistd::pipe()?;
        Ok(Pipe { r, w })
    }

    pub fn write(&self, data: &[u8]) -> anyhow::Result<usize> {
        Ok(nix::unistd::write(self.w, data)?)
    }

    /// Close the write end early, delivering EOF to readers.
    pub fn close_write(&mut self) {
        if self.w >= 0 {
            let _ = nix::unistd::close(self.w);
            self.w = -1;
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if self.r >= 0 {
            let _ = nix::unistd::close(self.r);
        }
        if self.w >= 0 {
            let _ = nix::unistd::close(self.w);
        }
    }
}

/// Whether a per-op kernel result means the running kernel lacks the
/// opcode or feature, in which case the test bails out politely.
pub fn op_unsupported(result: i32) -> bool {
    result == -libc::EINVAL || result == -libc::EOPNOTSUPP
}
