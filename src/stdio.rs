//! Minimal owned-fd wrapper, grounded on the model runtime's `stdio.rs`.

use std::os::unix::io::{AsRawFd, RawFd};

use nix::unistd::{close, dup2};

use crate::error::Result;

#[derive(Debug)]
pub struct FileDescriptor(RawFd);

const STDIN: i32 = 0;
const STDOUT: i32 = 1;
const STDERR: i32 = 2;

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        let _ = close(self.0);
    }
}

impl AsRawFd for FileDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl From<RawFd> for FileDescriptor {
    fn from(fd: RawFd) -> Self {
        FileDescriptor(fd)
    }
}

/// Redirects stdin/stdout/stderr onto `fd`, used after a second fork to hand
/// the container's console slave to the guest shell as its controlling tty.
pub fn connect_stdio(fd: &FileDescriptor) -> Result<()> {
    dup2(fd.as_raw_fd(), STDIN)?;
    dup2(fd.as_raw_fd(), STDOUT)?;
    dup2(fd.as_raw_fd(), STDERR)?;
    Ok(())
}
