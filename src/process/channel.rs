//! Parent/monitor/init synchronization channel, grounded on the model
//! runtime's `process::channel::Channel`/`Message` shape but carried over a
//! raw `nix` pipe (matching the version of `mio` this crate's manifest
//! actually pins) instead of `mio::unix::pipe`.

use nix::fcntl::OFlag;
use nix::unistd::{close, pipe2, read, write, Pid};

use crate::error::{DsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Message {
    /// The monitor has forked init and is reporting its (host-view) PID.
    InitReady = 1,
    /// The init child failed before it could exec; the byte after this tag
    /// is not a PID, it is an exit status.
    InitFailed = 2,
}

impl Message {
    fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Message::InitReady),
            2 => Ok(Message::InitFailed),
            other => Err(DsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown channel message tag {}", other),
            ))),
        }
    }
}

pub struct Channel {
    rfd: i32,
    wfd: i32,
}

impl Channel {
    pub fn new() -> Result<Self> {
        let (rfd, wfd) = pipe2(OFlag::O_CLOEXEC).map_err(DsError::Errno)?;
        Ok(Channel { rfd, wfd })
    }

    /// Closes this end's read half; used by the writer after forking so it
    /// isn't holding a copy of the read end it'll never use.
    pub fn close_read(&mut self) -> Result<()> {
        if self.rfd >= 0 {
            close(self.rfd).map_err(DsError::Errno)?;
            self.rfd = -1;
        }
        Ok(())
    }

    pub fn close_write(&mut self) -> Result<()> {
        if self.wfd >= 0 {
            close(self.wfd).map_err(DsError::Errno)?;
            self.wfd = -1;
        }
        Ok(())
    }

    pub fn send_init_ready(&self, pid: Pid) -> Result<()> {
        write_all(self.wfd, &[Message::InitReady as u8])?;
        write_all(self.wfd, &pid.as_raw().to_be_bytes())?;
        Ok(())
    }

    pub fn send_init_failed(&self, exit_code: i32) -> Result<()> {
        write_all(self.wfd, &[Message::InitFailed as u8])?;
        write_all(self.wfd, &exit_code.to_be_bytes())?;
        Ok(())
    }

    /// Blocks until the monitor reports init's PID, or that init failed
    /// before exec.
    pub fn wait_for_init(&self) -> Result<std::result::Result<Pid, i32>> {
        let mut tag = [0u8; 1];
        read_exact(self.rfd, &mut tag)?;
        match Message::from_u8(tag[0])? {
            Message::InitReady => {
                let mut buf = [0u8; 4];
                read_exact(self.rfd, &mut buf)?;
                Ok(Ok(Pid::from_raw(i32::from_be_bytes(buf))))
            }
            Message::InitFailed => {
                let mut buf = [0u8; 4];
                read_exact(self.rfd, &mut buf)?;
                Ok(Err(i32::from_be_bytes(buf)))
            }
        }
    }
}

fn write_all(fd: i32, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = write(fd, buf).map_err(DsError::Errno)?;
        if n == 0 {
            return Err(DsError::Io(std::io::Error::new(std::io::ErrorKind::WriteZero, "channel write")));
        }
        buf = &buf[n..];
    }
    Ok(())
}

fn read_exact(fd: i32, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = read(fd, buf).map_err(DsError::Errno)?;
        if n == 0 {
            return Err(DsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "channel closed before message completed",
            )));
        }
        buf = &mut buf[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_init_ready() {
        let ch = Channel::new().unwrap();
        ch.send_init_ready(Pid::from_raw(4242)).unwrap();
        let result = ch.wait_for_init().unwrap();
        assert_eq!(result, Ok(Pid::from_raw(4242)));
    }

    #[test]
    fn round_trips_init_failed() {
        let ch = Channel::new().unwrap();
        ch.send_init_failed(17).unwrap();
        let result = ch.wait_for_init().unwrap();
        assert_eq!(result, Err(17));
    }
}
