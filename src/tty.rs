//! Terminal plumbing (C2): PTY allocation, raw-mode handling, and the
//! host-side proxy loop, grounded on the model runtime's `tty.rs` for the
//! allocate/SCM_RIGHTS shape and on its `process` module for the mio event
//! loop pattern used elsewhere in this crate.

use std::convert::TryFrom;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use mio::{Events, Interest, Poll, Token};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{close, pipe2, read, write, Pid};

use crate::error::{DsError, Result};

pub struct Pty {
    pub master: RawFd,
    pub slave: RawFd,
    pub slave_path: PathBuf,
}

/// Allocates a PTY pair before any fork, marking both ends close-on-exec so
/// they never leak into the guest init; the slave's host device path is
/// bind-mounted over the container's console device before `pivot_root`.
pub fn allocate_pty() -> Result<Pty> {
    let result = openpty(None, None).map_err(|_| DsError::PtyAllocFailed)?;
    let slave_path = slave_tty_name(result.slave).unwrap_or_else(|| PathBuf::from("/dev/pts/unknown"));

    set_cloexec(result.master)?;
    set_cloexec(result.slave)?;

    Ok(Pty {
        master: result.master,
        slave: result.slave,
        slave_path,
    })
}

fn slave_tty_name(slave: RawFd) -> Option<PathBuf> {
    let ptr = unsafe { libc::ttyname(slave) };
    if ptr.is_null() {
        return None;
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(ptr) };
    cstr.to_str().ok().map(PathBuf::from)
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    let flags = fcntl(fd, FcntlArg::F_GETFD).map_err(DsError::Errno)?;
    let mut flags = FdFlag::from_bits_truncate(flags);
    flags.insert(FdFlag::FD_CLOEXEC);
    fcntl(fd, FcntlArg::F_SETFD(flags)).map_err(DsError::Errno)?;
    Ok(())
}

pub struct RawModeGuard {
    fd: RawFd,
    saved: Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.fd, SetArg::TCSANOW, &self.saved);
    }
}

/// Puts `fd` (normally the host's stdin) into raw mode, returning a guard
/// that restores the original attributes when dropped.
pub fn make_raw(fd: RawFd) -> Result<RawModeGuard> {
    let saved = termios::tcgetattr(fd).map_err(DsError::Errno)?;
    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(DsError::Errno)?;
    Ok(RawModeGuard { fd, saved })
}

/// Sets the controlling terminal for the calling (session-leader) process.
pub fn set_controlling(fd: RawFd) -> Result<()> {
    if unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) } < 0 {
        log::warn!("could not TIOCSCTTY on fd {}", fd);
    }
    Ok(())
}

/// Propagates the host terminal's current size onto `fd` via `TIOCSWINSZ`.
pub fn resize(fd: RawFd, host_stdout: RawFd) -> Result<()> {
    let mut ws: Winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(host_stdout, libc::TIOCGWINSZ, &mut ws) } < 0 {
        return Ok(());
    }
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) } < 0 {
        return Err(DsError::Errno(Errno::last()));
    }
    Ok(())
}

static mut SIGNAL_PIPE_WRITE: RawFd = -1;

extern "C" fn relay_to_pipe(signum: i32) {
    let byte = [signum as u8];
    unsafe {
        if SIGNAL_PIPE_WRITE >= 0 {
            let _ = libc::write(SIGNAL_PIPE_WRITE, byte.as_ptr() as *const _, 1);
        }
    }
}

const MASTER: Token = Token(0);
const STDIN: Token = Token(1);
const SIGNALS: Token = Token(2);

/// Single-threaded event loop multiplexing stdin -> master, master -> stdout,
/// and a signal self-pipe delivering SIGCHLD/SIGINT/SIGTERM/SIGWINCH.
/// SIGINT/SIGTERM forward to `init_pid`; SIGWINCH re-reads the host terminal
/// size; SIGCHLD triggers a non-blocking reap that ends the loop once init
/// has exited. Also terminates on hangup/error on the master.
pub fn proxy_loop(master_fd: RawFd, init_pid: Pid) -> Result<()> {
    let (sig_recv, sig_send) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).map_err(DsError::Errno)?;
    unsafe {
        SIGNAL_PIPE_WRITE = sig_send;
    }

    let handler = SigHandler::Handler(relay_to_pipe);
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    for sig in [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTERM, Signal::SIGWINCH] {
        unsafe { signal::sigaction(sig, &action) }.map_err(DsError::Errno)?;
    }

    let mut poll = Poll::new().map_err(DsError::Io)?;
    let mut events = Events::with_capacity(16);

    let mut master_src = mio::unix::SourceFd(&master_fd);
    poll.registry()
        .register(&mut master_src, MASTER, Interest::READABLE)
        .map_err(DsError::Io)?;

    let stdin_fd = 0;
    let mut stdin_src = mio::unix::SourceFd(&stdin_fd);
    poll.registry()
        .register(&mut stdin_src, STDIN, Interest::READABLE)
        .map_err(DsError::Io)?;

    let mut sig_src = mio::unix::SourceFd(&sig_recv);
    poll.registry()
        .register(&mut sig_src, SIGNALS, Interest::READABLE)
        .map_err(DsError::Io)?;

    let mut buf = [0u8; 4096];
    let result = 'outer: loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break Err(DsError::Io(e));
        }
        for event in events.iter() {
            match event.token() {
                MASTER => match read(master_fd, &mut buf) {
                    Ok(0) | Err(_) => break 'outer Ok(()),
                    Ok(n) => {
                        let _ = write(1, &buf[..n]);
                    }
                },
                STDIN => match read(stdin_fd, &mut buf) {
                    Ok(0) | Err(_) => {}
                    Ok(n) => {
                        let _ = write(master_fd, &buf[..n]);
                    }
                },
                SIGNALS => {
                    let mut sig_buf = [0u8; 16];
                    loop {
                        match read(sig_recv, &mut sig_buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                for &raw in &sig_buf[..n] {
                                    if handle_signal(raw as i32, master_fd, init_pid) {
                                        break 'outer Ok(());
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    };

    let _ = close(sig_recv);
    let _ = close(sig_send);
    unsafe {
        SIGNAL_PIPE_WRITE = -1;
    }
    result
}

fn handle_signal(raw: i32, master_fd: RawFd, init_pid: Pid) -> bool {
    if raw == Signal::SIGINT as i32 || raw == Signal::SIGTERM as i32 {
        let _ = nix::sys::signal::kill(init_pid, Signal::try_from(raw).ok());
        false
    } else if raw == Signal::SIGWINCH as i32 {
        let _ = resize(master_fd, 1);
        false
    } else if raw == Signal::SIGCHLD as i32 {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => false,
            Ok(_) => true,
        }
    } else {
        false
    }
}
