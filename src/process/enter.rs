//! `enter`/`run` (§4.6): open all four namespace FDs before any `setns`,
//! enter them, fork a child that allocates a private PTY and hands the
//! master back to this host process via `SCM_RIGHTS`, then execs a shell
//! (or the given command) in a PID-1-of-its-own-fork-tree position.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};
use nix::sys::uio::IoVec;
use nix::unistd::{execv, fork, setsid, ForkResult, Pid};

use crate::error::{DsError, Result};
use crate::namespaces::{enter_namespaces, open_namespace_fds};
use crate::syscall::Syscall;
use crate::tty::{allocate_pty, make_raw, proxy_loop, set_controlling};

const SHELL_CANDIDATES: &[&str] = &["/bin/bash", "/bin/ash", "/bin/sh"];

pub struct EnterRequest<'a> {
    pub pid: Pid,
    pub user: Option<&'a str>,
    pub cmd: Option<&'a [String]>,
}

/// Runs the full `enter`/`run` sequence from the host parent's perspective:
/// namespace entry happens in a forked child (so the caller's own PID
/// namespace view is untouched), the child sends its PTY master back over a
/// Unix socket pair, and this process proxies the terminal until the guest
/// shell exits.
pub fn run(syscall: &dyn Syscall, req: &EnterRequest<'_>) -> Result<()> {
    let fds = open_namespace_fds(req.pid)?;

    let (host_sock, child_sock) = socket::socketpair(
        socket::AddressFamily::Unix,
        socket::SockType::Stream,
        None,
        socket::SockFlag::empty(),
    )
    .map_err(DsError::Errno)?;

    match unsafe { fork() }.map_err(DsError::Errno)? {
        ForkResult::Parent { child } => {
            let _ = nix::unistd::close(child_sock);
            let master = receive_master_fd(host_sock)?;
            let _ = nix::unistd::close(host_sock);

            let raw_guard = make_raw(0)?;
            let result = proxy_loop(master, child);
            drop(raw_guard);
            result
        }
        ForkResult::Child => {
            let _ = nix::unistd::close(host_sock);
            match enter_and_exec(syscall, &fds, child_sock, req) {
                Ok(never) => match never {},
                Err(e) => {
                    log::error!("enter: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn enter_and_exec(
    syscall: &dyn Syscall,
    fds: &[(nix::sched::CloneFlags, i32)],
    child_sock: RawFd,
    req: &EnterRequest<'_>,
) -> Result<std::convert::Infallible> {
    enter_namespaces(syscall, fds)?;

    // A fresh PTY inside the container's own devpts instance, so `tty`/`ps`
    // report container-local paths.
    let pty = allocate_pty()?;
    send_master_fd(child_sock, pty.master)?;
    let _ = nix::unistd::close(child_sock);

    // This process is the first to hold a PID inside the target namespace,
    // but its own parent (the setns caller) has none there, so anything it
    // execs directly would show up with a PPID of 0. Become session leader
    // and claim the controlling terminal here, then fork once more and exit
    // immediately: the grandchild gets reparented to the container's actual
    // init and execs from that clean position, so `ps` inside the container
    // reports it the same way it reports any other init-spawned process.
    setsid().map_err(DsError::Errno)?;
    set_controlling(pty.slave)?;

    match unsafe { fork() }.map_err(DsError::Errno)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {
            nix::unistd::dup2(pty.slave, 0).map_err(DsError::Errno)?;
            nix::unistd::dup2(pty.slave, 1).map_err(DsError::Errno)?;
            nix::unistd::dup2(pty.slave, 2).map_err(DsError::Errno)?;

            exec_shell_or_command(req)
        }
    }
}

fn exec_shell_or_command(req: &EnterRequest<'_>) -> Result<std::convert::Infallible> {
    if let Some(cmd) = req.cmd {
        return exec_command(cmd);
    }
    if let Some(user) = req.user {
        let su = CString::new("/bin/su").unwrap();
        let args = [
            su.clone(),
            CString::new("-l").unwrap(),
            CString::new(user).unwrap(),
        ];
        if let Ok(never) = execv(&su, &args) {
            match never {}
        }
    }
    for shell in SHELL_CANDIDATES {
        let path = Path::new(shell);
        if !path.exists() {
            continue;
        }
        let c_path = CString::new(*shell).unwrap();
        if let Ok(never) = execv(&c_path, &[c_path.clone()]) {
            match never {}
        }
    }
    Err(DsError::InitExecFailed(std::path::PathBuf::from("/bin/sh")))
}

/// If `cmd` contains whitespace and was passed as a single argument, it is
/// wrapped with `/bin/sh -c`.
fn exec_command(cmd: &[String]) -> Result<std::convert::Infallible> {
    let joined = cmd.join(" ");
    let sh = CString::new("/bin/sh").unwrap();
    let args = if cmd.len() == 1 && cmd[0].contains(char::is_whitespace) {
        vec![sh.clone(), CString::new("-c").unwrap(), CString::new(cmd[0].as_str()).unwrap()]
    } else {
        vec![sh.clone(), CString::new("-c").unwrap(), CString::new(joined).unwrap()]
    };
    execv(&sh, &args).map_err(DsError::Errno)
}

/// Sends the PTY master fd as `SCM_RIGHTS` ancillary data, treating the
/// send as a single atomic handoff — the fd is only this process's to keep
/// if the send fails.
fn send_master_fd(sock: RawFd, master: RawFd) -> Result<()> {
    let iov = [IoVec::from_slice(b"m")];
    let fds = [master];
    let cmsg = ControlMessage::ScmRights(&fds);
    socket::sendmsg(sock, &iov, &[cmsg], MsgFlags::empty(), None).map_err(DsError::Errno)?;
    Ok(())
}

fn receive_master_fd(sock: RawFd) -> Result<RawFd> {
    let mut buf = [0u8; 1];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
    let iov = [IoVec::from_mut_slice(&mut buf)];
    let msg = socket::recvmsg(sock, &iov, Some(&mut cmsg_buf), MsgFlags::empty()).map_err(DsError::Errno)?;

    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                return Ok(fd);
            }
        }
    }
    Err(DsError::PtyAllocFailed)
}
