//! The monitor process (§4.6): `setsid`, renames itself `[ds-monitor]`,
//! unshares PID+UTS+IPC (the mount namespace unshare is left to the init
//! child, so the monitor keeps a host-visible mount table for cleanup),
//! forks the init child, reports its PID over the sync channel, then blocks
//! on `waitpid` until the container exits. Post-exit, whether via an
//! explicit `stop` or init crashing on its own, the monitor is the one
//! process guaranteed to still be alive to restore host state.

use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, setsid, ForkResult, Pid};

use crate::error::{DsError, Result};
use crate::hostprep::{self, HostState};
use crate::namespaces::monitor_clone_flags;
use crate::process::channel::Channel;
use crate::syscall::Syscall;
use crate::workspace::Workspace;

const MONITOR_PROCESS_NAME: &str = "ds-monitor";

/// How long the monitor waits, after init exits, for an explicit `stop`
/// invocation to have already removed the pidfile before concluding this
/// was an unsolicited exit (crash, guest `poweroff`, systemd halt) and
/// running the cleanup itself.
const STOP_HANDOFF_GRACE: Duration = Duration::from_secs(3);

/// Context the monitor needs to restore host state if init exits without an
/// explicit `stop` — SELinux/phantom-process/firmware/image-mount state is
/// otherwise only known to the CLI process that ran `start`, which has long
/// since exited by the time a backgrounded container crashes.
pub struct MonitorCleanup {
    pub workspace: Workspace,
    pub name: String,
    pub host_state: HostState,
}

impl MonitorCleanup {
    /// Runs the same restore sequence `stop` runs, unless an explicit `stop`
    /// already got there first (observed as the pidfile having disappeared
    /// within the handoff grace period).
    fn run_if_unsolicited(self) {
        let pidfile = self.workspace.pidfile(&self.name);
        let deadline = Instant::now() + STOP_HANDOFF_GRACE;
        while Instant::now() < deadline {
            if !pidfile.exists() {
                return;
            }
            sleep(Duration::from_millis(100));
        }
        if !pidfile.exists() {
            return;
        }

        log::warn!("monitor: {:?} exited without an explicit stop, restoring host state", self.name);
        hostprep::teardown(&self.host_state, false);

        let sidecar = self.workspace.hostprep_sidecar(&self.name);
        let _ = std::fs::remove_file(&sidecar);
        let mount_sidecar = self.workspace.mount_sidecar(&self.name);
        let _ = std::fs::remove_file(&mount_sidecar);
        let volatile_dir = self.workspace.volatile_dir(&self.name);
        if volatile_dir.exists() {
            let _ = std::fs::remove_dir_all(&volatile_dir);
        }
        let _ = std::fs::remove_file(&pidfile);
    }
}

/// Sets this process's `comm` name, shown by `ps`/`top` as `[ds-monitor]`
/// once it has no controlling terminal and is a kernel thread's sibling in
/// spirit (the brackets are `ps`'s convention for a renamed, detached
/// process, not something the kernel adds).
fn set_process_name(name: &str) {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    unsafe {
        libc::prctl(libc::PR_SET_NAME, buf.as_ptr() as libc::c_ulong, 0, 0, 0);
    }
}

/// Runs as the monitor. `spawn_init` is called in the freshly unshared
/// namespace and must fork the actual PID-1 child, returning its PID to the
/// caller (the monitor) immediately after forking — it must not block.
pub fn run<F>(syscall: &dyn Syscall, channel: Channel, spawn_init: F, cleanup: MonitorCleanup) -> Result<()>
where
    F: FnOnce() -> Result<Pid>,
{
    setsid().map_err(DsError::Errno)?;
    set_process_name(MONITOR_PROCESS_NAME);

    crate::namespaces::unshare_for_boot(syscall, monitor_clone_flags(), nix::sched::CloneFlags::empty())?;

    let init_pid = match spawn_init() {
        Ok(pid) => pid,
        Err(e) => {
            channel.send_init_failed(1)?;
            return Err(e);
        }
    };
    channel.send_init_ready(init_pid)?;

    loop {
        match waitpid(init_pid, None) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) if pid == init_pid => break,
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(DsError::Errno(e)),
        }
    }
    cleanup.run_if_unsolicited();
    Ok(())
}

/// Forks the init child under the caller's already-unshared namespaces. The
/// parent branch (the monitor) returns the child's PID without blocking; the
/// child branch never returns — `run_child` takes over the process image.
pub fn fork_init<F: FnOnce() -> !>(run_child: F) -> Result<Pid> {
    match unsafe { fork() }.map_err(DsError::Errno)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => run_child(),
    }
}
