//! Namespace entry for `enter`/`run`, grounded on the model runtime's own
//! `namespaces.rs` split between an unshare-side and a setns-side, adapted
//! to this runtime's fixed namespace set (mount, UTS, IPC, PID — no user or
//! network namespace, since the guest shares the host network stack).

use std::path::{Path, PathBuf};

use nix::fcntl::{self, OFlag};
use nix::sched::CloneFlags;
use nix::sys::stat::Mode;
use nix::unistd::{close, Pid};

use crate::error::{DsError, Result};
use crate::syscall::Syscall;

/// The namespace the container's init unshares at boot (§4.3 step 1).
pub fn container_clone_flags() -> CloneFlags {
    CloneFlags::CLONE_NEWNS
}

/// PID+UTS+IPC, unshared by the monitor (§4.6); the mount namespace is left
/// for the init child it forks to unshare on its own.
pub fn monitor_clone_flags() -> CloneFlags {
    CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC
}

const NS_NAMES: [&str; 4] = ["mnt", "uts", "ipc", "pid"];

/// Opens `/proc/<pid>/ns/{mnt,uts,ipc,pid}` — all four FDs up front, since
/// entering the mount namespace changes the view of `/proc` and later opens
/// would fail (§4.6 `enter` step 1).
pub fn open_namespace_fds(pid: Pid) -> Result<Vec<(CloneFlags, i32)>> {
    let mut fds = Vec::with_capacity(NS_NAMES.len());
    for name in NS_NAMES {
        let path: PathBuf = format!("/proc/{}/ns/{}", pid.as_raw(), name).into();
        let flag = ns_clone_flag(name);
        let fd = fcntl::open(&path, OFlag::empty(), Mode::empty()).map_err(|errno| {
            for (_, fd) in &fds {
                let _ = close(*fd);
            }
            DsError::Errno(errno)
        })?;
        fds.push((flag, fd));
    }
    Ok(fds)
}

fn ns_clone_flag(name: &str) -> CloneFlags {
    match name {
        "mnt" => CloneFlags::CLONE_NEWNS,
        "uts" => CloneFlags::CLONE_NEWUTS,
        "ipc" => CloneFlags::CLONE_NEWIPC,
        "pid" => CloneFlags::CLONE_NEWPID,
        _ => unreachable!(),
    }
}

/// Enters every namespace FD opened by [`open_namespace_fds`], closing each
/// as it's consumed.
pub fn enter_namespaces(syscall: &dyn Syscall, fds: &[(CloneFlags, i32)]) -> Result<()> {
    for &(flag, fd) in fds {
        syscall.setns(fd, flag).map_err(DsError::Errno)?;
        close(fd).map_err(DsError::Errno)?;
    }
    Ok(())
}

/// Unshares the namespace set for a fresh container boot, minus any flags in
/// `without` (used by the monitor, which unshares PID+UTS+IPC but leaves the
/// mount namespace unshare to the init child it forks).
pub fn unshare_for_boot(syscall: &dyn Syscall, flags: CloneFlags, without: CloneFlags) -> Result<()> {
    syscall.unshare(flags & !without).map_err(DsError::Errno)
}

pub fn namespace_path(pid: Pid, ns: &str) -> PathBuf {
    Path::new("/proc").join(pid.as_raw().to_string()).join("ns").join(ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestSyscall;

    #[test]
    fn unshare_masks_out_excluded_flags() {
        let sc = TestSyscall::default();
        unshare_for_boot(&sc, monitor_clone_flags(), CloneFlags::CLONE_NEWPID).unwrap();
        let calls = sc.calls();
        match &calls[0] {
            crate::syscall::test::Call::Unshare(flags) => {
                assert!(!flags.contains(CloneFlags::CLONE_NEWPID));
                assert!(flags.contains(CloneFlags::CLONE_NEWUTS));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }
}
