//! `/proc` and `/sys` construction (§4.3 steps 9-10).

use std::path::Path;

use nix::mount::MsFlags;

use crate::error::{DsError, Result};
use crate::fsutil::mkdir_p;
use crate::syscall::Syscall;

pub fn mount_proc(syscall: &dyn Syscall, rootfs: &Path) -> Result<()> {
    let proc = rootfs.join("proc");
    mkdir_p(&proc)?;
    syscall
        .mount(
            None,
            &proc,
            Some("proc"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            None,
        )
        .map_err(|errno| DsError::MountFailed { target: proc, errno })
}

/// Without hardware access: a plain read-write `sysfs`, plus a second
/// instance at `sys/devices/virtual/net` (networking tools expect it), then
/// remount the outer mount read-only.
///
/// With hardware access: read-write `sysfs`, then a recursive self-bind of
/// every direct child of `sys` ("pin" each subtree as its own read-write
/// mount unaffected by the next step), then remount the outer mount
/// read-only. Modern init (systemd >= 258) uses read-only `/sys` to detect
/// containerhood; without the pin, init would lose real device access.
/// Finally binds `/dev/null` over `sys/class/tty/console/active` to mask
/// host TTY discovery.
pub fn mount_sys(syscall: &dyn Syscall, rootfs: &Path, hardware_access: bool) -> Result<()> {
    let sys = rootfs.join("sys");
    mkdir_p(&sys)?;
    syscall
        .mount(None, &sys, Some("sysfs"), MsFlags::empty(), None)
        .map_err(|errno| DsError::MountFailed { target: sys.clone(), errno })?;

    if hardware_access {
        pin_sys_subtrees(syscall, &sys)?;
        remount_readonly(syscall, &sys)?;
        mask_console_active(syscall, &sys)?;
    } else {
        let virtual_net = sys.join("devices/virtual/net");
        mkdir_p(&virtual_net)?;
        syscall
            .mount(None, &virtual_net, Some("sysfs"), MsFlags::empty(), None)
            .map_err(|errno| DsError::MountFailed { target: virtual_net, errno })?;
        remount_readonly(syscall, &sys)?;
    }
    Ok(())
}

fn pin_sys_subtrees(syscall: &dyn Syscall, sys: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(sys) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let _ = syscall.mount(Some(&path), &path, None, MsFlags::MS_BIND | MsFlags::MS_REC, None);
    }
    Ok(())
}

fn remount_readonly(syscall: &dyn Syscall, sys: &Path) -> Result<()> {
    syscall
        .mount(
            None,
            sys,
            None,
            MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            None,
        )
        .map_err(|errno| DsError::MountFailed { target: sys.to_path_buf(), errno })
}

fn mask_console_active(syscall: &dyn Syscall, sys: &Path) -> Result<()> {
    let target = sys.join("class/tty/console/active");
    if !target.exists() {
        return Ok(());
    }
    let _ = syscall.mount(Some(Path::new("/dev/null")), &target, None, MsFlags::MS_BIND, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::{Call, TestSyscall};
    use tempfile::TempDir;

    #[test]
    fn no_hw_access_mounts_virtual_net_then_remounts_readonly() {
        let dir = TempDir::new().unwrap();
        let sc = TestSyscall::default();
        mount_sys(&sc, dir.path(), false).unwrap();
        let calls = sc.calls();
        assert!(matches!(&calls[0], Call::Mount(a) if a.fstype.as_deref() == Some("sysfs")));
        assert!(calls
            .iter()
            .any(|c| matches!(c, Call::Mount(a) if a.target.ends_with("devices/virtual/net"))));
        let last = calls.last().unwrap();
        assert!(matches!(last, Call::Mount(a) if a.flags.contains(MsFlags::MS_RDONLY)));
    }
}
