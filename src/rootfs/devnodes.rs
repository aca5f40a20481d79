//! `/dev` construction (§4.3 step 8), grounded on the model runtime's
//! `rootfs.rs` `create_devices`/`default_devices`, generalized to this
//! runtime's fixed device set and its private-vs-shared-devtmpfs split.

use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::mount::MsFlags;
use nix::sys::stat::{Mode, SFlag};
use nix::unistd::close;

use crate::error::{DsError, Result};
use crate::fsutil::{mkdir_p, mknod_idempotent};
use crate::syscall::Syscall;

struct DevNode {
    name: &'static str,
    kind: SFlag,
    major: u64,
    minor: u64,
}

const CHAR_NODES: &[DevNode] = &[
    DevNode { name: "null", kind: SFlag::S_IFCHR, major: 1, minor: 3 },
    DevNode { name: "zero", kind: SFlag::S_IFCHR, major: 1, minor: 5 },
    DevNode { name: "full", kind: SFlag::S_IFCHR, major: 1, minor: 7 },
    DevNode { name: "random", kind: SFlag::S_IFCHR, major: 1, minor: 8 },
    DevNode { name: "urandom", kind: SFlag::S_IFCHR, major: 1, minor: 9 },
    DevNode { name: "tty", kind: SFlag::S_IFCHR, major: 5, minor: 0 },
    DevNode { name: "console", kind: SFlag::S_IFCHR, major: 5, minor: 1 },
    DevNode { name: "ptmx", kind: SFlag::S_IFCHR, major: 5, minor: 2 },
];

const EMPTY_TARGETS: &[&str] = &[
    "net/tun", "fuse", "tty1", "tty2", "tty3", "tty4", "tty5", "tty6",
];

/// Mounts a private `/dev` tmpfs and populates it with the fixed device set.
pub fn setup_private_dev(syscall: &dyn Syscall, rootfs: &Path) -> Result<()> {
    let dev = rootfs.join("dev");
    mkdir_p(&dev)?;
    syscall
        .mount(
            None,
            &dev,
            Some("tmpfs"),
            MsFlags::empty(),
            Some("size=8M,mode=755,nosuid,noexec"),
        )
        .map_err(|errno| DsError::MountFailed { target: dev.clone(), errno })?;

    for node in CHAR_NODES {
        mknod_idempotent(syscall, &dev.join(node.name), node.kind, 0o666, node.major, node.minor)?;
    }
    for target in EMPTY_TARGETS {
        create_empty_target(&dev, target)?;
    }
    Ok(())
}

/// Mounts the kernel's shared `devtmpfs`, then resolves the host/guest
/// conflict by unmounting-lazy and unlinking the conflicting nodes and
/// immediately recreating them with matching major:minor, so the guest owns
/// its own `console`/`ptmx` mount targets without losing real hardware
/// device access underneath.
pub fn setup_shared_dev(syscall: &dyn Syscall, rootfs: &Path) -> Result<()> {
    let dev = rootfs.join("dev");
    mkdir_p(&dev)?;
    syscall
        .mount(None, &dev, Some("devtmpfs"), MsFlags::empty(), None)
        .map_err(|errno| DsError::MountFailed { target: dev.clone(), errno })?;

    for node in CHAR_NODES {
        let path = dev.join(node.name);
        let _ = syscall.umount2(&path, true);
        let _ = std::fs::remove_file(&path);
        mknod_idempotent(syscall, &path, node.kind, 0o666, node.major, node.minor)?;
    }
    for target in EMPTY_TARGETS {
        create_empty_target(&dev, target)?;
    }
    Ok(())
}

fn create_empty_target(dev: &Path, relative: &str) -> Result<()> {
    let path = dev.join(relative);
    if relative == "net/tun" {
        mkdir_p(path.parent().unwrap())?;
    }
    let fd = open(&path, OFlag::O_CREAT | OFlag::O_WRONLY, Mode::from_bits_truncate(0o666))
        .map_err(DsError::Errno)?;
    close(fd).map_err(DsError::Errno)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::{Call, TestSyscall};
    use tempfile::TempDir;

    #[test]
    fn private_dev_mounts_tmpfs_then_mknods_fixed_set() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dev/net")).unwrap();
        let sc = TestSyscall::default();
        setup_private_dev(&sc, dir.path()).unwrap();
        let calls = sc.calls();
        assert!(matches!(&calls[0], Call::Mount(args) if args.fstype.as_deref() == Some("tmpfs")));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Mknod(_))).count(),
            CHAR_NODES.len()
        );
    }
}
