//! Mount assembly (C3) — the hardest component: builds, in an exact order,
//! the guest's filesystem view while still working in the host's view of
//! paths (relative to the active rootfs as current directory). Grounded on
//! the model runtime's `rootfs.rs`/`rootfs/mount.rs` structure, generalized
//! from OCI mount-spec iteration to this runtime's fixed, spec-driven
//! sequence, and on `other_examples`'s `setup_container_mounts`/
//! `pivot_to_container` for the bind-mount soft-fail and pivot idioms.

pub mod cgroup;
pub mod devnodes;
pub mod devpts;
pub mod overlay;
pub mod sys_proc;

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use crate::config::{BindMount, ContainerConfig};
use crate::error::{DsError, Result};
use crate::fsutil::{mkdir_p, write_all};
use crate::syscall::Syscall;
use crate::utils::PathBufExt;

pub struct AssembledRootfs {
    /// The directory that is `chdir`'d into and that will become `/` after
    /// `pivot_root` — either the original rootfs, or the volatile overlay's
    /// `merged/` directory if the container was started with `--volatile`.
    pub active_root: PathBuf,
    pub overlay: Option<overlay::OverlayPaths>,
}

/// Steps 1-15 of §4.3: everything that happens before `pivot_root`, still
/// addressed relative to the host's view of paths.
pub fn assemble_pre_pivot(
    syscall: &dyn Syscall,
    cfg: &ContainerConfig,
    rootfs: &Path,
    workspace_volatile_dir: &Path,
    uuid: &str,
    console_slave_path: &Path,
    tty_slave_paths: &[PathBuf],
) -> Result<AssembledRootfs> {
    // 1. Unshare the mount namespace.
    syscall
        .unshare(crate::namespaces::container_clone_flags())
        .map_err(DsError::Errno)?;

    // 2. Make the root mount tree recursively private so nothing performed
    // here propagates back to the host, and vice versa.
    syscall
        .mount(None, Path::new("/"), None, MsFlags::MS_REC | MsFlags::MS_PRIVATE, None)
        .map_err(|errno| DsError::MountFailed { target: PathBuf::from("/"), errno })?;

    // 3. Volatile overlay, if requested.
    let overlay_result = if cfg.volatile {
        let on_android = Path::new("/system/build.prop").exists();
        Some(overlay::setup_volatile(syscall, workspace_volatile_dir, rootfs, on_android)?)
    } else {
        None
    };
    let active_root = overlay_result
        .as_ref()
        .map(|o| o.merged.clone())
        .unwrap_or_else(|| rootfs.to_path_buf());

    // 4. pivot_root demands the new root is itself a mount point: bind it
    // onto itself, recursively.
    syscall
        .mount(Some(&active_root), &active_root, None, MsFlags::MS_BIND | MsFlags::MS_REC, None)
        .map_err(|errno| DsError::MountFailed { target: active_root.clone(), errno })?;

    // 5. Custom bind mounts, soft-fail on missing source/target or mount
    // syscall error.
    apply_bind_mounts(syscall, &active_root, &cfg.bind_mounts);

    // 6. chdir into the active rootfs so the remaining steps can address
    // guest paths as relative paths, exactly as the eventual pivot expects.
    syscall.chdir(&active_root).map_err(DsError::Errno)?;

    // 7. The pivot_root target directory.
    mkdir_p(active_root.join(".old_root"))?;

    // 8. /dev.
    if cfg.hardware_access {
        devnodes::setup_shared_dev(syscall, &active_root)?;
    } else {
        devnodes::setup_private_dev(syscall, &active_root)?;
    }

    // 9. /proc.
    sys_proc::mount_proc(syscall, &active_root)?;

    // 10. /sys.
    sys_proc::mount_sys(syscall, &active_root, cfg.hardware_access)?;

    // 11. /run tmpfs.
    let run = active_root.join("run");
    mkdir_p(&run)?;
    syscall
        .mount(None, &run, Some("tmpfs"), MsFlags::MS_NOSUID | MsFlags::MS_NODEV, Some("mode=755"))
        .map_err(|errno| DsError::MountFailed { target: run.clone(), errno })?;

    // 12. Console and TTY PTY binds — must precede pivot_root, since the
    // host PTY devices become unreachable afterward.
    bind_console_and_ttys(syscall, &active_root, console_slave_path, tty_slave_paths)?;

    // 13. Boot markers.
    write_all(run.join(uuid), "init")?;
    write_all(run.join("droidspaces"), env!("CARGO_PKG_VERSION"))?;

    // 14. Cgroup tree.
    cgroup::setup_cgroup_tree(syscall, &active_root)?;

    // 15. Android storage bind.
    if cfg.bind_android_storage {
        let host_storage = Path::new("/storage/emulated/0");
        let guest_storage = active_root.join_safely("storage/emulated/0");
        if host_storage.is_dir() {
            mkdir_p(&guest_storage)?;
            let _ = syscall.mount(Some(host_storage), &guest_storage, None, MsFlags::MS_BIND | MsFlags::MS_REC, None);
        }
    }

    Ok(AssembledRootfs { active_root, overlay: overlay_result })
}

fn apply_bind_mounts(syscall: &dyn Syscall, active_root: &Path, binds: &[BindMount]) {
    for bind in binds {
        if !bind.host.exists() {
            log::warn!("bind-mount source {:?} does not exist, skipping", bind.host);
            continue;
        }
        let target = active_root.join_safely(&bind.container);
        if mkdir_p(&target).is_err() {
            log::warn!("could not create bind-mount target {:?}, skipping", target);
            continue;
        }
        if let Err(errno) = syscall.mount(Some(&bind.host), &target, None, MsFlags::MS_BIND | MsFlags::MS_REC, None) {
            log::warn!("bind-mount {:?} -> {:?} failed: {}", bind.host, target, errno);
        }
    }
}

fn bind_console_and_ttys(
    syscall: &dyn Syscall,
    active_root: &Path,
    console_slave_path: &Path,
    tty_slave_paths: &[PathBuf],
) -> Result<()> {
    let console_target = active_root.join("dev/console");
    bind_one(syscall, console_slave_path, &console_target)?;

    for (i, slave) in tty_slave_paths.iter().enumerate() {
        let target = active_root.join(format!("dev/tty{}", i + 1));
        bind_one(syscall, slave, &target)?;
    }
    Ok(())
}

fn bind_one(syscall: &dyn Syscall, slave: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        std::fs::File::create(target)?;
    }
    syscall
        .mount(Some(slave), target, None, MsFlags::MS_BIND, None)
        .map_err(|errno| DsError::MountFailed { target: target.to_path_buf(), errno })
}

/// Step 16: swap the current root mount with `active_root`, then `chdir`
/// into the new `/`. The old root is left mounted at `.old_root` until the
/// post-pivot cleanup step unmounts and removes it.
pub fn pivot(syscall: &dyn Syscall, active_root: &Path) -> Result<()> {
    syscall
        .pivot_root(active_root, Path::new(".old_root"))
        .map_err(|errno| DsError::PivotFailed { errno })?;
    syscall.chdir(Path::new("/")).map_err(DsError::Errno)?;
    Ok(())
}

/// Step 19: `umount -l /.old_root`, `rmdir /.old_root`.
pub fn cleanup_old_root(syscall: &dyn Syscall) -> Result<()> {
    let old_root = Path::new("/.old_root");
    syscall
        .umount2(old_root, true)
        .map_err(|errno| DsError::MountFailed { target: old_root.to_path_buf(), errno })?;
    std::fs::remove_dir(old_root).map_err(DsError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootfsSource;
    use crate::syscall::test::{Call, TestSyscall};
    use tempfile::TempDir;

    fn base_config() -> ContainerConfig {
        ContainerConfig {
            rootfs_source: RootfsSource::Directory(PathBuf::new()),
            name: Some("t1".to_string()),
            hostname: None,
            foreground: false,
            hardware_access: false,
            enable_ipv6: false,
            bind_android_storage: false,
            selinux_permissive: false,
            volatile: false,
            disable_seccomp: false,
            bind_mounts: Vec::new(),
            dns_servers: Vec::new(),
            pidfile_override: None,
        }
    }

    #[test]
    fn assembly_order_matches_the_documented_sequence() {
        let rootfs = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let console = TempDir::new().unwrap().path().join("console-slave");
        std::fs::write(&console, "").unwrap();

        let sc = TestSyscall::default();
        let cfg = base_config();
        let result = assemble_pre_pivot(
            &sc,
            &cfg,
            rootfs.path(),
            workspace.path(),
            "deadbeefdeadbeefdeadbeefdeadbeef",
            &console,
            &[],
        );
        assert!(result.is_ok(), "{:?}", result.err());

        let calls = sc.calls();
        assert!(matches!(&calls[0], Call::Unshare(_)));
        assert!(matches!(&calls[1], Call::Mount(a) if a.target == Path::new("/")));
    }

    #[test]
    fn missing_bind_mount_source_is_soft_failed() {
        let rootfs = TempDir::new().unwrap();
        let sc = TestSyscall::default();
        let mut cfg = base_config();
        cfg.bind_mounts.push(BindMount {
            host: PathBuf::from("/does/not/exist"),
            container: PathBuf::from("/mnt/x"),
        });
        apply_bind_mounts(&sc, rootfs.path(), &cfg.bind_mounts);
        assert!(sc.calls().is_empty());
    }
}
