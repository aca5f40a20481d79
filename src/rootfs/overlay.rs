//! Volatile-mode overlay assembly (§4.3 step 3), grounded on
//! `other_examples`'s `try_mount_overlay`/`mount_overlay_with_fallback`
//! pattern (userxattr option tried first, falls back on failure) and on the
//! model runtime's general mount-helper style.

use std::fs;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::MsFlags;

use crate::error::{DsError, Result};
use crate::fsutil::{fs_magic, mkdir_p};
use crate::syscall::Syscall;

/// Magic number of f2fs, per `statfs(2)`; overlay lowerdirs on f2fs are
/// unsupported on many Android kernels.
const F2FS_MAGIC: i64 = 0xf2f52010u32 as i64;

pub struct OverlayPaths {
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
}

/// Builds the tmpfs-backed overlay workspace and mounts the overlay onto
/// `merged`, returning the paths so the caller can make `merged` the active
/// rootfs. Refuses with `OverlayLowerdirUnsupported` if the lowerdir sits on
/// f2fs, before any mount side effect.
pub fn setup_volatile(
    syscall: &dyn Syscall,
    workspace_volatile_dir: &Path,
    lowerdir: &Path,
    on_android: bool,
) -> Result<OverlayPaths> {
    probe_overlay_support()?;

    let magic = fs_magic(lowerdir)?;
    if magic == F2FS_MAGIC {
        return Err(DsError::OverlayLowerdirUnsupported { fs: "f2fs".to_string() });
    }

    let paths = OverlayPaths {
        upper: workspace_volatile_dir.join("upper"),
        work: workspace_volatile_dir.join("work"),
        merged: workspace_volatile_dir.join("merged"),
    };
    mkdir_p(&paths.upper)?;
    mkdir_p(&paths.work)?;
    mkdir_p(&paths.merged)?;

    let tmpfs_data = if on_android {
        Some("context=u:object_r:tmpfs:s0")
    } else {
        None
    };
    syscall
        .mount(None, workspace_volatile_dir, Some("tmpfs"), MsFlags::empty(), tmpfs_data)
        .map_err(|errno| DsError::MountFailed { target: workspace_volatile_dir.to_path_buf(), errno })?;

    mount_overlay_with_fallback(syscall, lowerdir, &paths)?;
    Ok(paths)
}

/// Checks `/proc/filesystems` for an `overlay` entry before attempting any
/// mount, so an unsupported kernel fails with a typed, diagnosable error
/// instead of a raw mount errno.
fn probe_overlay_support() -> Result<()> {
    let listing = fs::read_to_string("/proc/filesystems")?;
    let supported = listing
        .lines()
        .any(|line| line.split_whitespace().last() == Some("overlay"));
    if supported {
        Ok(())
    } else {
        Err(DsError::MissingKernelFeature("overlay".to_string()))
    }
}

fn overlay_data(lowerdir: &Path, paths: &OverlayPaths, userxattr: bool) -> String {
    let base = format!(
        "lowerdir={},upperdir={},workdir={}",
        lowerdir.display(),
        paths.upper.display(),
        paths.work.display()
    );
    if userxattr {
        format!("{},userxattr", base)
    } else {
        base
    }
}

fn mount_overlay_with_fallback(syscall: &dyn Syscall, lowerdir: &Path, paths: &OverlayPaths) -> Result<()> {
    let with_userxattr = overlay_data(lowerdir, paths, true);
    match syscall.mount(None, &paths.merged, Some("overlay"), MsFlags::empty(), Some(&with_userxattr)) {
        Ok(()) => return Ok(()),
        Err(Errno::EINVAL) => {}
        Err(errno) => return Err(DsError::MountFailed { target: paths.merged.clone(), errno }),
    }

    let without = overlay_data(lowerdir, paths, false);
    syscall
        .mount(None, &paths.merged, Some("overlay"), MsFlags::empty(), Some(&without))
        .map_err(|errno| DsError::MountFailed { target: paths.merged.clone(), errno })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestSyscall;
    use tempfile::TempDir;

    #[test]
    fn builds_overlay_dirs_and_mounts() {
        let workspace = TempDir::new().unwrap();
        let lower = TempDir::new().unwrap();
        let sc = TestSyscall::default();
        let paths = setup_volatile(&sc, workspace.path(), lower.path(), false).unwrap();
        assert!(paths.upper.exists());
        assert!(paths.work.exists());
        assert!(paths.merged.exists());
    }
}
