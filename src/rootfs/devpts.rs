//! `devpts` instance at `/dev/pts` (§4.3 step 17), mounted after
//! `pivot_root` so it lives in the guest's private mount namespace.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use crate::error::{DsError, Result};
use crate::fsutil::mkdir_p;
use crate::syscall::Syscall;
use crate::utils::PathBufExt;

const OPTION_FALLBACKS: &[&str] = &[
    "gid=5,newinstance,ptmxmode=0666,mode=0620",
    "newinstance,ptmxmode=0666,mode=0620",
    "gid=5,newinstance,mode=0620",
    "newinstance,ptmxmode=0666",
    "newinstance",
];

/// Tries each devpts mount option string in order until one succeeds, then
/// points `/dev/ptmx` at `/dev/pts/ptmx` — bind-mounted over the existing
/// node with hardware access, or over a freshly created empty file without.
///
/// `root` is `/` in production (called after `pivot_root`, so the guest's
/// `/dev` *is* the process root); tests pass a tmpdir so no real `/dev` is
/// ever touched.
pub fn setup(syscall: &dyn Syscall, root: &Path, hardware_access: bool) -> Result<()> {
    let pts = root.join_safely("dev/pts");
    mkdir_p(&pts)?;

    let mut last_errno = None;
    let mut mounted = false;
    for opts in OPTION_FALLBACKS {
        match syscall.mount(None, &pts, Some("devpts"), MsFlags::empty(), Some(opts)) {
            Ok(()) => {
                mounted = true;
                break;
            }
            Err(errno) => last_errno = Some(errno),
        }
    }
    if !mounted {
        return Err(DsError::MountFailed {
            target: pts,
            errno: last_errno.unwrap(),
        });
    }

    let ptmx: PathBuf = root.join_safely("dev/ptmx");
    let pts_ptmx: PathBuf = root.join_safely("dev/pts/ptmx");
    if hardware_access {
        syscall
            .mount(Some(&pts_ptmx), &ptmx, None, MsFlags::MS_BIND, None)
            .map_err(|errno| DsError::MountFailed { target: ptmx.clone(), errno })?;
    } else {
        let _ = std::fs::remove_file(&ptmx);
        std::fs::File::create(&ptmx)?;
        syscall
            .mount(Some(&pts_ptmx), &ptmx, None, MsFlags::MS_BIND, None)
            .map_err(|errno| DsError::MountFailed { target: ptmx.clone(), errno })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestSyscall;
    use tempfile::TempDir;

    #[test]
    fn first_option_succeeding_stops_the_fallback_chain() {
        let dir = TempDir::new().unwrap();
        let sc = TestSyscall::default();
        setup(&sc, dir.path(), false).unwrap();
        let calls = sc.calls();
        let devpts_mounts = calls
            .iter()
            .filter(|c| matches!(c, crate::syscall::test::Call::Mount(a) if a.fstype.as_deref() == Some("devpts")))
            .count();
        assert_eq!(devpts_mounts, 1);
    }
}
