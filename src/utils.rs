//! Small path and process helpers shared across modules, grounded on the
//! model runtime's own `utils.rs` (`PathBufExt`, `TempDir` test fixture).

use std::path::{Path, PathBuf};

use nix::unistd::Pid;

pub trait PathBufExt {
    fn join_safely<P: AsRef<Path>>(&self, p: P) -> PathBuf;
}

impl PathBufExt for Path {
    /// Joins a path the way `pivot_root` targets need: an absolute `p` is
    /// treated as relative to `self` instead of replacing it outright, which
    /// is what plain [`Path::join`] would do.
    fn join_safely<P: AsRef<Path>>(&self, p: P) -> PathBuf {
        let p = p.as_ref();
        if p.is_absolute() {
            self.join(p.strip_prefix("/").unwrap_or(p))
        } else {
            self.join(p)
        }
    }
}

/// True if `pid` names a process currently alive (`kill(pid, 0)`).
pub fn pid_alive(pid: Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

#[cfg(test)]
pub mod test_fixture {
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Thin wrapper bundling a `TempDir` with convenient path joins, mirroring
    /// the model runtime's own test fixture of the same shape.
    pub struct TestDir {
        dir: TempDir,
    }

    impl TestDir {
        pub fn new() -> Self {
            TestDir {
                dir: TempDir::new().expect("failed to create tempdir"),
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        pub fn join(&self, p: &str) -> PathBuf {
            self.dir.path().join(p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_safely_treats_absolute_as_relative() {
        let base = Path::new("/tmp/root");
        assert_eq!(base.join_safely("/etc/hosts"), PathBuf::from("/tmp/root/etc/hosts"));
        assert_eq!(base.join_safely("etc/hosts"), PathBuf::from("/tmp/root/etc/hosts"));
    }
}
