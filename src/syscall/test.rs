//! Recording [`super::Syscall`] double used by unit tests to assert mount
//! and namespace call *ordering* without needing root or a real namespace,
//! mirroring the model runtime's `TestHelperSyscall`.

use std::any::Any;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::stat::SFlag;

use super::Syscall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountArgs {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount(MountArgs),
    Umount2(PathBuf, bool),
    Mknod(PathBuf),
    PivotRoot(PathBuf, PathBuf),
    Chdir(PathBuf),
    Unshare(CloneFlags),
    Setns(i32, CloneFlags),
    Sethostname(String),
}

#[derive(Default)]
pub struct TestSyscall {
    calls: RefCell<Vec<Call>>,
}

impl TestSyscall {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

impl Syscall for TestSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        self.calls.borrow_mut().push(Call::Mount(MountArgs {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            flags,
            data: data.map(str::to_string),
        }));
        Ok(())
    }

    fn umount2(&self, target: &Path, lazy: bool) -> Result<(), Errno> {
        self.calls
            .borrow_mut()
            .push(Call::Umount2(target.to_path_buf(), lazy));
        Ok(())
    }

    fn mknod(&self, path: &Path, _kind: SFlag, _perm: u32, _dev: u64) -> Result<(), Errno> {
        self.calls.borrow_mut().push(Call::Mknod(path.to_path_buf()));
        Ok(())
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno> {
        self.calls
            .borrow_mut()
            .push(Call::PivotRoot(new_root.to_path_buf(), put_old.to_path_buf()));
        Ok(())
    }

    fn chdir(&self, path: &Path) -> Result<(), Errno> {
        self.calls.borrow_mut().push(Call::Chdir(path.to_path_buf()));
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<(), Errno> {
        self.calls.borrow_mut().push(Call::Unshare(flags));
        Ok(())
    }

    fn setns(&self, fd: i32, nstype: CloneFlags) -> Result<(), Errno> {
        self.calls.borrow_mut().push(Call::Setns(fd, nstype));
        Ok(())
    }

    fn sethostname(&self, name: &str) -> Result<(), Errno> {
        self.calls
            .borrow_mut()
            .push(Call::Sethostname(name.to_string()));
        Ok(())
    }
}
