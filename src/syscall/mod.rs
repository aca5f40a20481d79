//! An interface trait so that the mount/namespace assembly code can be
//! exercised in unit tests without a real mount namespace or root, grounded
//! on the model runtime's own split between a `Syscall` trait, a
//! `LinuxSyscall` production implementation, and a recording test double.

pub mod linux;
pub mod test;

use std::any::Any;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::stat::SFlag;

pub trait Syscall {
    fn as_any(&self) -> &dyn Any;

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;

    fn umount2(&self, target: &Path, lazy: bool) -> Result<(), Errno>;

    fn mknod(&self, path: &Path, kind: SFlag, perm: u32, dev: u64) -> Result<(), Errno>;

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno>;

    fn chdir(&self, path: &Path) -> Result<(), Errno>;

    fn unshare(&self, flags: CloneFlags) -> Result<(), Errno>;

    fn setns(&self, fd: i32, nstype: CloneFlags) -> Result<(), Errno>;

    fn sethostname(&self, name: &str) -> Result<(), Errno>;
}

pub fn create_syscall() -> Box<dyn Syscall> {
    if cfg!(test) {
        Box::new(test::TestSyscall::default())
    } else {
        Box::new(linux::LinuxSyscall)
    }
}
