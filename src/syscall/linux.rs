//! Production [`super::Syscall`] implementation, thin wrappers over `nix`.

use std::any::Any;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::stat::{mknod, SFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, pivot_root, sethostname};

use super::Syscall;

#[derive(Clone, Default)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
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
        mount(source, target, fstype, flags, data)
    }

    fn umount2(&self, target: &Path, lazy: bool) -> Result<(), Errno> {
        let flags = if lazy { MntFlags::MNT_DETACH } else { MntFlags::empty() };
        umount2(target, flags)
    }

    fn mknod(&self, path: &Path, kind: SFlag, perm: u32, dev: u64) -> Result<(), Errno> {
        mknod(path, kind, Mode::from_bits_truncate(perm), dev)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno> {
        pivot_root(new_root, put_old)
    }

    fn chdir(&self, path: &Path) -> Result<(), Errno> {
        chdir(path)
    }

    fn unshare(&self, flags: CloneFlags) -> Result<(), Errno> {
        unshare(flags)
    }

    fn setns(&self, fd: i32, nstype: CloneFlags) -> Result<(), Errno> {
        setns(fd, nstype)
    }

    fn sethostname(&self, name: &str) -> Result<(), Errno> {
        sethostname(name)
    }
}
