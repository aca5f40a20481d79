//! PID 1 boot sequence (C5): the ordered list in §4.3 is the entire
//! sequence; this module is the glue that runs rootfs assembly, network
//! wiring, and devpts/pivot in the documented order and then execs the
//! guest init. Runs inside the child that will become PID 1.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use nix::unistd::{dup2, setsid};

use crate::config::ContainerConfig;
use crate::error::{DsError, Result};
use crate::fsutil::write_all;
use crate::network;
use crate::rootfs::{self, AssembledRootfs};
use crate::syscall::Syscall;
use crate::tty::Pty;

pub struct BootInputs<'a> {
    pub cfg: &'a ContainerConfig,
    pub rootfs: &'a Path,
    pub workspace_volatile_dir: &'a Path,
    pub uuid: &'a str,
    pub console: &'a Pty,
    pub ttys: &'a [Pty],
    pub hostname: &'a str,
}

/// Runs §4.3 steps 1-23 to completion. Never returns on success — the last
/// step `exec`s the guest init (or `/bin/sh` as a fallback) and replaces
/// this process image entirely; returns only on failure.
pub fn run(syscall: &dyn Syscall, inputs: &BootInputs) -> Result<std::convert::Infallible> {
    let tty_slaves: Vec<PathBuf> = inputs.ttys.iter().map(|p| p.slave_path.clone()).collect();

    let assembled = rootfs::assemble_pre_pivot(
        syscall,
        inputs.cfg,
        inputs.rootfs,
        inputs.workspace_volatile_dir,
        inputs.uuid,
        &inputs.console.slave_path,
        &tty_slaves,
    )?;

    let AssembledRootfs { active_root, .. } = assembled;

    // 16. Pivot into the new root.
    rootfs::pivot(syscall, &active_root)?;

    // 17. Private devpts instance; now addressed as "/" since pivot just
    // completed.
    crate::rootfs::devpts::setup(syscall, Path::new("/"), inputs.cfg.hardware_access)?;

    // 18. Guest networking files.
    let root = Path::new("/");
    network::write_hostname(root, inputs.hostname)?;
    network::write_hosts(root, inputs.hostname)?;
    network::write_resolv_conf(root, &inputs.cfg.dns_servers)?;
    network::append_android_groups(root)?;

    // 19. Drop the old root.
    rootfs::cleanup_old_root(syscall)?;

    // 20. Container marker init checks for.
    std::fs::create_dir_all("/run/systemd")?;
    write_all("/run/systemd/container", "droidspaces")?;

    // 21. Reset the environment.
    let tty_slave_strings: Vec<String> = tty_slaves.iter().map(|p| p.display().to_string()).collect();
    reset_environment(&tty_slave_strings);

    // 22. Redirect stdio onto the console and take it as controlling tty.
    redirect_stdio(inputs.console)?;

    // 23. Exec init, falling back to a shell.
    exec_init()
}

fn reset_environment(tty_slaves: &[String]) {
    for (key, _) in std::env::vars() {
        std::env::remove_var(key);
    }
    for (key, value) in network::init_environment(tty_slaves) {
        std::env::set_var(key, value);
    }
}

fn redirect_stdio(console: &Pty) -> Result<()> {
    setsid().map_err(DsError::Errno)?;
    crate::tty::set_controlling(console.slave)?;
    dup2(console.slave, 0).map_err(DsError::Errno)?;
    dup2(console.slave, 1).map_err(DsError::Errno)?;
    dup2(console.slave, 2).map_err(DsError::Errno)?;
    Ok(())
}

fn exec_init() -> Result<std::convert::Infallible> {
    match exec_path(Path::new("/sbin/init"), &[]) {
        Ok(never) => Ok(never),
        Err(_) => match exec_path(Path::new("/bin/sh"), &[]) {
            Ok(never) => Ok(never),
            Err(_) => Err(DsError::InitExecFailed(PathBuf::from("/sbin/init"))),
        },
    }
}

fn exec_path(path: &Path, extra_args: &[&str]) -> std::result::Result<std::convert::Infallible, nix::errno::Errno> {
    let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned()).unwrap();
    let mut args = vec![c_path.clone()];
    args.extend(extra_args.iter().map(|a| CString::new(*a).unwrap()));
    nix::unistd::execv(&c_path, &args)
}
