//! Top-level command dispatch (C6/C9): wires host prep (C8), naming/pidfile
//! (C7), PTY allocation (C2), and the fork topology (`process`) into the
//! eleven CLI commands of §4 and §6, grounded on the model runtime's
//! top-level `commands/` dispatch shape.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::Pid;

use crate::config::{ContainerConfig, RootfsSource};
use crate::error::{DsError, Result};
use crate::hostprep::{self, HostState};
use crate::naming;
use crate::network;
use crate::process::{self, StartInputs};
use crate::signal::escalate_stop;
use crate::tty::allocate_pty;
use crate::workspace::Workspace;

const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_KILL_GRACE: Duration = Duration::from_secs(6);

pub struct Droidspaces {
    pub workspace: Workspace,
}

impl Droidspaces {
    pub fn new() -> Self {
        let workspace = Workspace::discover();
        Droidspaces { workspace }
    }

    fn rootfs_dir(&self, cfg: &ContainerConfig, name: &str) -> PathBuf {
        match &cfg.rootfs_source {
            RootfsSource::Directory(p) => p.clone(),
            RootfsSource::Image(_) => self.workspace.image_mount_point(name),
        }
    }

    /// §4.6 `start`: C9 → C8 (host pre) → C7 (name, pidfile) → C3 (image
    /// mount, inside C8) → C2 (PTY allocation) → fork #1 → ... → parent
    /// writes the pidfile and optionally enters the proxy loop.
    pub fn start(&self, cfg: ContainerConfig) -> Result<i32> {
        self.workspace.ensure_dirs()?;

        let rootfs_for_naming = match &cfg.rootfs_source {
            RootfsSource::Directory(p) => p.clone(),
            RootfsSource::Image(_) => PathBuf::new(),
        };
        let name = match &cfg.name {
            Some(n) => n.clone(),
            None => naming::auto_name(&rootfs_for_naming, &self.workspace)?,
        };

        if let Some(pid) = naming::read_pidfile(&self.workspace, &name)? {
            if naming::is_valid_container_pid(pid) {
                return Err(DsError::NameConflict(name));
            }
            naming::remove_pidfile(&self.workspace, &name)?;
        }

        let mut host_state = hostprep::setup(&cfg, &self.workspace, &name)?;
        let rootfs = self.rootfs_dir(&cfg, &name);
        if !rootfs.exists() {
            hostprep::teardown(&host_state, false);
            return Err(DsError::RootfsNotFound(rootfs));
        }
        hostprep::append_firmware_path(&mut host_state, &rootfs)?;

        network::host_pre_boot(&rootfs, &cfg.dns_servers, cfg.enable_ipv6)?;

        let uuid = naming::generate_uuid();
        let hostname = cfg.hostname.clone().unwrap_or_else(|| name.clone());

        let console = match allocate_pty() {
            Ok(p) => p,
            Err(e) => {
                hostprep::teardown(&host_state, false);
                return Err(e);
            }
        };
        let mut ttys = Vec::with_capacity(crate::config::TTY_COUNT);
        for _ in 0..crate::config::TTY_COUNT {
            ttys.push(allocate_pty().map_err(|e| {
                hostprep::teardown(&host_state, false);
                e
            })?);
        }

        let outcome = process::start(StartInputs {
            cfg: &cfg,
            name: &name,
            hostname: &hostname,
            rootfs: &rootfs,
            workspace: &self.workspace,
            uuid: &uuid,
            console,
            ttys,
            host_state: host_state.clone(),
        });

        match outcome {
            Ok(out) => {
                host_state.save(&self.workspace.hostprep_sidecar(&name))?;
                if !out.booted {
                    log::warn!("start: {:?} may still be booting", name);
                }
                Ok(0)
            }
            Err(e) => {
                hostprep::teardown(&host_state, false);
                naming::remove_pidfile(&self.workspace, &name)?;
                Err(e)
            }
        }
    }

    /// §4.6 `stop`, steps 1-6.
    pub fn stop(&self, name: &str, skip_unmount: bool) -> Result<i32> {
        let pid = naming::read_pidfile(&self.workspace, name)?.ok_or_else(|| DsError::NotRunning(name.to_string()))?;
        if !naming::is_valid_container_pid(pid) {
            naming::remove_pidfile(&self.workspace, name)?;
            return Err(DsError::NotRunning(name.to_string()));
        }

        escalate_stop(pid, STOP_GRACE, STOP_KILL_GRACE)?;

        let sidecar_path = self.workspace.hostprep_sidecar(name);
        let state = HostState::load(&sidecar_path)?;
        hostprep::teardown(&state, skip_unmount);
        let _ = std::fs::remove_file(&sidecar_path);

        let volatile_dir = self.workspace.volatile_dir(name);
        if volatile_dir.exists() {
            let _ = std::fs::remove_dir_all(&volatile_dir);
        }

        let sidecar = self.workspace.mount_sidecar(name);
        let _ = std::fs::remove_file(&sidecar);
        naming::remove_pidfile(&self.workspace, name)?;

        Ok(0)
    }

    /// `restart`: `stop(skip_unmount=true)` then `start`.
    pub fn restart(&self, cfg: ContainerConfig) -> Result<i32> {
        if let Some(name) = &cfg.name {
            let _ = self.stop(name, true);
        }
        self.start(cfg)
    }

    pub fn enter(&self, name: &str, user: Option<&str>) -> Result<i32> {
        let pid = self.resolve_running(name)?;
        let req = crate::process::enter::EnterRequest { pid, user, cmd: None };
        process::enter::run(&*crate::syscall::create_syscall(), &req)?;
        Ok(0)
    }

    pub fn run_cmd(&self, name: &str, cmd: &[String]) -> Result<i32> {
        let pid = self.resolve_running(name)?;
        let req = crate::process::enter::EnterRequest { pid, user: None, cmd: Some(cmd) };
        process::enter::run(&*crate::syscall::create_syscall(), &req)?;
        Ok(0)
    }

    fn resolve_running(&self, name: &str) -> Result<Pid> {
        let pid = naming::read_pidfile(&self.workspace, name)?.ok_or_else(|| DsError::NotRunning(name.to_string()))?;
        if !naming::is_valid_container_pid(pid) {
            return Err(DsError::NotRunning(name.to_string()));
        }
        Ok(pid)
    }

    /// `info`: auto-selects the sole running container if `name` is absent
    /// and exactly one is running.
    pub fn info(&self, name: Option<&str>) -> Result<String> {
        let resolved = match name {
            Some(n) => n.to_string(),
            None => {
                let running = naming::scan(&self.workspace)?;
                match running.as_slice() {
                    [only] => only.name.clone(),
                    [] => return Err(DsError::NotRunning("<none>".to_string())),
                    _ => {
                        return Err(DsError::InvalidArgs(
                            "multiple containers running; --name required".to_string(),
                        ))
                    }
                }
            }
        };

        let pid = self.resolve_running(&resolved)?;
        let root = PathBuf::from(format!("/proc/{}/root", pid.as_raw()));
        let selinux = crate::fsutil::read_trimmed(root.join("sys/fs/selinux/enforce")).unwrap_or_else(|_| "absent".to_string());
        let ipv6 = crate::fsutil::read_trimmed(root.join("proc/sys/net/ipv6/conf/all/disable_ipv6")).unwrap_or_else(|_| "absent".to_string());
        let os_release = crate::fsutil::read_trimmed(root.join("etc/os-release")).unwrap_or_default();

        Ok(format!(
            "name: {}\npid: {}\nselinux_enforce: {}\nipv6_disabled: {}\nos_release: {}\n",
            resolved, pid.as_raw(), selinux, ipv6, os_release
        ))
    }

    pub fn show(&self) -> Result<String> {
        naming::show(&self.workspace)
    }

    pub fn scan(&self) -> Result<Vec<naming::ContainerListing>> {
        naming::scan(&self.workspace)
    }

    pub fn pid(&self, name: &str) -> Result<Pid> {
        self.resolve_running(name)
    }

    pub fn status(&self, name: &str) -> Result<bool> {
        match naming::read_pidfile(&self.workspace, name)? {
            Some(pid) => Ok(naming::is_valid_container_pid(pid)),
            None => Ok(false),
        }
    }

    /// `check`: verifies the host kernel exposes every feature this runtime
    /// depends on, without starting anything.
    pub fn check(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        if !Path::new("/proc/self/ns/pid").exists() {
            missing.push("pid namespaces".to_string());
        }
        if !Path::new("/proc/self/ns/mnt").exists() {
            missing.push("mount namespaces".to_string());
        }
        if crate::fsutil::fs_magic("/sys/fs/cgroup").is_err() {
            missing.push("cgroup filesystem".to_string());
        }
        Ok(missing)
    }
}

impl Default for Droidspaces {
    fn default() -> Self {
        Self::new()
    }
}
