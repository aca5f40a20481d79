//! Lifecycle orchestrator (C6): fork topology, sync channel, namespace
//! entry, signal escalation — the parts of the model runtime's
//! `process::{parent, init, channel}` split this crate keeps, generalized
//! to the PID/UTS/IPC-only namespace set and the monitor/init two-fork
//! topology §4.6 describes.

pub mod channel;
pub mod enter;
pub mod monitor;

use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::unistd::{fork, ForkResult, Pid};

use crate::boot::{self, BootInputs};
use crate::config::ContainerConfig;
use crate::error::{DsError, Result};
use crate::hostprep::HostState;
use crate::naming::write_pidfile;
use crate::process::monitor::MonitorCleanup;
use crate::tty::{proxy_loop, Pty};
use crate::workspace::Workspace;

pub struct StartOutcome {
    pub init_pid: Pid,
    pub booted: bool,
}

pub struct StartInputs<'a> {
    pub cfg: &'a ContainerConfig,
    pub name: &'a str,
    pub hostname: &'a str,
    pub rootfs: &'a Path,
    pub workspace: &'a Workspace,
    pub uuid: &'a str,
    pub console: Pty,
    pub ttys: Vec<Pty>,
    /// Cloned, not referenced: the monitor fork needs its own owned copy to
    /// restore host state if init exits without an explicit `stop` ever
    /// having run (the CLI process that called `start` may be long gone).
    pub host_state: HostState,
}

/// **Fork topology:** `parent -- fork --> monitor -- fork --> init`. The
/// parent observes `init_pid` only after the monitor has completed its
/// fork; the monitor observes init's exit only after init's final exit.
/// No lock primitives are used — ordering is established entirely by pipe
/// writes and process-exit events.
pub fn start(inputs: StartInputs) -> Result<StartOutcome> {
    let mut channel = channel::Channel::new()?;

    match unsafe { fork() }.map_err(DsError::Errno)? {
        ForkResult::Parent { child: _monitor_pid } => {
            channel.close_write()?;
            let init_pid = match channel.wait_for_init()? {
                Ok(pid) => pid,
                Err(code) => return Err(DsError::Timeout(format!("init failed to boot, exit {}", code))),
            };

            write_pidfile(inputs.workspace, inputs.name, init_pid)?;
            let booted = poll_boot_marker(init_pid, Duration::from_secs(5));
            if !booted {
                log::warn!("boot: boot marker not observed within 5s for {:?}", inputs.name);
            }

            if inputs.cfg.foreground {
                proxy_loop(inputs.console.master, init_pid)?;
            }

            Ok(StartOutcome { init_pid, booted })
        }
        ForkResult::Child => {
            channel.close_read()?;
            let cleanup = MonitorCleanup {
                workspace: inputs.workspace.clone(),
                name: inputs.name.to_string(),
                host_state: inputs.host_state.clone(),
            };
            let result = monitor::run(
                &*crate::syscall::create_syscall(),
                channel,
                move || {
                    monitor::fork_init(move || run_init_child(inputs.cfg, inputs.rootfs, inputs.workspace, inputs.uuid, inputs.hostname, &inputs.console, &inputs.ttys))
                },
                cleanup,
            );
            if let Err(e) = result {
                log::error!("monitor: {}", e);
                std::process::exit(1);
            }
            std::process::exit(0);
        }
    }
}

/// Runs in the second fork's child, which becomes PID 1 in the new
/// namespace. Never returns on success.
fn run_init_child(
    cfg: &ContainerConfig,
    rootfs: &Path,
    workspace: &Workspace,
    uuid: &str,
    hostname: &str,
    console: &Pty,
    ttys: &[Pty],
) -> ! {
    let syscall = crate::syscall::create_syscall();
    let volatile_dir = workspace.volatile_dir(cfg.name.as_deref().unwrap_or("unknown"));
    let inputs = BootInputs {
        cfg,
        rootfs,
        workspace_volatile_dir: &volatile_dir,
        uuid,
        console,
        ttys,
        hostname,
    };
    match boot::run(&*syscall, &inputs) {
        Ok(never) => match never {},
        Err(e) => {
            log::error!("boot: {}", e);
            std::process::exit(crate::error::exit_code(&e));
        }
    }
}

/// Polls up to `timeout` at 100ms intervals for `/proc/<pid>/root/run/
/// droidspaces` — boot confirmation, since init may still be executing the
/// mount-assembly sequence.
fn poll_boot_marker(pid: Pid, timeout: Duration) -> bool {
    let marker: PathBuf = format!("/proc/{}/root/run/droidspaces", pid.as_raw()).into();
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if marker.exists() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    marker.exists()
}
