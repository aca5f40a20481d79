//! Signal name/number parsing and the stop escalation sequence, grounded on
//! the model runtime's `signal.rs`.

use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{DsError, Result};
use crate::utils::pid_alive;

pub fn from_str(signal: &str) -> Result<Signal> {
    use Signal::*;
    Ok(match signal.to_ascii_uppercase().as_str() {
        "1" | "HUP" | "SIGHUP" => SIGHUP,
        "2" | "INT" | "SIGINT" => SIGINT,
        "3" | "QUIT" | "SIGQUIT" => SIGQUIT,
        "9" | "KILL" | "SIGKILL" => SIGKILL,
        "15" | "TERM" | "SIGTERM" => SIGTERM,
        "17" | "CHLD" | "SIGCHLD" => SIGCHLD,
        "28" | "WINCH" | "SIGWINCH" => SIGWINCH,
        other => return Err(DsError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a recognized signal", other),
        ))),
    })
}

/// Realtime signals (SIGRTMIN+3, the systemd-style graceful-shutdown request)
/// have no variant in `nix`'s `Signal` enum, so this goes through raw
/// `libc::kill` instead.
fn kill_sigrtmin_plus_3(pid: Pid) -> Result<()> {
    const SIGRTMIN: i32 = 34;
    let ret = unsafe { libc::kill(pid.as_raw(), SIGRTMIN + 3) };
    if ret == 0 {
        Ok(())
    } else {
        Err(DsError::Errno(nix::errno::Errno::last()))
    }
}

/// Stop escalation: SIGRTMIN+3, then SIGTERM after `grace`, then SIGKILL
/// after a further `kill_grace`, polling `pid_alive` between steps.
pub fn escalate_stop(pid: Pid, grace: Duration, kill_grace: Duration) -> Result<()> {
    if !pid_alive(pid) {
        return Ok(());
    }

    kill_sigrtmin_plus_3(pid)?;
    if wait_for_exit(pid, grace) {
        return Ok(());
    }

    log::warn!("stop: graceful signal timed out after {:?}, escalating to SIGTERM", grace);
    kill(pid, Signal::SIGTERM).map_err(DsError::Errno)?;
    if wait_for_exit(pid, kill_grace) {
        return Ok(());
    }

    log::warn!("stop: SIGTERM timeout after {:?}, escalating to SIGKILL", kill_grace);
    kill(pid, Signal::SIGKILL).map_err(DsError::Errno)?;
    if wait_for_exit(pid, Duration::from_secs(2)) {
        Ok(())
    } else {
        Err(DsError::Timeout("stop: SIGKILL".to_string()))
    }
}

fn wait_for_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    !pid_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_names_and_numbers() {
        assert_eq!(from_str("TERM").unwrap(), Signal::SIGTERM);
        assert_eq!(from_str("15").unwrap(), Signal::SIGTERM);
        assert_eq!(from_str("sigkill").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn rejects_unknown_signal() {
        assert!(from_str("NOTASIGNAL").is_err());
    }
}
