//! Naming, pidfile, discovery (C7), grounded on the model runtime's
//! `list.rs` for the `tabwriter` table-rendering idiom, generalized from its
//! OCI bundle/state-file enumeration to this runtime's pidfile/`/proc` scan.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use tabwriter::TabWriter;

use crate::error::Result;
use crate::fsutil::{file_contents_equal, read_trimmed, write_all};
use crate::utils::pid_alive;
use crate::workspace::Workspace;

const CONTAINER_MARKER: &str = "droidspaces";

/// 32 lowercase hex characters, generated with `fastrand` rather than a
/// cryptographic RNG — this is a liveness marker, not a security token.
pub fn generate_uuid() -> String {
    let mut s = String::with_capacity(32);
    for _ in 0..32 {
        s.push(std::char::from_digit(fastrand::u32(0..16), 16).unwrap());
    }
    s
}

/// `name(cfg) = os_release_id + "-" + os_release_version_id`, suffixed with
/// `-k` for the smallest `k >= 1` that doesn't collide with a running name.
pub fn auto_name(rootfs: &Path, workspace: &Workspace) -> Result<String> {
    let os_release = rootfs.join("etc/os-release");
    let contents = fs::read_to_string(&os_release).unwrap_or_default();
    let id = field(&contents, "ID").unwrap_or_else(|| "linux".to_string());
    let version = field(&contents, "VERSION_ID").unwrap_or_else(|| "unknown".to_string());
    let base = format!("{}-{}", id, version);

    if !name_is_running(workspace, &base) {
        return Ok(base);
    }
    for k in 1..10_000 {
        let candidate = format!("{}-{}", base, k);
        if !name_is_running(workspace, &candidate) {
            return Ok(candidate);
        }
    }
    Ok(format!("{}-{}", base, fastrand::u32(..)))
}

fn field(os_release: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    os_release.lines().find_map(|line| {
        line.strip_prefix(&prefix)
            .map(|v| v.trim_matches('"').to_string())
    })
}

fn name_is_running(workspace: &Workspace, name: &str) -> bool {
    match read_pidfile(workspace, name) {
        Ok(Some(pid)) => is_valid_container_pid(pid),
        _ => false,
    }
}

pub fn read_pidfile(workspace: &Workspace, name: &str) -> Result<Option<Pid>> {
    let path = workspace.pidfile(name);
    if !path.exists() {
        return Ok(None);
    }
    let contents = read_trimmed(&path)?;
    Ok(contents.parse::<i32>().ok().map(Pid::from_raw))
}

pub fn write_pidfile(workspace: &Workspace, name: &str, pid: Pid) -> Result<()> {
    write_all(workspace.pidfile(name), pid.as_raw().to_string())
}

pub fn remove_pidfile(workspace: &Workspace, name: &str) -> Result<()> {
    let path = workspace.pidfile(name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The process exists AND `/proc/<pid>/root/run/systemd/container` reads
/// exactly `"droidspaces"`. Used to reject stale pidfiles whose PID has been
/// recycled into an unrelated process.
pub fn is_valid_container_pid(pid: Pid) -> bool {
    if !pid_alive(pid) {
        return false;
    }
    let marker = PathBuf::from(format!("/proc/{}/root/run/systemd/container", pid.as_raw()));
    file_contents_equal(marker, CONTAINER_MARKER)
}

/// Whether this process, as seen from inside its own PID namespace, is PID
/// 1 there — the last field of `/proc/<pid>/status`'s `NSpid:` line.
pub fn is_namespace_pid_one(pid: Pid) -> bool {
    let status_path = format!("/proc/{}/status", pid.as_raw());
    let contents = match fs::read_to_string(status_path) {
        Ok(c) => c,
        Err(_) => return false,
    };
    contents
        .lines()
        .find(|l| l.starts_with("NSpid:"))
        .and_then(|l| l.split_whitespace().last())
        .map(|last| last == "1")
        .unwrap_or(false)
}

pub struct ContainerListing {
    pub name: String,
    pub pid: Pid,
}

/// Enumerates `/proc/*` for processes whose container marker matches and
/// which are PID 1 inside their own namespace, re-registering any that have
/// no pidfile under an auto-generated name.
pub fn scan(workspace: &Workspace) -> Result<Vec<ContainerListing>> {
    let mut found = Vec::new();
    let entries = match fs::read_dir("/proc") {
        Ok(e) => e,
        Err(_) => return Ok(found),
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let raw_pid = match file_name.to_str().and_then(|s| s.parse::<i32>().ok()) {
            Some(p) => p,
            None => continue,
        };
        let pid = Pid::from_raw(raw_pid);
        if !is_valid_container_pid(pid) || !is_namespace_pid_one(pid) {
            continue;
        }

        let name = known_name_for_pid(workspace, pid).unwrap_or_else(|| {
            let root = PathBuf::from(format!("/proc/{}/root", raw_pid));
            auto_name(&root, workspace).unwrap_or_else(|_| format!("container-{}", raw_pid))
        });
        found.push(ContainerListing { name, pid });
    }
    Ok(found)
}

fn known_name_for_pid(workspace: &Workspace, pid: Pid) -> Option<String> {
    let entries = fs::read_dir(workspace.pids_dir()).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        if let Ok(contents) = read_trimmed(&path) {
            if contents.parse::<i32>() == Ok(pid.as_raw()) {
                return path.file_stem().map(|s| s.to_string_lossy().into_owned());
            }
        }
    }
    None
}

/// Enumerates pidfiles, validates each, renders a table, and deletes
/// pidfiles of invalid PIDs as a side effect.
pub fn show(workspace: &Workspace) -> Result<String> {
    let mut content = String::new();
    content.push_str("NAME\tPID\tSTATUS\n");

    let entries = match fs::read_dir(workspace.pids_dir()) {
        Ok(e) => e,
        Err(_) => return render_table(&content),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let pid = match read_trimmed(&path).ok().and_then(|s| s.parse::<i32>().ok()) {
            Some(p) => Pid::from_raw(p),
            None => {
                let _ = fs::remove_file(&path);
                continue;
            }
        };
        if is_valid_container_pid(pid) {
            content.push_str(&format!("{}\t{}\trunning\n", name, pid.as_raw()));
        } else {
            let _ = fs::remove_file(&path);
        }
    }

    render_table(&content)
}

fn render_table(content: &str) -> Result<String> {
    let mut writer = TabWriter::new(Vec::new());
    writer.write_all(content.as_bytes())?;
    writer.flush()?;
    let bytes = writer.into_inner().map_err(|_| {
        crate::error::DsError::Io(io::Error::new(io::ErrorKind::Other, "tabwriter flush failed"))
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_and_version_id_fields() {
        let os_release = "NAME=\"Alpine Linux\"\nID=alpine\nVERSION_ID=3.18.0\n";
        assert_eq!(field(os_release, "ID"), Some("alpine".to_string()));
        assert_eq!(field(os_release, "VERSION_ID"), Some("3.18.0".to_string()));
    }

    #[test]
    fn generates_32_hex_chars() {
        let uuid = generate_uuid();
        assert_eq!(uuid.len(), 32);
        assert!(uuid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pidfile_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path().to_path_buf());
        ws.ensure_dirs().unwrap();
        write_pidfile(&ws, "t1", Pid::from_raw(1234)).unwrap();
        assert_eq!(read_pidfile(&ws, "t1").unwrap(), Some(Pid::from_raw(1234)));
        remove_pidfile(&ws, "t1").unwrap();
        assert_eq!(read_pidfile(&ws, "t1").unwrap(), None);
    }
}
