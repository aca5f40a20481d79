//! Network & environment wiring (C4). Host-side pre-boot tweaks plus the
//! guest-side files written during the PID-1 boot sequence (§4.3 steps
//! 18, 21). Grounded on `other_examples`'s `generate_passwd_content`/
//! `setup_container_env` for the "build guest config as an in-memory string,
//! write once" idiom.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::fsutil::{mkdir_p, write_all};
use crate::utils::PathBufExt;

/// Host-side: enable IPv4 forwarding, optionally undo IPv6 disablement, and
/// stash the DNS list where the PID-1 sequence can read it through the
/// still-visible old root (before `pivot_root` replaces the view).
pub fn host_pre_boot(rootfs: &Path, dns_servers: &[String], enable_ipv6: bool) -> Result<()> {
    let _ = fs::write("/proc/sys/net/ipv4/ip_forward", b"1");
    if enable_ipv6 {
        let _ = fs::write("/proc/sys/net/ipv6/conf/all/disable_ipv6", b"0");
    }
    write_all(rootfs.join(".dns_servers"), dns_servers.join(","))
}

/// Guest-side files written by §4.3 steps 18 and 21: hostname, hosts,
/// resolv.conf, Android socket group ids, and the init exec environment.
pub fn write_hostname(active_root: &Path, hostname: &str) -> Result<()> {
    write_all(active_root.join_safely("etc/hostname"), format!("{}\n", hostname))
}

/// `127.0.1.1 <hostname>` is mandatory alongside `localhost`, or `apt`/`sudo`
/// stall trying to resolve the guest's own hostname.
pub fn write_hosts(active_root: &Path, hostname: &str) -> Result<()> {
    let contents = format!(
        "127.0.0.1 localhost\n127.0.1.1 {}\n::1 localhost ip6-localhost ip6-loopback\n",
        hostname
    );
    write_all(active_root.join_safely("etc/hosts"), contents)
}

pub fn write_resolv_conf(active_root: &Path, dns_servers: &[String]) -> Result<()> {
    let resolvconf_dir = active_root.join_safely("run/resolvconf");
    mkdir_p(&resolvconf_dir)?;
    let resolv_path = resolvconf_dir.join("resolv.conf");

    let mut contents = String::new();
    for server in dns_servers {
        contents.push_str("nameserver ");
        contents.push_str(server);
        contents.push('\0');
    }
    write_all(&resolv_path, contents)?;

    let etc_resolv = active_root.join_safely("etc/resolv.conf");
    let _ = fs::remove_file(&etc_resolv);
    std::os::unix::fs::symlink("/run/resolvconf/resolv.conf", &etc_resolv)?;
    Ok(())
}

/// Appends the Android socket-access group ids so guest users without them
/// can still open `AF_INET`/`AF_PACKET` sockets on the shared host network
/// stack.
pub fn append_android_groups(active_root: &Path) -> Result<()> {
    const GROUPS: &[(&str, u32)] = &[("aid_inet", 3003), ("aid_net_raw", 3004), ("aid_net_admin", 3005)];

    let group_path = active_root.join_safely("etc/group");
    let mut contents = fs::read_to_string(&group_path).unwrap_or_default();
    for (name, gid) in GROUPS {
        if !contents.lines().any(|l| l.starts_with(&format!("{}:", name))) {
            if !contents.ends_with('\n') && !contents.is_empty() {
                contents.push('\n');
            }
            contents.push_str(&format!("{}:x:{}:\n", name, gid));
        }
    }
    write_all(group_path, contents)
}

/// The exec environment for the guest init, built from a cleared
/// environment per §4.3 step 21.
pub fn init_environment(tty_slave_paths: &[String]) -> Vec<(String, String)> {
    vec![
        (
            "PATH".to_string(),
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        ),
        ("TERM".to_string(), "xterm-256color".to_string()),
        ("HOME".to_string(), "/root".to_string()),
        ("container".to_string(), "droidspaces".to_string()),
        ("container_ttys".to_string(), tty_slave_paths.join(" ")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hosts_file_includes_mandatory_127_0_1_1_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        write_hosts(dir.path(), "alpine-3").unwrap();
        let contents = std::fs::read_to_string(dir.path().join("etc/hosts")).unwrap();
        assert!(contents.contains("127.0.1.1 alpine-3"));
    }

    #[test]
    fn resolv_conf_lists_each_server_null_terminated() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        write_resolv_conf(dir.path(), &["8.8.8.8".to_string(), "1.1.1.1".to_string()]).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("run/resolvconf/resolv.conf")).unwrap();
        assert_eq!(contents, "nameserver 8.8.8.8\0nameserver 1.1.1.1\0");
    }

    #[test]
    fn android_groups_are_appended_once() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/group"), "root:x:0:\n").unwrap();
        append_android_groups(dir.path()).unwrap();
        append_android_groups(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("etc/group")).unwrap();
        assert_eq!(contents.matches("aid_inet").count(), 1);
    }
}
