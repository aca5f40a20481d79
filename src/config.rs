//! CLI surface and configuration (C9, A3), grounded on the model runtime's
//! `clap`-derive CLI and generalized with a hand-rolled `key=value` config
//! file reader — no crate in the corpus owns that bespoke dialect.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Clap;

use crate::error::{DsError, Result};

pub const MAX_BIND_MOUNTS: usize = 16;
pub const TTY_COUNT: usize = 6;

#[derive(Clap, Debug, Clone)]
#[clap(name = "droidspaces", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[clap(long)]
    pub name: Option<String>,
    #[clap(long)]
    pub rootfs: Option<PathBuf>,
    #[clap(long = "rootfs-img")]
    pub rootfs_img: Option<PathBuf>,
    #[clap(long)]
    pub hostname: Option<String>,
    #[clap(long, short = 'f')]
    pub foreground: bool,
    #[clap(long = "hw-access")]
    pub hw_access: bool,
    #[clap(long = "enable-ipv6")]
    pub enable_ipv6: bool,
    #[clap(long = "enable-android-storage")]
    pub enable_android_storage: bool,
    #[clap(long = "selinux-permissive")]
    pub selinux_permissive: bool,
    #[clap(long, short = 'V')]
    pub volatile: bool,
    #[clap(long = "bind-mount")]
    pub bind_mount: Vec<String>,
    #[clap(long)]
    pub dns: Option<String>,
    #[clap(long = "disable-seccomp")]
    pub disable_seccomp: bool,
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(long)]
    pub pidfile: Option<PathBuf>,
    #[clap(long)]
    pub log: Option<PathBuf>,
    #[clap(long = "log-level")]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clap, Debug, Clone)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Enter { user: Option<String> },
    Run { cmd: Vec<String> },
    Info { name: Option<String> },
    Show,
    Scan,
    Pid,
    Status,
    Check,
}

#[derive(Debug, Clone)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: PathBuf,
}

/// Container configuration constructed fresh per invocation and passed by
/// value into every operation; never persisted by the core itself.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub rootfs_source: RootfsSource,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub foreground: bool,
    pub hardware_access: bool,
    pub enable_ipv6: bool,
    pub bind_android_storage: bool,
    pub selinux_permissive: bool,
    pub volatile: bool,
    pub disable_seccomp: bool,
    pub bind_mounts: Vec<BindMount>,
    pub dns_servers: Vec<String>,
    pub pidfile_override: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum RootfsSource {
    Directory(PathBuf),
    Image(PathBuf),
}

impl ContainerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut cfg = if let Some(path) = &cli.config {
            Self::from_file(path)?
        } else {
            Self::empty()
        };

        if let Some(rootfs) = &cli.rootfs {
            cfg.rootfs_source = RootfsSource::Directory(rootfs.clone());
        }
        if let Some(img) = &cli.rootfs_img {
            cfg.rootfs_source = RootfsSource::Image(img.clone());
        }
        if let Some(name) = &cli.name {
            cfg.name = Some(name.clone());
        }
        if let Some(h) = &cli.hostname {
            cfg.hostname = Some(h.clone());
        }
        cfg.foreground |= cli.foreground;
        cfg.hardware_access |= cli.hw_access;
        cfg.enable_ipv6 |= cli.enable_ipv6;
        cfg.bind_android_storage |= cli.enable_android_storage;
        cfg.selinux_permissive |= cli.selinux_permissive;
        cfg.volatile |= cli.volatile;
        cfg.disable_seccomp |= cli.disable_seccomp;
        cfg.pidfile_override = cli.pidfile.clone().or(cfg.pidfile_override);

        for entry in &cli.bind_mount {
            cfg.bind_mounts.push(parse_bind_mount(entry)?);
        }
        if cfg.bind_mounts.len() > MAX_BIND_MOUNTS {
            return Err(DsError::InvalidArgs(format!(
                "at most {} --bind-mount entries are allowed",
                MAX_BIND_MOUNTS
            )));
        }

        if let Some(dns) = &cli.dns {
            cfg.dns_servers
                .extend(dns.split(',').map(str::to_string).filter(|s| !s.is_empty()));
        }

        if matches!(cfg.rootfs_source, RootfsSource::Image(_)) && cfg.name.is_none() {
            return Err(DsError::NameMissingForImage);
        }

        Ok(cfg)
    }

    fn empty() -> Self {
        ContainerConfig {
            rootfs_source: RootfsSource::Directory(PathBuf::new()),
            name: None,
            hostname: None,
            foreground: false,
            hardware_access: false,
            enable_ipv6: false,
            bind_android_storage: false,
            selinux_permissive: false,
            volatile: false,
            disable_seccomp: false,
            bind_mounts: Vec::new(),
            dns_servers: Vec::new(),
            pidfile_override: None,
        }
    }

    /// Reads the `key=value` config file format shared with the boot-time
    /// collaborator: `#` comments, blank lines, and the keys enumerated in
    /// the external-interface section of the spec.
    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut cfg = Self::empty();

        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                DsError::InvalidArgs(format!("{}:{}: expected key=value", path.display(), lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "name" => cfg.name = Some(value.to_string()),
                "hostname" => cfg.hostname = Some(value.to_string()),
                "rootfs_path" => cfg.rootfs_source = RootfsSource::Directory(PathBuf::from(value)),
                "use_sparse_image" => {
                    if value == "1" {
                        if let RootfsSource::Directory(p) = &cfg.rootfs_source {
                            cfg.rootfs_source = RootfsSource::Image(p.clone());
                        }
                    }
                }
                "enable_ipv6" => cfg.enable_ipv6 = value == "1",
                "enable_android_storage" => cfg.bind_android_storage = value == "1",
                "enable_hw_access" => cfg.hardware_access = value == "1",
                "selinux_permissive" => cfg.selinux_permissive = value == "1",
                "volatile_mode" => cfg.volatile = value == "1",
                "disable_seccomp_filter" => cfg.disable_seccomp = value == "1",
                "bind_mounts" => {
                    for entry in value.split(',').filter(|s| !s.is_empty()) {
                        cfg.bind_mounts.push(parse_bind_mount(entry)?);
                    }
                }
                "dns_servers" => {
                    cfg.dns_servers = value.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
                }
                // run_at_boot and sparse_image_size_gb are consumed by the
                // boot-time collaborator, not the runtime core.
                "run_at_boot" | "sparse_image_size_gb" => {}
                _ => log::warn!("{}:{}: unknown config key {:?}", path.display(), lineno + 1, key),
            }
        }

        Ok(cfg)
    }
}

fn parse_bind_mount(entry: &str) -> Result<BindMount> {
    let (host, container) = entry.split_once(':').ok_or_else(|| {
        DsError::InvalidArgs(format!("invalid --bind-mount entry {:?}, expected src:dst", entry))
    })?;
    Ok(BindMount {
        host: PathBuf::from(host),
        container: PathBuf::from(container),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bind_mount_pair() {
        let bm = parse_bind_mount("/sdcard:/mnt/sdcard").unwrap();
        assert_eq!(bm.host, PathBuf::from("/sdcard"));
        assert_eq!(bm.container, PathBuf::from("/mnt/sdcard"));
    }

    #[test]
    fn rejects_malformed_bind_mount() {
        assert!(parse_bind_mount("no-colon-here").is_err());
    }

    #[test]
    fn parses_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("droidspaces.conf");
        std::fs::write(
            &path,
            "# comment\nname=alpine\nvolatile_mode=1\ndns_servers=8.8.8.8,1.1.1.1\n",
        )
        .unwrap();
        let cfg = ContainerConfig::from_file(&path).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("alpine"));
        assert!(cfg.volatile);
        assert_eq!(cfg.dns_servers, vec!["8.8.8.8", "1.1.1.1"]);
    }
}
