//! Workspace layout resolution: Android vs. desktop-Linux paths, and the
//! `Pids/`, `Volatile/`, `/mnt/Droidspaces/<name>` directories described in
//! the external-interface workspace layout.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::mkdir_p;

#[derive(Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn discover() -> Self {
        let root = if Path::new("/system/build.prop").exists() {
            PathBuf::from("/data/local/Droidspaces")
        } else {
            PathBuf::from("/var/lib/Droidspaces")
        };
        Workspace { root }
    }

    #[cfg(test)]
    pub fn at(root: PathBuf) -> Self {
        Workspace { root }
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("Pids")
    }

    pub fn pidfile(&self, name: &str) -> PathBuf {
        self.pids_dir().join(format!("{}.pid", name))
    }

    pub fn mount_sidecar(&self, name: &str) -> PathBuf {
        self.pids_dir().join(format!("{}.mount", name))
    }

    pub fn hostprep_sidecar(&self, name: &str) -> PathBuf {
        self.pids_dir().join(format!("{}.hostprep", name))
    }

    pub fn volatile_dir(&self, name: &str) -> PathBuf {
        self.root.join("Volatile").join(name)
    }

    pub fn image_mount_point(&self, name: &str) -> PathBuf {
        PathBuf::from("/mnt/Droidspaces").join(name)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        mkdir_p(self.pids_dir())?;
        mkdir_p(self.root.join("Volatile"))?;
        mkdir_p("/mnt/Droidspaces")?;
        Ok(())
    }
}
