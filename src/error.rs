//! Typed error kinds for the container runtime core.
//!
//! Every fallible primitive in this crate returns `Result<T, DsError>` (or
//! `Result<T, nix::errno::Errno>` at the lowest syscall layer, converted up
//! through `From`). The CLI layer in `main` maps `DsError` to the exit codes
//! of the external interface.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DsError {
    #[error("must run as root")]
    NotRoot,

    #[error("kernel is missing required feature: {0}")]
    MissingKernelFeature(String),

    #[error("a container named {0:?} is already running")]
    NameConflict(String),

    #[error("--name is required when --rootfs-img is used")]
    NameMissingForImage,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("rootfs not found: {0:?}")]
    RootfsNotFound(PathBuf),

    #[error("image is corrupt and could not be repaired: {0:?}")]
    ImageCorrupt(PathBuf),

    #[error("overlay lowerdir filesystem {fs} does not support overlayfs; use an image-based rootfs instead")]
    OverlayLowerdirUnsupported { fs: String },

    #[error("mount failed: target={target:?} errno={errno}")]
    MountFailed { target: PathBuf, errno: Errno },

    #[error("failed to allocate a pseudo-terminal")]
    PtyAllocFailed,

    #[error("fork failed: {0}")]
    ForkFailed(Errno),

    #[error("pivot_root failed: errno={errno}")]
    PivotFailed { errno: Errno },

    #[error("exec of {0:?} failed")]
    InitExecFailed(PathBuf),

    #[error("stale state at {0:?}")]
    StaleState(PathBuf),

    #[error("timed out during {0}")]
    Timeout(String),

    #[error("container {0:?} is not running")]
    NotRunning(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Errno(#[from] Errno),
}

pub type Result<T> = std::result::Result<T, DsError>;

/// Maps a [`DsError`] onto the exit codes documented in the external
/// interface: 1 generic, 2 invalid arguments, 3 missing kernel capability,
/// 4 already-running / not-running.
pub fn exit_code(err: &DsError) -> i32 {
    match err {
        DsError::InvalidArgs(_) | DsError::NameMissingForImage => 2,
        DsError::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput || e.kind() == std::io::ErrorKind::InvalidData => 2,
        DsError::MissingKernelFeature(_) | DsError::OverlayLowerdirUnsupported { .. } => 3,
        DsError::NameConflict(_) | DsError::NotRunning(_) => 4,
        _ => 1,
    }
}
