//! Syscall & filesystem primitives (C1).
//!
//! Every primitive either succeeds fully or returns a [`DsError`]; none of
//! them leave a partially-applied change silently unreported. Grounded on
//! the model runtime's `utils::write_file` / `utils::create_dir_all`
//! helpers, generalized with the typed error kinds this spec requires.

use std::fs;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::stat::{stat, SFlag};

use crate::error::{DsError, Result};

/// Recursive `mkdir` that tolerates the directory already existing.
pub fn mkdir_p<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(DsError::Io(e)),
    }
}

/// Reads a whole file and returns its contents with leading/trailing
/// whitespace trimmed.
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> Result<String> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ok(contents.trim().to_string())
}

/// Writes a whole file, retrying on short writes and reporting a partial
/// write as an error rather than silently truncating.
pub fn write_all<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    use std::io::Write;

    let path = path.as_ref();
    let bytes = contents.as_ref();
    let mut file = fs::File::create(path)?;

    let mut written = 0;
    while written < bytes.len() {
        let n = file.write(&bytes[written..])?;
        if n == 0 {
            return Err(DsError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write to {:?}", path),
            )));
        }
        written += n;
    }
    file.flush()?;
    Ok(())
}

/// `mknod` that tolerates a pre-existing node only when its (major, minor,
/// type) already match the requested values — anything else is a real
/// conflict and is reported, not silently accepted.
pub fn mknod_idempotent(
    syscall: &dyn crate::syscall::Syscall,
    path: &Path,
    kind: SFlag,
    perm: u32,
    major: u64,
    minor: u64,
) -> Result<()> {
    let dev = makedev(major, minor);
    match syscall.mknod(path, kind, perm, dev) {
        Ok(()) => Ok(()),
        Err(Errno::EEXIST) => {
            let st = stat(path).map_err(|errno| DsError::MountFailed {
                target: path.to_path_buf(),
                errno,
            })?;
            let existing_kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
            if existing_kind == (kind & SFlag::S_IFMT) && st.st_rdev == dev {
                Ok(())
            } else {
                Err(DsError::MountFailed {
                    target: path.to_path_buf(),
                    errno: Errno::EEXIST,
                })
            }
        }
        Err(errno) => Err(DsError::MountFailed {
            target: path.to_path_buf(),
            errno,
        }),
    }
}

pub fn makedev(major: u64, minor: u64) -> u64 {
    ((minor & 0xff) | ((major & 0xfff) << 8) | ((minor & !0xff) << 12) | ((major & !0xfff) << 32)) as u64
}

/// Returns true if `path`'s owning filesystem's magic matches `magic`
/// (used to detect f2fs lowerdirs for the overlay unsupported check).
pub fn fs_magic<P: AsRef<Path>>(path: P) -> Result<i64> {
    let info = nix::sys::statfs::statfs(path.as_ref()).map_err(DsError::Errno)?;
    Ok(info.filesystem_type().0)
}

/// Trivial helper used by naming/discovery: does `path` point at a file
/// whose contents, once trimmed, equal `expected`?
pub fn file_contents_equal<P: AsRef<Path>>(path: P, expected: &str) -> bool {
    read_trimmed(path).map(|s| s == expected).unwrap_or(false)
}

