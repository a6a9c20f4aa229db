//! Free-space checks before accepting a write.
//!
//! The check is best-effort: it races with every other writer on the same
//! filesystem and reserves nothing. When free space cannot be determined the
//! transfer is allowed and the write itself fails on exhaustion.

use std::fmt::Debug;
use std::io;
use std::path::Path;

/// Source of free-space information for a directory
pub trait SpaceProbe: Send + Sync + Debug {
    /// Bytes available to an unprivileged writer, or `None` if unknown
    fn available_space(&self, dir: &Path) -> Option<u64>;

    /// Fail-open: unknown free space counts as enough
    fn has_space(&self, dir: &Path, needed: u64) -> bool {
        match self.available_space(dir) {
            Some(available) => available >= needed,
            None => true,
        }
    }
}

/// Queries the filesystem backing the directory
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, dir: &Path) -> Option<u64> {
        match available_space(dir) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!("Cannot query free space for {}: {}", dir.display(), e);
                None
            }
        }
    }
}

/// Reports a fixed amount of free space, e.g. a per-root quota
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub Option<u64>);

impl SpaceProbe for FixedSpaceProbe {
    fn available_space(&self, _dir: &Path) -> Option<u64> {
        self.0
    }
}

/// Whether `dir` has at least `needed` bytes free (true when unknown)
pub fn has_space(dir: &Path, needed: u64) -> bool {
    FsSpaceProbe.has_space(dir, needed)
}

/// Free bytes on the filesystem backing `dir`
#[cfg(unix)]
pub fn available_space(dir: &Path) -> io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(dir)?;
    Ok(u64::from(stat.blocks_available()).saturating_mul(u64::from(stat.fragment_size())))
}

#[cfg(not(unix))]
pub fn available_space(_dir: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}
