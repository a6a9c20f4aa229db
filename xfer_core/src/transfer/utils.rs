use crate::error::{Result, TransferError};
use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};

/// Windows device names that cannot be used as file names
/// See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a received file name to a bare name safe to join onto a root directory.
///
/// Directory components (either separator) are dropped. Names that would still
/// escape the root or cannot be created portably are rejected.
pub fn bare_file_name(file_name: &str) -> Result<String> {
    let invalid = || TransferError::InvalidFileName(file_name.to_string());

    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." || name.trim().is_empty() {
        return Err(invalid());
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(invalid());
    }
    if name.len() > MAX_FILENAME_LENGTH {
        return Err(invalid());
    }
    if RESERVED_NAMES.iter().any(|r| name.eq_ignore_ascii_case(r)) {
        return Err(invalid());
    }

    Ok(name.to_string())
}

/// Create a new file for writing; fails if it already exists (0o600 on Unix)
pub async fn open_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Delete a file we created, logging instead of failing
pub async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "-".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}
