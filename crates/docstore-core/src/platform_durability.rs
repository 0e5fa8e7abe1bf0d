//! Platform-specific durable sync for document files
//!
//! A demoted document is only considered safe once both its file contents and
//! the directory entry pointing at it have reached stable storage.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush a document file's data to stable storage before returning.
///
/// Linux uses fdatasync(). Apple platforms need F_FULLFSYNC because plain
/// fsync only reaches the drive cache. Windows uses FlushFileBuffers(), and
/// anything else falls back to `File::sync_data`.
pub fn durable_sync(file: &File) -> io::Result<()> {
    sync_file_data(file)
}

/// Map a C-style status to `io::Result`, reading errno on failure.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
fn os_status(succeeded: bool) -> io::Result<()> {
    if succeeded {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn sync_file_data(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file`, which outlives the call.
    os_status(unsafe { libc::fdatasync(file.as_raw_fd()) } == 0)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn sync_file_data(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file`, which outlives the call.
    os_status(unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) } != -1)
}

#[cfg(target_os = "windows")]
fn sync_file_data(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::FlushFileBuffers;
    // SAFETY: the handle is owned by `file`, which outlives the call.
    if unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) } != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
fn sync_file_data(file: &File) -> io::Result<()> {
    file.sync_data()
}

/// Persist directory entries (creations, renames, removals) under `dir`.
///
/// Directories cannot be opened for syncing on Windows; there this is a no-op.
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
