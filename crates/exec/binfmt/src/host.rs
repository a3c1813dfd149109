//! Host-side seams: executable files, their metadata, and caller identity.
//!
//! The loader never touches the OS directly. It opens interpreters and reads
//! credentials through an [`ExecHost`], and reads headers from an
//! [`ExecFile`]. [`HostSystem`] wires both to the real host; it reads
//! credentials from procfs and so only exists on Linux hosts.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;

use bitflags::bitflags;

bitflags! {
    /// Permission and special bits of a file mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        /// Set-user-ID on execution.
        const SET_UID    = 0o4000;
        /// Set-group-ID on execution (or mandatory locking without group-execute).
        const SET_GID    = 0o2000;
        /// Sticky bit.
        const STICKY     = 0o1000;
        /// Owner read.
        const USER_READ  = 0o0400;
        /// Owner write.
        const USER_WRITE = 0o0200;
        /// Owner execute.
        const USER_EXEC  = 0o0100;
        /// Group read.
        const GROUP_READ = 0o0040;
        /// Group write.
        const GROUP_WRITE = 0o0020;
        /// Group execute.
        const GROUP_EXEC = 0o0010;
        /// Others read.
        const OTHER_READ = 0o0004;
        /// Others write.
        const OTHER_WRITE = 0o0002;
        /// Others execute.
        const OTHER_EXEC = 0o0001;

        /// Any execute bit.
        const ANY_EXEC = Self::USER_EXEC.bits() | Self::GROUP_EXEC.bits() | Self::OTHER_EXEC.bits();
    }
}

/// The subset of `fstat` the loader needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// `true` for regular files.
    pub is_regular: bool,
    /// Permission and special bits.
    pub mode: FileMode,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
}

/// An open, readable candidate executable.
pub trait ExecFile: Read + Send {
    /// Returns the file's metadata.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be stat'ed.
    fn stat(&self) -> io::Result<FileStat>;
}

impl ExecFile for File {
    fn stat(&self) -> io::Result<FileStat> {
        let meta = self.metadata()?;
        Ok(FileStat {
            is_regular: meta.file_type().is_file(),
            mode: FileMode::from_bits_truncate(meta.mode()),
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }
}

/// Effective user and group of the process performing a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    /// Effective user ID.
    pub euid: u32,
    /// Effective group ID.
    pub egid: u32,
}

/// OS services the loader relies on.
pub trait ExecHost: Send + Sync {
    /// Opens `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened.
    fn open(&self, path: &str) -> io::Result<Box<dyn ExecFile>>;

    /// Returns the caller's effective credentials.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the credentials cannot be determined.
    fn credentials(&self) -> io::Result<Credentials>;
}

/// [`ExecHost`] backed by the real host.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

#[cfg(target_os = "linux")]
impl ExecHost for HostSystem {
    fn open(&self, path: &str) -> io::Result<Box<dyn ExecFile>> {
        Ok(Box::new(File::open(path)?))
    }

    fn credentials(&self) -> io::Result<Credentials> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        parse_status_credentials(&status).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "no Uid/Gid in /proc/self/status")
        })
    }
}

/// Extracts the effective IDs from `/proc/<pid>/status` text.
///
/// The `Uid:` and `Gid:` lines list real, effective, saved and filesystem
/// IDs in that order.
#[cfg(target_os = "linux")]
fn parse_status_credentials(status: &str) -> Option<Credentials> {
    let effective = |key: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().nth(1))
            .and_then(|id| id.parse().ok())
    };
    Some(Credentials {
        euid: effective("Uid:")?,
        egid: effective("Gid:")?,
    })
}
