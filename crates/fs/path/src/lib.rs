//! Alternate-root path translation for muon guests.
//!
//! A guest that opens `/lib/libc.so.6` expects to find its own sysroot, not
//! the host's. [`PathResolver`] redirects absolute lookups into a prefix tree
//! (e.g. `/usr/gnemul/x86_64`) when the file exists there and passes the
//! request through untouched otherwise. Every outcome is memoized for the
//! lifetime of the resolver: the layout under the prefix is assumed static.
//!
//! [`make_absolute`] is the stateless companion that anchors relative paths
//! at the current working directory.

pub mod path;
pub mod resolver;

pub use path::{PATH_MAX, is_absolute, join, make_absolute};
pub use resolver::{HostProbe, PathProbe, PathResolver};

/// Errors produced while building or using path translations.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// The current working directory could not be determined.
    #[error("cannot determine working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
    /// The working directory is not valid UTF-8.
    #[error("working directory is not valid UTF-8")]
    NonUtf8WorkingDir,
    /// Prefixing the working directory would exceed [`PATH_MAX`].
    #[error("path too long ({len} bytes, limit {PATH_MAX})")]
    TooLong {
        /// Combined length of working directory and path.
        len: usize,
    },
}
