//! Path string utilities shared by the resolver and its callers.
//!
//! Guest paths are handled as `/`-separated strings, not host [`Path`]s:
//! their meaning belongs to the guest, and the host only sees them once
//! they have been joined onto a prefix.
//!
//! [`Path`]: std::path::Path

use std::borrow::Cow;

use crate::PathError;

/// Longest path the host accepts, including the working directory prefix.
pub const PATH_MAX: usize = 4096;

/// Returns `true` if the path starts with `/`.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Join `name` onto `base` with exactly one separator between them.
///
/// Trailing slashes on `base` and leading slashes on `name` are collapsed,
/// so `join("/alt/root/", "/etc/passwd")` is `/alt/root/etc/passwd`.
/// An empty `name` yields `base` unchanged.
#[must_use]
pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return base.to_owned();
    }
    let trimmed = base.trim_end_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 1 + name.len());
    out.push_str(trimmed);
    out.push('/');
    out.push_str(name);
    out
}

/// Prepend the current working directory if `path` is relative.
///
/// Absolute paths are returned as-is without allocating. The working
/// directory is queried on every call, and no symlink or `..` resolution
/// is performed: the host kernel does the rest when the path is used.
///
/// # Errors
///
/// Returns [`PathError::WorkingDir`] if the working directory cannot be
/// read, [`PathError::NonUtf8WorkingDir`] if it is not UTF-8, or
/// [`PathError::TooLong`] if the combined path exceeds [`PATH_MAX`].
pub fn make_absolute(path: &str) -> Result<Cow<'_, str>, PathError> {
    if is_absolute(path) {
        return Ok(Cow::Borrowed(path));
    }

    let cwd = std::env::current_dir().map_err(PathError::WorkingDir)?;
    let cwd = cwd.to_str().ok_or(PathError::NonUtf8WorkingDir)?;

    let len = cwd.len() + path.len();
    if len > PATH_MAX {
        return Err(PathError::TooLong { len });
    }

    let mut out = String::with_capacity(len + 1);
    out.push_str(cwd);
    out.push('/');
    out.push_str(path);
    Ok(Cow::Owned(out))
}
