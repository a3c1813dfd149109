//! The in-flight load request.

use std::io::ErrorKind;

use crate::error::ExecError;
use crate::host::{Credentials, ExecFile, FileMode};

/// Number of leading bytes read from a candidate for format detection.
pub const HEADER_SIZE: usize = 128;

/// An open executable together with the name it was requested under.
pub struct ExecSource {
    /// The open file.
    pub file: Box<dyn ExecFile>,
    /// Guest-visible name of the file.
    pub name: String,
}

impl core::fmt::Debug for ExecSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A binary being prepared for execution.
///
/// Created at the start of a load and mutated in place as `#!` lines are
/// followed. On success it is handed back to the caller, together with any
/// sources superseded by an interpreter (those are still open: a later stage
/// may want to re-read or identify the original script).
#[derive(Debug)]
pub struct BinaryProgram {
    source: ExecSource,
    retained: Vec<ExecSource>,
    header: [u8; HEADER_SIZE],
    header_len: usize,
    argv: Vec<String>,
    envp: Vec<String>,
    euid: u32,
    egid: u32,
}

impl BinaryProgram {
    /// Creates a request for `file`, requested as `filename`.
    #[must_use]
    pub fn new(
        file: Box<dyn ExecFile>,
        filename: &str,
        argv: Vec<String>,
        envp: Vec<String>,
    ) -> Self {
        Self {
            source: ExecSource {
                file,
                name: filename.to_owned(),
            },
            retained: Vec::new(),
            header: [0; HEADER_SIZE],
            header_len: 0,
            argv,
            envp,
            euid: 0,
            egid: 0,
        }
    }

    /// Validates the current source and reads its header.
    ///
    /// Returns the number of header bytes actually read; the remainder of
    /// the header buffer is zeroed.
    ///
    /// # Errors
    ///
    /// - [`ExecError::NotAccessible`] if the file cannot be stat'ed.
    /// - [`ExecError::PermissionDenied`] if it is not a regular file or has
    ///   no execute bit.
    /// - [`ExecError::Io`] if reading the header fails.
    pub fn prepare(&mut self, caller: Credentials) -> Result<usize, ExecError> {
        let stat = self.source.file.stat().map_err(ExecError::NotAccessible)?;

        if !stat.is_regular {
            return Err(ExecError::PermissionDenied("not a regular file"));
        }
        if !stat.mode.intersects(FileMode::ANY_EXEC) {
            return Err(ExecError::PermissionDenied("no execute permission"));
        }

        self.euid = caller.euid;
        self.egid = caller.egid;

        if stat.mode.contains(FileMode::SET_UID) {
            self.euid = stat.uid;
        }
        // Set-gid without group-execute marks a mandatory-locking candidate,
        // not a set-gid executable.
        if stat.mode.contains(FileMode::SET_GID | FileMode::GROUP_EXEC) {
            self.egid = stat.gid;
        }

        self.header = [0; HEADER_SIZE];
        self.header_len = read_header(&mut *self.source.file, &mut self.header)?;
        Ok(self.header_len)
    }

    /// Redirects the request at an interpreter.
    ///
    /// The current source is retained (not closed), the new source takes its
    /// place, and `argv` is replaced wholesale.
    pub(crate) fn retarget(&mut self, interpreter: ExecSource, argv: Vec<String>) {
        let previous = core::mem::replace(&mut self.source, interpreter);
        self.retained.push(previous);
        self.argv = argv;
    }

    /// The header buffer, always [`HEADER_SIZE`] bytes.
    #[must_use]
    pub fn header(&self) -> &[u8; HEADER_SIZE] {
        &self.header
    }

    /// Number of header bytes read from the file.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The current source.
    #[must_use]
    pub fn source(&self) -> &ExecSource {
        &self.source
    }

    /// Mutable access to the current source, for format handlers that read
    /// past the header.
    pub fn source_mut(&mut self) -> &mut ExecSource {
        &mut self.source
    }

    /// Guest-visible name of the current source.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.source.name
    }

    /// Sources replaced by interpreters, oldest first.
    #[must_use]
    pub fn retained(&self) -> &[ExecSource] {
        &self.retained
    }

    /// Takes ownership of the retained sources.
    pub fn take_retained(&mut self) -> Vec<ExecSource> {
        core::mem::take(&mut self.retained)
    }

    /// Argument vector.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment vector.
    #[must_use]
    pub fn envp(&self) -> &[String] {
        &self.envp
    }

    /// Number of arguments.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Number of environment entries.
    #[must_use]
    pub fn envc(&self) -> usize {
        self.envp.len()
    }

    /// Effective user ID the image will run with.
    #[must_use]
    pub fn euid(&self) -> u32 {
        self.euid
    }

    /// Effective group ID the image will run with.
    #[must_use]
    pub fn egid(&self) -> u32 {
        self.egid
    }
}

/// Fills `buf` from `file` until it is full or the file ends.
fn read_header(file: &mut dyn ExecFile, buf: &mut [u8]) -> Result<usize, ExecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(ExecError::Io(e)),
        }
    }
    Ok(filled)
}
