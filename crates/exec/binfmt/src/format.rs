//! Format handler registry interface.
//!
//! Real parsers (ELF, bFLT) live outside this crate. They plug into the
//! [`Loader`](crate::Loader) through [`BinaryFormat`]: the loader sniffs the
//! header, hands the prepared [`BinaryProgram`] to the first handler whose
//! [`BinaryFormat::probe`] accepts it, and passes the resulting
//! [`ImageInfo`] through to its caller.

use crate::error::FormatError;
use crate::program::BinaryProgram;

/// ELF magic bytes: `\x7fELF`.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Flat binary (uClinux bFLT) magic bytes.
pub const FLAT_MAGIC: [u8; 4] = *b"bFLT";

/// Returns `true` if `header` begins with the ELF magic.
#[must_use]
pub fn is_elf(header: &[u8]) -> bool {
    header.starts_with(&ELF_MAGIC)
}

/// Returns `true` if `header` begins with the bFLT magic.
#[must_use]
pub fn is_flat(header: &[u8]) -> bool {
    header.starts_with(&FLAT_MAGIC)
}

/// Where a loaded image lives and how it starts.
///
/// Filled in by the format handler; the loader itself only records the
/// argument string range through [`ImageInfo::set_args`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    /// Name of the handler that produced this image.
    pub format: &'static str,
    /// Entry point.
    pub entry: u64,
    /// Address the image was loaded at.
    pub load_addr: u64,
    /// Start of the text segment.
    pub start_code: u64,
    /// End of the text segment.
    pub end_code: u64,
    /// Initial stack pointer.
    pub start_stack: u64,
    /// First byte of the argument strings.
    pub arg_start: u64,
    /// One past the last argument string.
    pub arg_end: u64,
}

impl ImageInfo {
    /// Records the argument string range for process introspection.
    pub fn set_args(&mut self, arg_start: u64, arg_end: u64) {
        self.arg_start = arg_start;
        self.arg_end = arg_end;
    }
}

/// A handler that can probe and load a particular binary format.
///
/// `Send + Sync` because one registry serves concurrent loads.
pub trait BinaryFormat: Send + Sync {
    /// Human-readable name of this format (e.g. `"ELF"`).
    fn name(&self) -> &'static str;

    /// Returns `true` if `header` begins with this format's magic bytes.
    fn probe(&self, header: &[u8]) -> bool;

    /// Loads the prepared program.
    ///
    /// # Errors
    ///
    /// Returns the handler's [`FormatError`], which the loader passes
    /// through unchanged.
    fn load(&self, program: &mut BinaryProgram) -> Result<ImageInfo, FormatError>;
}

/// Entry-state setup for the target architecture.
pub trait ThreadInit {
    /// Register state handed to the CPU loop.
    type Regs;

    /// Builds the initial register state for `image`.
    fn init_thread(&self, image: &ImageInfo) -> Self::Regs;
}
