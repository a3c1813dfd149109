//! Guest executable loader for muon.
//!
//! Turns a candidate file into a loaded process image: validates the file,
//! sniffs its header, follows `#!` interpreter chains, dispatches to a
//! registered [`BinaryFormat`] handler and lays out the argument and
//! environment block a target CPU expects at process entry.
//!
//! # Usage
//!
//! ```ignore
//! let loader = Loader::new(Arc::new(HostSystem), MyThreadInit)
//!     .with_format(MyElfLoader)
//!     .with_paths(Arc::new(PathResolver::new("/usr/gnemul/x86_64")?));
//! let mut loaded = loader.load_path("/bin/sh", argv, envp)?;
//! let block = loaded.push_arguments(&mut guest_memory, stack_top, false)?;
//! ```

pub mod error;
pub mod format;
pub mod host;
pub mod loader;
pub mod program;
pub mod script;
pub mod stack;

pub use error::{ExecError, FormatError};
pub use format::{BinaryFormat, ELF_MAGIC, FLAT_MAGIC, ImageInfo, ThreadInit, is_elf, is_flat};
#[cfg(target_os = "linux")]
pub use host::HostSystem;
pub use host::{Credentials, ExecFile, ExecHost, FileMode, FileStat};
pub use loader::{Loaded, Loader, MAX_INDIRECTIONS};
pub use program::{BinaryProgram, ExecSource, HEADER_SIZE};
pub use script::{SCRIPT_MAGIC, ShebangLine, is_script, resolve_script};
pub use stack::{
    ArgBlock, Endian, FlatMemory, GuestMemory, WordSize, build_argument_block, place_strings,
    push_arguments,
};
