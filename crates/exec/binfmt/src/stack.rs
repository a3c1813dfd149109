//! Argument and environment block layout on the guest stack.
//!
//! At process entry the stack pointer addresses `argc`, followed by the
//! NULL-terminated `argv` and `envp` pointer tables. Some ABIs also push
//! the addresses of both tables between `argc` and `argv[0]`:
//!
//! ```text
//! HIGH ADDRESS
//!   ┌────────────────────────────────┐
//!   │ argv/envp strings (NUL-term.)  │  ← stringp (argv strings first)
//!   ├────────────────────────────────┤
//!   │ envp[0..envc], NULL            │
//!   │ argv[0..argc], NULL            │
//!   │ [&envp, &argv]  (push_ptr)     │
//!   │ argc                           │  ← returned sp
//!   └────────────────────────────────┘
//! ```
//!
//! Every slot is one target word wide, in target byte order.

use crate::error::ExecError;

/// Width of a target machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    /// 4-byte words.
    W32,
    /// 8-byte words.
    W64,
}

impl WordSize {
    /// Word width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    /// Word width in bytes, as a host length.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }
}

/// Target byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// Guest memory as seen by the loader.
///
/// Implementations decide how guest addresses map to host storage; every
/// access may fail with [`ExecError::Fault`].
pub trait GuestMemory {
    /// Width of a target word.
    fn word_size(&self) -> WordSize;

    /// Target byte order.
    fn endian(&self) -> Endian;

    /// Copies `bytes` to guest address `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if any byte of the range is not writable.
    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), ExecError>;

    /// Reads the byte at guest address `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if `addr` is not readable.
    fn read_byte(&self, addr: u64) -> Result<u8, ExecError>;

    /// Stores one target word at `addr`, truncated to the word width.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if the word is not writable.
    fn put_word(&mut self, addr: u64, value: u64) -> Result<(), ExecError> {
        let bytes = match self.endian() {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        let word = match (self.word_size(), self.endian()) {
            (WordSize::W64, _) => &bytes[..],
            (WordSize::W32, Endian::Little) => &bytes[..4],
            (WordSize::W32, Endian::Big) => &bytes[4..],
        };
        self.write_bytes(addr, word)
    }

    /// Length of the NUL-terminated string at `addr`, excluding the NUL.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if the string runs into unreadable memory.
    fn strlen(&self, addr: u64) -> Result<u64, ExecError> {
        let mut len = 0;
        while self.read_byte(addr + len)? != 0 {
            len += 1;
        }
        Ok(len)
    }
}

/// Result of laying out an argument block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgBlock {
    /// Stack pointer at process entry (addresses `argc`).
    pub sp: u64,
    /// First byte of the argument strings.
    pub arg_start: u64,
    /// One past the last argument string's NUL.
    pub arg_end: u64,
}

fn below(sp: u64, bytes: u64) -> Result<u64, ExecError> {
    sp.checked_sub(bytes).ok_or(ExecError::Fault { addr: sp })
}

/// Builds the `argc`/`argv`/`envp` tables below `sp`.
///
/// `stringp` addresses `argc` argument strings followed by `envc`
/// environment strings, packed and NUL-terminated. Both pointer tables are
/// NULL-terminated. With `push_ptr`, the table addresses are pushed between
/// `argc` and `argv[0]` for ABIs that expect them.
///
/// # Errors
///
/// Returns [`ExecError::Fault`] on the first failed guest access.
pub fn build_argument_block(
    mem: &mut dyn GuestMemory,
    envc: usize,
    argc: usize,
    sp: u64,
    stringp: u64,
    push_ptr: bool,
) -> Result<ArgBlock, ExecError> {
    let n = mem.word_size().bytes();

    let sp = below(sp, (envc as u64 + 1) * n)?;
    let mut envp = sp;
    let sp = below(sp, (argc as u64 + 1) * n)?;
    let mut argv = sp;

    let mut sp = sp;
    if push_ptr {
        sp = below(sp, n)?;
        mem.put_word(sp, envp)?;
        sp = below(sp, n)?;
        mem.put_word(sp, argv)?;
    }
    sp = below(sp, n)?;
    mem.put_word(sp, argc as u64)?;

    let mut stringp = stringp;
    let arg_start = stringp;
    for _ in 0..argc {
        mem.put_word(argv, stringp)?;
        argv += n;
        stringp += mem.strlen(stringp)? + 1;
    }
    let arg_end = stringp;
    mem.put_word(argv, 0)?;

    for _ in 0..envc {
        mem.put_word(envp, stringp)?;
        envp += n;
        stringp += mem.strlen(stringp)? + 1;
    }
    mem.put_word(envp, 0)?;

    Ok(ArgBlock {
        sp,
        arg_start,
        arg_end,
    })
}

/// Copies `argv` then `envp` strings, NUL-terminated and packed, to end
/// just below `top`. Returns the address of the first string.
///
/// # Errors
///
/// Returns [`ExecError::Fault`] if the strings do not fit.
pub fn place_strings(
    mem: &mut dyn GuestMemory,
    top: u64,
    argv: &[String],
    envp: &[String],
) -> Result<u64, ExecError> {
    let total: u64 = argv.iter().chain(envp).map(|s| s.len() as u64 + 1).sum();
    let start = below(top, total)?;

    let mut cursor = start;
    for s in argv.iter().chain(envp) {
        mem.write_bytes(cursor, s.as_bytes())?;
        mem.write_bytes(cursor + s.len() as u64, &[0])?;
        cursor += s.len() as u64 + 1;
    }
    Ok(start)
}

/// Places the strings below `top`, aligns down to a word boundary and
/// builds the pointer tables.
///
/// # Errors
///
/// Returns [`ExecError::Fault`] on the first failed guest access.
pub fn push_arguments(
    mem: &mut dyn GuestMemory,
    top: u64,
    argv: &[String],
    envp: &[String],
    push_ptr: bool,
) -> Result<ArgBlock, ExecError> {
    let stringp = place_strings(mem, top, argv, envp)?;
    let sp = stringp & !(mem.word_size().bytes() - 1);
    build_argument_block(mem, envp.len(), argv.len(), sp, stringp, push_ptr)
}

/// A contiguous, bounds-checked guest memory region.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    base: u64,
    bytes: Vec<u8>,
    word: WordSize,
    endian: Endian,
}

impl FlatMemory {
    /// Creates a zeroed region of `size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: u64, size: usize, word: WordSize, endian: Endian) -> Self {
        Self {
            base,
            bytes: vec![0; size],
            word,
            endian,
        }
    }

    /// First guest address of the region.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last guest address of the region.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    fn range(&self, addr: u64, len: usize) -> Result<core::ops::Range<usize>, ExecError> {
        addr.checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|start| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= self.bytes.len())
            .ok_or(ExecError::Fault { addr })
    }

    /// Reads one target word at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if the word lies outside the region.
    pub fn read_word(&self, addr: u64) -> Result<u64, ExecError> {
        let raw = &self.bytes[self.range(addr, self.word.width())?];
        let mut buf = [0u8; 8];
        Ok(match (self.word, self.endian) {
            (WordSize::W64, Endian::Little) => {
                buf.copy_from_slice(raw);
                u64::from_le_bytes(buf)
            }
            (WordSize::W64, Endian::Big) => {
                buf.copy_from_slice(raw);
                u64::from_be_bytes(buf)
            }
            (WordSize::W32, Endian::Little) => {
                u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            (WordSize::W32, Endian::Big) => {
                u64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
        })
    }

    /// Reads the NUL-terminated string at `addr` (without the NUL).
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] if the string leaves the region.
    pub fn read_cstr(&self, addr: u64) -> Result<&[u8], ExecError> {
        let len = usize::try_from(self.strlen(addr)?).map_err(|_| ExecError::Fault { addr })?;
        Ok(&self.bytes[self.range(addr, len)?])
    }
}

impl GuestMemory for FlatMemory {
    fn word_size(&self) -> WordSize {
        self.word
    }

    fn endian(&self) -> Endian {
        self.endian
    }

    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), ExecError> {
        let range = self.range(addr, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read_byte(&self, addr: u64) -> Result<u8, ExecError> {
        Ok(self.bytes[self.range(addr, 1)?][0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1000;
    const TOP: u64 = 0x2000;

    fn mem(word: WordSize, endian: Endian) -> FlatMemory {
        FlatMemory::new(BASE, (TOP - BASE) as usize, word, endian)
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn block_size_matches_layout() {
        for push_ptr in [false, true] {
            let mut m = mem(WordSize::W64, Endian::Little);
            let argv = strings(&["prog", "x"]);
            let envp = strings(&["A=1"]);
            let stringp = place_strings(&mut m, TOP, &argv, &envp).unwrap();
            let sp = stringp & !7;

            let block = build_argument_block(&mut m, 1, 2, sp, stringp, push_ptr).unwrap();
            let words = (1 + 1) + (2 + 1) + if push_ptr { 2 } else { 0 } + 1;
            assert_eq!(block.sp, sp - words * 8);
        }
    }

    #[test]
    fn tables_point_at_strings_and_end_in_null() {
        let mut m = mem(WordSize::W64, Endian::Little);
        let argv = strings(&["prog", "x"]);
        let envp = strings(&["A=1"]);
        let block = push_arguments(&mut m, TOP, &argv, &envp, false).unwrap();

        assert_eq!(m.read_word(block.sp).unwrap(), 2);
        let argv_base = block.sp + 8;
        assert_eq!(m.read_cstr(m.read_word(argv_base).unwrap()).unwrap(), b"prog");
        assert_eq!(m.read_cstr(m.read_word(argv_base + 8).unwrap()).unwrap(), b"x");
        assert_eq!(m.read_word(argv_base + 16).unwrap(), 0);

        let envp_base = argv_base + 24;
        assert_eq!(m.read_cstr(m.read_word(envp_base).unwrap()).unwrap(), b"A=1");
        assert_eq!(m.read_word(envp_base + 8).unwrap(), 0);
    }

    #[test]
    fn arg_range_covers_argument_strings() {
        let mut m = mem(WordSize::W64, Endian::Little);
        let argv = strings(&["prog", "x"]);
        let block = push_arguments(&mut m, TOP, &argv, &strings(&["A=1"]), false).unwrap();
        assert_eq!(block.arg_start, TOP - ("prog\0x\0A=1\0".len() as u64));
        assert_eq!(block.arg_end - block.arg_start, "prog\0x\0".len() as u64);
    }

    #[test]
    fn pushed_pointers_address_tables() {
        let mut m = mem(WordSize::W64, Endian::Little);
        let block =
            push_arguments(&mut m, TOP, &strings(&["a"]), &strings(&["E=1"]), true).unwrap();

        let argv_table = m.read_word(block.sp + 8).unwrap();
        let envp_table = m.read_word(block.sp + 16).unwrap();
        assert_eq!(argv_table, block.sp + 24);
        assert_eq!(envp_table, argv_table + 2 * 8);
        assert_eq!(m.read_cstr(m.read_word(envp_table).unwrap()).unwrap(), b"E=1");
    }

    #[test]
    fn word_encoding_follows_target() {
        let mut m = mem(WordSize::W32, Endian::Big);
        let block = push_arguments(&mut m, TOP, &strings(&["a", "b", "c"]), &[], false).unwrap();
        assert_eq!(block.sp % 4, 0);
        assert_eq!(m.read_byte(block.sp + 3).unwrap(), 3);
        assert_eq!(m.read_word(block.sp).unwrap(), 3);
        // argv[3] sits at sp + 4 + 3 * 4.
        assert_eq!(m.read_word(block.sp + 16).unwrap(), 0);
    }

    #[test]
    fn empty_vectors_still_terminate_tables() {
        let mut m = mem(WordSize::W64, Endian::Little);
        let block = push_arguments(&mut m, TOP, &[], &[], false).unwrap();
        assert_eq!(block.sp, TOP - 3 * 8);
        assert_eq!(m.read_word(block.sp).unwrap(), 0);
        assert_eq!(m.read_word(block.sp + 8).unwrap(), 0);
        assert_eq!(m.read_word(block.sp + 16).unwrap(), 0);
        assert_eq!(block.arg_start, block.arg_end);
    }

    #[test]
    fn write_fault_propagates() {
        let mut m = FlatMemory::new(BASE, 16, WordSize::W64, Endian::Little);
        let argv = strings(&["prog"]);
        let stringp = place_strings(&mut m, BASE + 16, &argv, &[]).unwrap();
        let err = build_argument_block(&mut m, 0, 1, stringp & !7, stringp, false).unwrap_err();
        assert!(matches!(err, ExecError::Fault { .. }));
    }

    #[test]
    fn strings_that_do_not_fit_fault() {
        let mut m = FlatMemory::new(BASE, 4, WordSize::W64, Endian::Little);
        assert!(matches!(
            place_strings(&mut m, BASE + 4, &strings(&["toolong"]), &[]),
            Err(ExecError::Fault { .. })
        ));
    }
}
