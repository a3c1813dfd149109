//! Header-level identification of ELF and bFLT images.
//!
//! These handlers only read the 128-byte header the loader has already
//! fetched; they map nothing into guest memory. That is enough for `probe`
//! to report what a real format loader would be handed.

use muon_binfmt::error::errno;
use muon_binfmt::{
    BinaryFormat, BinaryProgram, Endian, FormatError, ImageInfo, ThreadInit, WordSize, is_elf,
    is_flat,
};

/// ELF class: 32-bit.
const ELFCLASS32: u8 = 1;

/// ELF class: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF data encoding: big-endian.
const ELFDATA2MSB: u8 = 2;

/// Size of an ELF32 file header.
const ELF32_EHDR_SIZE: usize = 52;

/// Size of an ELF64 file header.
const ELF64_EHDR_SIZE: usize = 64;

/// Size of a bFLT header.
const FLAT_HDR_SIZE: usize = 64;

/// bFLT revision understood here.
const FLAT_VERSION: u32 = 4;

fn u16_at(data: &[u8], off: usize, endian: Endian) -> u16 {
    let bytes = [data[off], data[off + 1]];
    match endian {
        Endian::Little => u16::from_le_bytes(bytes),
        Endian::Big => u16::from_be_bytes(bytes),
    }
}

fn u32_at(data: &[u8], off: usize, endian: Endian) -> u32 {
    let bytes = [data[off], data[off + 1], data[off + 2], data[off + 3]];
    match endian {
        Endian::Little => u32::from_le_bytes(bytes),
        Endian::Big => u32::from_be_bytes(bytes),
    }
}

fn u64_at(data: &[u8], off: usize, endian: Endian) -> u64 {
    let first = u64::from(u32_at(data, off, endian));
    let second = u64::from(u32_at(data, off + 4, endian));
    match endian {
        Endian::Little => first | (second << 32),
        Endian::Big => (first << 32) | second,
    }
}

fn noexec(message: &str) -> FormatError {
    FormatError::new(errno::ENOEXEC, message)
}

/// Identification fields of an ELF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: WordSize,
    pub endian: Endian,
    /// `e_type`
    pub kind: u16,
    /// `e_machine`
    pub machine: u16,
    pub entry: u64,
}

impl ElfHeader {
    /// Parses the identification fields from the start of `header`.
    pub fn parse(header: &[u8]) -> Result<Self, FormatError> {
        if !is_elf(header) || header.len() < 6 {
            return Err(noexec("not an ELF image"));
        }
        let (class, min_len) = match header[4] {
            ELFCLASS32 => (WordSize::W32, ELF32_EHDR_SIZE),
            ELFCLASS64 => (WordSize::W64, ELF64_EHDR_SIZE),
            other => return Err(noexec(&format!("unsupported ELF class {other}"))),
        };
        let endian = match header[5] {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            other => return Err(noexec(&format!("unsupported ELF data encoding {other}"))),
        };
        if header.len() < min_len {
            return Err(noexec("truncated ELF header"));
        }

        let entry = match class {
            WordSize::W32 => u64::from(u32_at(header, 24, endian)),
            WordSize::W64 => u64_at(header, 24, endian),
        };
        Ok(Self {
            class,
            endian,
            kind: u16_at(header, 16, endian),
            machine: u16_at(header, 18, endian),
            entry,
        })
    }
}

/// Identification fields of a bFLT header. Always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatHeader {
    pub entry: u32,
    pub data_start: u32,
    pub bss_end: u32,
    pub stack_size: u32,
}

impl FlatHeader {
    /// Parses the fixed bFLT header.
    pub fn parse(header: &[u8]) -> Result<Self, FormatError> {
        if !is_flat(header) || header.len() < FLAT_HDR_SIZE {
            return Err(noexec("truncated bFLT header"));
        }
        let revision = u32_at(header, 4, Endian::Big);
        if revision != FLAT_VERSION {
            return Err(noexec(&format!("unsupported bFLT revision {revision}")));
        }
        Ok(Self {
            entry: u32_at(header, 8, Endian::Big),
            data_start: u32_at(header, 12, Endian::Big),
            bss_end: u32_at(header, 20, Endian::Big),
            stack_size: u32_at(header, 24, Endian::Big),
        })
    }
}

/// Accepts ELF images of either class and byte order.
pub struct ElfIdent;

impl BinaryFormat for ElfIdent {
    fn name(&self) -> &'static str {
        "ELF"
    }

    fn probe(&self, header: &[u8]) -> bool {
        is_elf(header)
    }

    fn load(&self, program: &mut BinaryProgram) -> Result<ImageInfo, FormatError> {
        let elf = ElfHeader::parse(&program.header()[..program.header_len()])?;
        Ok(ImageInfo {
            format: "ELF",
            entry: elf.entry,
            ..ImageInfo::default()
        })
    }
}

/// Accepts revision 4 bFLT images.
pub struct FlatIdent;

impl BinaryFormat for FlatIdent {
    fn name(&self) -> &'static str {
        "bFLT"
    }

    fn probe(&self, header: &[u8]) -> bool {
        is_flat(header)
    }

    fn load(&self, program: &mut BinaryProgram) -> Result<ImageInfo, FormatError> {
        let flat = FlatHeader::parse(&program.header()[..program.header_len()])?;
        Ok(ImageInfo {
            format: "bFLT",
            entry: u64::from(flat.entry),
            start_code: FLAT_HDR_SIZE as u64,
            end_code: u64::from(flat.data_start),
            ..ImageInfo::default()
        })
    }
}

/// Register state at guest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub pc: u64,
    pub sp: u64,
}

/// Builds [`EntryState`] from the loaded image.
pub struct EntryInit;

impl ThreadInit for EntryInit {
    type Regs = EntryState;

    fn init_thread(&self, image: &ImageInfo) -> EntryState {
        EntryState {
            pc: image.entry,
            sp: image.start_stack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elf(class: u8, data: u8) -> [u8; 128] {
        let mut buf = [0u8; 128];
        buf[..4].copy_from_slice(b"\x7fELF");
        buf[4] = class;
        buf[5] = data;
        buf
    }

    #[test]
    fn elf64_little() {
        let mut buf = elf(ELFCLASS64, ELFDATA2LSB);
        buf[16..18].copy_from_slice(&2u16.to_le_bytes());
        buf[18..20].copy_from_slice(&62u16.to_le_bytes());
        buf[24..32].copy_from_slice(&0x0040_1000u64.to_le_bytes());

        let hdr = ElfHeader::parse(&buf).unwrap();
        assert_eq!(hdr.class, WordSize::W64);
        assert_eq!(hdr.endian, Endian::Little);
        assert_eq!(hdr.kind, 2);
        assert_eq!(hdr.machine, 62);
        assert_eq!(hdr.entry, 0x0040_1000);
    }

    #[test]
    fn elf32_big() {
        let mut buf = elf(ELFCLASS32, ELFDATA2MSB);
        buf[18..20].copy_from_slice(&8u16.to_be_bytes());
        buf[24..28].copy_from_slice(&0x0040_0130u32.to_be_bytes());
        buf[28..32].copy_from_slice(&[0xff; 4]);

        let hdr = ElfHeader::parse(&buf).unwrap();
        assert_eq!(hdr.class, WordSize::W32);
        assert_eq!(hdr.endian, Endian::Big);
        assert_eq!(hdr.machine, 8);
        assert_eq!(hdr.entry, 0x0040_0130);
    }

    #[test]
    fn elf64_big_entry() {
        let mut buf = elf(ELFCLASS64, ELFDATA2MSB);
        buf[24..32].copy_from_slice(&0x1234_5678_9abc_def0u64.to_be_bytes());
        assert_eq!(ElfHeader::parse(&buf).unwrap().entry, 0x1234_5678_9abc_def0);
    }

    #[test]
    fn elf_rejects() {
        let err = ElfHeader::parse(&elf(3, ELFDATA2LSB)).unwrap_err();
        assert_eq!(err.errno, errno::ENOEXEC);
        assert!(ElfHeader::parse(&elf(ELFCLASS64, 0)).is_err());
        assert!(ElfHeader::parse(&elf(ELFCLASS64, ELFDATA2LSB)[..40]).is_err());
        assert!(ElfHeader::parse(&elf(ELFCLASS32, ELFDATA2LSB)[..52]).is_ok());
        assert!(ElfHeader::parse(b"#!/bin/sh\n").is_err());
    }

    #[test]
    fn flat_header() {
        let mut buf = [0u8; 128];
        buf[..4].copy_from_slice(b"bFLT");
        buf[4..8].copy_from_slice(&4u32.to_be_bytes());
        buf[8..12].copy_from_slice(&0x40u32.to_be_bytes());
        buf[12..16].copy_from_slice(&0x1000u32.to_be_bytes());
        buf[20..24].copy_from_slice(&0x2000u32.to_be_bytes());
        buf[24..28].copy_from_slice(&0x800u32.to_be_bytes());

        let hdr = FlatHeader::parse(&buf).unwrap();
        assert_eq!(
            hdr,
            FlatHeader {
                entry: 0x40,
                data_start: 0x1000,
                bss_end: 0x2000,
                stack_size: 0x800,
            }
        );

        buf[4..8].copy_from_slice(&2u32.to_be_bytes());
        assert!(FlatHeader::parse(&buf).is_err());
    }

    #[test]
    fn entry_state_from_image() {
        let image = ImageInfo {
            entry: 0x1000,
            start_stack: 0x7fff_0000,
            ..ImageInfo::default()
        };
        assert_eq!(
            EntryInit.init_thread(&image),
            EntryState {
                pc: 0x1000,
                sp: 0x7fff_0000
            }
        );
    }
}
