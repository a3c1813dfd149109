//! Configuration loading for muon.
//!
//! Parses an optional `muon.toml` and layers command-line values over it.
//! Precedence: flag > `MUON_LD_PREFIX` > file > built-in default.

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use muon_binfmt::{Endian, WordSize};
use serde::Deserialize;

/// File looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE: &str = "muon.toml";

/// Default scratch stack top; fits 32-bit targets.
pub const DEFAULT_STACK_TOP: u64 = 0xc000_0000;

/// Default scratch stack size.
pub const DEFAULT_STACK_SIZE: u64 = 0x1_0000;

/// Largest scratch stack `probe --layout` will allocate (256 MiB).
pub const MAX_STACK_SIZE: u64 = 0x1000_0000;

/// Contents of `muon.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub stack: StackSection,
}

/// `[stack]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub top: Option<u64>,
    pub size: Option<u64>,
    #[serde(default, rename = "word-size")]
    pub word_size: Option<u32>,
    pub endian: Option<EndianName>,
    #[serde(default, rename = "push-pointers")]
    pub push_pointers: Option<bool>,
}

/// Byte order as spelled in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndianName {
    Little,
    Big,
}

impl From<EndianName> for Endian {
    fn from(name: EndianName) -> Self {
        match name {
            EndianName::Little => Endian::Little,
            EndianName::Big => Endian::Big,
        }
    }
}

/// Fully resolved settings.
#[derive(Debug)]
pub struct Settings {
    /// Alternate root, `None` when translation is off.
    pub prefix: Option<String>,
    /// Guest environment strings.
    pub env: Vec<String>,
    pub stack: StackSettings,
}

/// Scratch guest stack used by `probe --layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSettings {
    pub top: u64,
    pub size: usize,
    /// `None` defers to the executable's header.
    pub word: Option<WordSize>,
    /// `None` defers to the executable's header.
    pub endian: Option<Endian>,
    pub push_pointers: bool,
}

/// Parses `muon.toml` contents.
pub fn parse(contents: &str) -> Result<FileConfig> {
    toml::from_str(contents).context("failed to parse muon configuration")
}

/// Loads `explicit`, or `muon.toml` from the working directory if present.
///
/// An explicit path must exist; the implicit one is optional.
pub fn load_file(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path,
        None if Path::new(CONFIG_FILE).is_file() => Path::new(CONFIG_FILE),
        None => return Ok(FileConfig::default()),
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    log::debug!("loaded configuration from {}", path.display());
    parse(&contents).with_context(|| format!("in {}", path.display()))
}

/// Layers command-line values over `file`.
///
/// `prefix` is the flag value with the environment fallback already applied.
pub fn resolve(prefix: Option<String>, env: Vec<String>, file: FileConfig) -> Result<Settings> {
    let stack = &file.stack;

    let word = match stack.word_size {
        None => None,
        Some(32) => Some(WordSize::W32),
        Some(64) => Some(WordSize::W64),
        Some(other) => bail!("stack word-size must be 32 or 64, got {other}"),
    };

    let top = stack.top.unwrap_or(DEFAULT_STACK_TOP);
    let size = stack.size.unwrap_or(DEFAULT_STACK_SIZE);
    ensure!(size > 0, "stack size must be non-zero");
    ensure!(
        size <= MAX_STACK_SIZE,
        "stack size {size:#x} exceeds the {MAX_STACK_SIZE:#x} byte limit"
    );
    ensure!(
        size <= top,
        "stack size {size:#x} extends below address zero from top {top:#x}"
    );
    let size = usize::try_from(size).context("stack size does not fit in host memory")?;

    Ok(Settings {
        prefix: prefix.or(file.prefix),
        env,
        stack: StackSettings {
            top,
            size,
            word,
            endian: stack.endian.map(Endian::from),
            push_pointers: stack.push_pointers.unwrap_or(false),
        },
    })
}
