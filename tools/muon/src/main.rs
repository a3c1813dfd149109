//! muon guest bootstrap inspector.
//!
//! Drives the muon path resolver and executable loader from the command
//! line: shows where guest paths land on the host, and what process image
//! (format, entry point, final argument vector, stack block) a guest
//! `execve` of a given file would produce.

#[cfg(not(target_os = "linux"))]
compile_error!("muon loads Linux guest executables and needs a Linux host");

mod cli;
mod config;
mod ident;
mod logger;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use muon_binfmt::{
    ArgBlock, Endian, FlatMemory, GuestMemory, HostSystem, Loaded, Loader, WordSize,
};
use muon_path::{PathResolver, make_absolute};

use config::Settings;
use ident::{ElfHeader, EntryInit, EntryState};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logger::init(logger::Verbosity::from_flags(cli.quiet, cli.verbose));

    let file = config::load_file(cli.config.as_deref())?;
    let settings = config::resolve(cli.prefix.clone(), cli.env.clone(), file)?;

    match cli.command {
        cli::Command::Resolve(ref args) => cmd_resolve(&settings, &args.paths),
        cli::Command::Absolute(ref args) => cmd_absolute(&args.paths),
        cli::Command::Probe(ref args) => cmd_probe(&settings, args),
    }
}

fn build_resolver(settings: &Settings) -> Result<PathResolver> {
    match settings.prefix.as_deref() {
        Some(prefix) => PathResolver::new(prefix)
            .with_context(|| format!("cannot use '{prefix}' as alternate root")),
        None => Ok(PathResolver::disabled()),
    }
}

// ===========================================================================
// Commands
// ===========================================================================

/// Print the host path each guest path resolves to.
fn cmd_resolve(settings: &Settings, paths: &[String]) -> Result<()> {
    let resolver = build_resolver(settings)?;
    for path in paths {
        println!("{}", resolver.resolve(path));
    }
    log::debug!("{} cached translation(s)", resolver.cached_len());
    Ok(())
}

/// Print each path made absolute.
fn cmd_absolute(paths: &[String]) -> Result<()> {
    for path in paths {
        let absolute =
            make_absolute(path).with_context(|| format!("cannot make '{path}' absolute"))?;
        println!("{absolute}");
    }
    Ok(())
}

/// Load a file the way a guest `execve` would and report the result.
fn cmd_probe(settings: &Settings, args: &cli::ProbeArgs) -> Result<()> {
    let loader = Loader::new(Arc::new(HostSystem), EntryInit)
        .with_format(ident::ElfIdent)
        .with_format(ident::FlatIdent)
        .with_paths(Arc::new(build_resolver(settings)?));

    let mut argv = Vec::with_capacity(args.args.len() + 1);
    argv.push(args.file.clone());
    argv.extend(args.args.iter().cloned());

    let mut loaded = loader
        .load_path(&args.file, argv, settings.env.clone())
        .with_context(|| format!("cannot execute '{}'", args.file))?;

    let elf = ElfHeader::parse(&loaded.program.header()[..loaded.program.header_len()]).ok();
    print_image(&loaded, elf.as_ref());

    if args.layout {
        let word = settings.stack.word.or(elf.map(|h| h.class)).unwrap_or(WordSize::W64);
        let endian = settings.stack.endian.or(elf.map(|h| h.endian)).unwrap_or(Endian::Little);
        let stack = &settings.stack;
        let mut mem = FlatMemory::new(stack.top - stack.size as u64, stack.size, word, endian);

        let block = loaded
            .push_arguments(&mut mem, stack.top, stack.push_pointers)
            .context("argument block does not fit the scratch stack")?;
        println!(
            "{:<10} {:#x}..{:#x} ({}-bit {})",
            "stack:",
            mem.base(),
            mem.end(),
            word.bytes() * 8,
            endian_name(endian)
        );
        print_layout(&mem, &block, &loaded, stack.push_pointers)?;
    }
    Ok(())
}

fn endian_name(endian: Endian) -> &'static str {
    match endian {
        Endian::Little => "little-endian",
        Endian::Big => "big-endian",
    }
}

fn print_image(loaded: &Loaded<EntryState>, elf: Option<&ElfHeader>) {
    let program = &loaded.program;

    match elf {
        Some(elf) => println!(
            "{:<10} {} (ELF{}, {}, machine {})",
            "format:",
            loaded.image.format,
            elf.class.bytes() * 8,
            endian_name(elf.endian),
            elf.machine
        ),
        None => println!("{:<10} {}", "format:", loaded.image.format),
    }
    println!("{:<10} {}", "file:", program.filename());
    for source in program.retained() {
        println!("{:<10} {}", "via:", source.name);
    }
    println!("{:<10} {:#x}", "entry:", loaded.regs.pc);
    println!("{:<10} {}", "euid:", program.euid());
    println!("{:<10} {}", "egid:", program.egid());
    for (i, arg) in program.argv().iter().enumerate() {
        println!("{:<10} {arg}", format!("argv[{i}]:"));
    }
    for (i, var) in program.envp().iter().enumerate() {
        println!("{:<10} {var}", format!("envp[{i}]:"));
    }
}

/// Walks the block from `sp` upwards, printing each slot.
fn print_layout(
    mem: &FlatMemory,
    block: &ArgBlock,
    loaded: &Loaded<EntryState>,
    push_pointers: bool,
) -> Result<()> {
    let n = mem.word_size().bytes();
    let mut addr = block.sp;

    println!("{:<10} {:#x}", "sp:", block.sp);
    println!("{:<10} {:#x}..{:#x}", "strings:", block.arg_start, block.arg_end);

    println!("  {addr:#x}  argc      {}", mem.read_word(addr)?);
    addr += n;
    if push_pointers {
        println!("  {addr:#x}  &argv     {:#x}", mem.read_word(addr)?);
        addr += n;
        println!("  {addr:#x}  &envp     {:#x}", mem.read_word(addr)?);
        addr += n;
    }

    for (table, count) in [("argv", loaded.program.argc()), ("envp", loaded.program.envc())] {
        for i in 0..=count {
            let slot = format!("{table}[{i}]");
            let ptr = mem.read_word(addr)?;
            if i == count {
                println!("  {addr:#x}  {slot:<9} NULL");
            } else {
                let text = String::from_utf8_lossy(mem.read_cstr(ptr)?);
                println!("  {addr:#x}  {slot:<9} {ptr:#x} {text:?}");
            }
            addr += n;
        }
    }
    Ok(())
}
