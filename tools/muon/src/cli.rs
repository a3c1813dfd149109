//! Command-line interface definitions for muon.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Guest process bootstrap inspector.
#[derive(Parser)]
#[command(name = "muon", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Alternate root searched before the host filesystem.
    #[arg(long, short = 'L', global = true, env = "MUON_LD_PREFIX")]
    pub prefix: Option<String>,

    /// Add `KEY=VAL` to the guest environment (repeatable).
    #[arg(short = 'E', global = true, value_name = "KEY=VAL", value_parser = parse_env_assignment)]
    pub env: Vec<String>,

    /// Configuration file (default: ./muon.toml if present).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only report errors.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log loader decisions (`-vv` adds cache tracing).
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Print where each guest path is found on the host.
    Resolve(PathArgs),
    /// Print each path made absolute against the working directory.
    Absolute(PathArgs),
    /// Load an executable and report the resulting process image.
    Probe(ProbeArgs),
}

/// Arguments for `resolve` and `absolute`.
#[derive(Parser)]
pub struct PathArgs {
    /// Paths to process.
    #[arg(required = true)]
    pub paths: Vec<String>,
}

/// Arguments for the `probe` subcommand.
#[derive(Parser)]
pub struct ProbeArgs {
    /// Dump the argument block built on a scratch guest stack.
    #[arg(long)]
    pub layout: bool,

    /// Guest path of the executable.
    pub file: String,

    /// Arguments passed after the program name.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Accepts `KEY=VAL` with a non-empty key.
fn parse_env_assignment(raw: &str) -> Result<String, String> {
    match raw.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(raw.to_owned()),
        _ => Err(format!("expected KEY=VAL, got '{raw}'")),
    }
}
