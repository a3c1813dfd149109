//! Stderr backend for the `log` facade.
//!
//! Three output levels controlled by CLI flags:
//! - **Quiet** (`-q`): errors only
//! - **Default** (no flag): errors and warnings
//! - **Verbose** (`-v`): loader decisions; `-vv` adds resolver cache tracing

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Default,
    Verbose,
    Trace,
}

impl Verbosity {
    /// Maps the `-q` flag and `-v` count to a level.
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Default,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::Error,
            Self::Default => LevelFilter::Warn,
            Self::Verbose => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

/// Fixed-width level name for aligned output.
const fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] {}: {}",
            level_name(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Installs the stderr logger at `verbosity`. Later calls only adjust the level.
pub fn init(verbosity: Verbosity) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(verbosity.filter());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_to_verbosity() {
        assert_eq!(Verbosity::from_flags(true, 0), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Default);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 4), Verbosity::Trace);
    }

    #[test]
    fn quieter_levels_filter_more() {
        assert!(Verbosity::Quiet.filter() < Verbosity::Default.filter());
        assert!(Verbosity::Default.filter() < Verbosity::Verbose.filter());
        assert_eq!(Verbosity::Trace.filter(), LevelFilter::Trace);
    }

    #[test]
    fn level_names_align() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            assert_eq!(level_name(level).len(), 5);
        }
    }
}
