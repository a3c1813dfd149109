//! Shebang (`#!`) script handling.
//!
//! A script header names an interpreter and at most one argument:
//!
//! ```text
//! #!/bin/sh -e
//! ```
//!
//! Resolution re-targets the load at the interpreter and splices the
//! argument vector to `[interpreter, argument?, script, argv[1..]]`. The
//! loader then probes the interpreter like any other candidate, so chains
//! of scripts compose up to the loader's depth limit.

use std::borrow::Cow;

use muon_path::PathResolver;

use crate::error::ExecError;
use crate::host::ExecHost;
use crate::program::{BinaryProgram, ExecSource};

/// Magic prefix of an interpreter script.
pub const SCRIPT_MAGIC: [u8; 2] = *b"#!";

/// Returns `true` if `header` begins with `#!`.
#[must_use]
pub fn is_script(header: &[u8]) -> bool {
    header.starts_with(&SCRIPT_MAGIC)
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_terminator(b: u8) -> bool {
    is_blank(b) || b == 0
}

/// A parsed `#!` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShebangLine {
    /// Interpreter path, exactly as written.
    pub interpreter: String,
    /// Optional single argument (internal whitespace preserved).
    pub argument: Option<String>,
}

impl ShebangLine {
    /// Parses the interpreter line out of a header buffer.
    ///
    /// `header` is the full, zero-padded header; the line need not end in a
    /// newline. Without one, the interpreter name must be followed by a
    /// blank or NUL somewhere in the buffer, otherwise it may have been
    /// truncated by the buffer boundary.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::MalformedInterpreterLine`] if the header is not a
    /// script, names no interpreter, appears truncated, or is not UTF-8.
    pub fn parse(header: &[u8]) -> Result<Self, ExecError> {
        if !is_script(header) {
            return Err(ExecError::MalformedInterpreterLine("missing #! marker"));
        }

        let end = match header.iter().position(|&b| b == b'\n') {
            Some(newline) => newline,
            None => {
                let last = header.len() - 1;
                let start = header[2..]
                    .iter()
                    .position(|&b| !is_blank(b))
                    .map(|i| i + 2)
                    .ok_or(ExecError::MalformedInterpreterLine("no interpreter name"))?;
                if !header[start..].iter().copied().any(is_terminator) {
                    return Err(ExecError::MalformedInterpreterLine("truncated interpreter path"));
                }
                // The final buffer byte is reserved for the terminator.
                last
            }
        };

        let mut line = header.get(2..end).unwrap_or_default();
        if let Some(nul) = line.iter().position(|&b| b == 0) {
            line = &line[..nul];
        }
        let line = trim_blanks(line);

        if line.is_empty() {
            return Err(ExecError::MalformedInterpreterLine("no interpreter name"));
        }

        let (name, rest) = match line.iter().position(|&b| is_blank(b)) {
            Some(sep) => (&line[..sep], trim_blanks(&line[sep..])),
            None => (line, &[][..]),
        };

        let interpreter = std::str::from_utf8(name)
            .map_err(|_| ExecError::MalformedInterpreterLine("interpreter path is not UTF-8"))?
            .to_owned();
        let argument = if rest.is_empty() {
            None
        } else {
            Some(
                std::str::from_utf8(rest)
                    .map_err(|_| ExecError::MalformedInterpreterLine("argument is not UTF-8"))?
                    .to_owned(),
            )
        };

        Ok(Self {
            interpreter,
            argument,
        })
    }

    /// Builds the interpreter's argument vector.
    ///
    /// The script's own `argv[0]` is dropped in favour of `script`, the
    /// path the interpreter must open.
    #[must_use]
    pub fn splice_argv(&self, script: &str, argv: &[String]) -> Vec<String> {
        let tail = argv.get(1..).unwrap_or_default();
        let mut out = Vec::with_capacity(tail.len() + 3);
        out.push(self.interpreter.clone());
        out.extend(self.argument.iter().cloned());
        out.push(script.to_owned());
        out.extend_from_slice(tail);
        out
    }
}

/// Strips leading and trailing spaces and tabs.
fn trim_blanks(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_blank(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !is_blank(b)).map_or(start, |i| i + 1);
    &bytes[start..end.max(start)]
}

/// Re-targets `program` at the interpreter named by its `#!` header.
///
/// The interpreter is opened through `host`, after translation by `paths`
/// when given; the guest-visible name stays untranslated. The script's file
/// is retained in `program`, not closed.
///
/// # Errors
///
/// Returns [`ExecError::MalformedInterpreterLine`] for an unusable `#!` line
/// or [`ExecError::InterpreterNotFound`] if the interpreter cannot be opened.
pub fn resolve_script(
    program: &mut BinaryProgram,
    host: &dyn ExecHost,
    paths: Option<&PathResolver>,
) -> Result<(), ExecError> {
    let line = ShebangLine::parse(program.header())?;

    let file = {
        let host_path = paths.map_or(Cow::Borrowed(line.interpreter.as_str()), |paths| {
            paths.resolve(&line.interpreter)
        });
        log::debug!(
            "{}: interpreter {} (opening {host_path})",
            program.filename(),
            line.interpreter
        );
        host.open(&host_path)
            .map_err(|source| ExecError::InterpreterNotFound {
                path: line.interpreter.clone(),
                source,
            })?
    };

    let argv = line.splice_argv(program.filename(), program.argv());
    program.retarget(
        ExecSource {
            file,
            name: line.interpreter,
        },
        argv,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::HEADER_SIZE;

    /// Zero-pads `text` to a full header.
    fn header(text: &[u8]) -> [u8; HEADER_SIZE] {
        let mut buf = [0; HEADER_SIZE];
        buf[..text.len()].copy_from_slice(text);
        buf
    }

    fn parse(text: &[u8]) -> Result<ShebangLine, ExecError> {
        ShebangLine::parse(&header(text))
    }

    fn line(interpreter: &str, argument: Option<&str>) -> ShebangLine {
        ShebangLine {
            interpreter: interpreter.into(),
            argument: argument.map(Into::into),
        }
    }

    #[test]
    fn interpreter_with_argument() {
        assert_eq!(parse(b"#!/bin/sh -e\n").unwrap(), line("/bin/sh", Some("-e")));
    }

    #[test]
    fn interpreter_only() {
        assert_eq!(parse(b"#!/bin/sh\necho hi\n").unwrap(), line("/bin/sh", None));
    }

    #[test]
    fn blanks_are_trimmed() {
        assert_eq!(
            parse(b"#! \t/usr/bin/env  python3 \t\n").unwrap(),
            line("/usr/bin/env", Some("python3"))
        );
    }

    #[test]
    fn argument_keeps_internal_whitespace() {
        assert_eq!(
            parse(b"#!/usr/bin/awk -f -v x=1\n").unwrap(),
            line("/usr/bin/awk", Some("-f -v x=1"))
        );
    }

    #[test]
    fn missing_newline_in_short_file() {
        assert_eq!(parse(b"#!/bin/sh").unwrap(), line("/bin/sh", None));
    }

    #[test]
    fn embedded_nul_ends_line() {
        assert_eq!(parse(b"#!/bin/sh\0 -x\n").unwrap(), line("/bin/sh", None));
    }

    #[test]
    fn blank_line_is_malformed() {
        assert!(matches!(
            parse(b"#!   \n"),
            Err(ExecError::MalformedInterpreterLine(_))
        ));
    }

    #[test]
    fn all_blank_buffer_is_malformed() {
        let mut buf = [b' '; HEADER_SIZE];
        buf[..2].copy_from_slice(b"#!");
        assert!(matches!(
            ShebangLine::parse(&buf),
            Err(ExecError::MalformedInterpreterLine("no interpreter name"))
        ));
    }

    #[test]
    fn truncated_path_is_malformed() {
        let mut buf = [b'a'; HEADER_SIZE];
        buf[..3].copy_from_slice(b"#!/");
        assert!(matches!(
            ShebangLine::parse(&buf),
            Err(ExecError::MalformedInterpreterLine("truncated interpreter path"))
        ));
    }

    #[test]
    fn full_buffer_without_newline_drops_last_byte() {
        let mut buf = [b'a'; HEADER_SIZE];
        buf[..10].copy_from_slice(b"#!/bin/sh ");
        let parsed = ShebangLine::parse(&buf).unwrap();
        assert_eq!(parsed.interpreter, "/bin/sh");
        assert_eq!(parsed.argument.unwrap().len(), HEADER_SIZE - 11);
    }

    #[test]
    fn non_utf8_interpreter_is_malformed() {
        assert!(matches!(
            parse(b"#!/bin/\xff\n"),
            Err(ExecError::MalformedInterpreterLine(_))
        ));
    }

    #[test]
    fn splice_replaces_argv0_with_script_name() {
        let argv = vec!["script".to_owned(), "x".to_owned()];
        let spliced = line("/bin/sh", Some("-e")).splice_argv("script", &argv);
        assert_eq!(spliced, ["/bin/sh", "-e", "script", "x"]);

        let spliced = line("/bin/sh", None).splice_argv("/home/u/run.sh", &["run".to_owned()]);
        assert_eq!(spliced, ["/bin/sh", "/home/u/run.sh"]);
    }

    #[test]
    fn splice_tolerates_empty_argv() {
        let spliced = line("/bin/sh", None).splice_argv("s", &[]);
        assert_eq!(spliced, ["/bin/sh", "s"]);
    }
}
