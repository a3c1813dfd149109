//! The load state machine.
//!
//! Each iteration probes the current source: [`BinaryProgram::prepare`]
//! validates it and reads its header, then the header decides between a
//! registered format handler (dispatched, terminal), `#!` resolution
//! (re-targeted, probe again) or rejection. A script chain may re-target at
//! most [`MAX_INDIRECTIONS`] times.

use std::borrow::Cow;
use std::sync::Arc;

use muon_path::PathResolver;

use crate::error::ExecError;
use crate::format::{BinaryFormat, ImageInfo, ThreadInit};
use crate::host::{ExecFile, ExecHost};
use crate::program::BinaryProgram;
use crate::script::{is_script, resolve_script};
use crate::stack::{self, ArgBlock, GuestMemory};

/// Maximum number of `#!` hops before a load fails with
/// [`ExecError::TooManyIndirections`].
pub const MAX_INDIRECTIONS: usize = 5;

/// Outcome of probing one candidate.
enum Step {
    /// A `#!` line re-targeted the program; probe again.
    Resolved,
    /// A format handler loaded the image.
    Dispatched(ImageInfo),
}

/// What a header looks like.
enum Sniff<'a> {
    Handler(&'a dyn BinaryFormat),
    Script,
    Unknown,
}

/// A successfully loaded image.
#[derive(Debug)]
pub struct Loaded<R> {
    /// The handler's image description.
    pub image: ImageInfo,
    /// Initial register state.
    pub regs: R,
    /// The final request, including sources superseded by interpreters.
    pub program: BinaryProgram,
}

impl<R> Loaded<R> {
    /// Lays out the final argument and environment vectors below `top` and
    /// records the argument string range in the image.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Fault`] on the first failed guest write.
    pub fn push_arguments(
        &mut self,
        mem: &mut dyn GuestMemory,
        top: u64,
        push_ptr: bool,
    ) -> Result<ArgBlock, ExecError> {
        let program = &self.program;
        let block = stack::push_arguments(mem, top, program.argv(), program.envp(), push_ptr)?;
        self.image.set_args(block.arg_start, block.arg_end);
        Ok(block)
    }
}

/// Turns candidate executables into loaded images.
pub struct Loader<T> {
    formats: Vec<Box<dyn BinaryFormat>>,
    host: Arc<dyn ExecHost>,
    paths: Option<Arc<PathResolver>>,
    thread: T,
}

impl<T: ThreadInit> Loader<T> {
    /// Creates a loader with no registered formats.
    pub fn new(host: Arc<dyn ExecHost>, thread: T) -> Self {
        Self {
            formats: Vec::new(),
            host,
            paths: None,
            thread,
        }
    }

    /// Registers a format handler. Handlers are probed in registration order.
    #[must_use]
    pub fn with_format(mut self, format: impl BinaryFormat + 'static) -> Self {
        self.formats.push(Box::new(format));
        self
    }

    /// Translates interpreter and executable paths through `paths`.
    #[must_use]
    pub fn with_paths(mut self, paths: Arc<PathResolver>) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Names of the registered formats, in probe order.
    pub fn formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.iter().map(|f| f.name())
    }

    /// Loads the already-open `file`, requested as `filename`.
    ///
    /// Follows `#!` interpreters until a registered format accepts the
    /// candidate, then initializes the entry register state.
    ///
    /// # Errors
    ///
    /// Returns the first [`ExecError`] encountered: validation failures
    /// from [`BinaryProgram::prepare`], [`ExecError::NotExecutable`] for an
    /// unrecognised header, script resolution failures,
    /// [`ExecError::TooManyIndirections`], or the handler's own error.
    pub fn load(
        &self,
        file: Box<dyn ExecFile>,
        filename: &str,
        argv: Vec<String>,
        envp: Vec<String>,
    ) -> Result<Loaded<T::Regs>, ExecError> {
        let caller = self.host.credentials().map_err(ExecError::Io)?;
        let mut program = BinaryProgram::new(file, filename, argv, envp);

        let mut depth = 0;
        let image = loop {
            if depth > MAX_INDIRECTIONS {
                log::warn!("{filename}: interpreter chain deeper than {MAX_INDIRECTIONS}");
                return Err(ExecError::TooManyIndirections);
            }
            match self.step(&mut program, caller)? {
                Step::Resolved => depth += 1,
                Step::Dispatched(image) => break image,
            }
        };

        let regs = self.thread.init_thread(&image);
        Ok(Loaded {
            image,
            regs,
            program,
        })
    }

    /// Opens `path` (translated through the attached resolver) and loads it.
    ///
    /// The guest-visible filename stays `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotAccessible`] if the file cannot be opened,
    /// otherwise as [`Loader::load`].
    pub fn load_path(
        &self,
        path: &str,
        argv: Vec<String>,
        envp: Vec<String>,
    ) -> Result<Loaded<T::Regs>, ExecError> {
        let file = {
            let host_path = self
                .paths
                .as_deref()
                .map_or(Cow::Borrowed(path), |paths| paths.resolve(path));
            self.host.open(&host_path).map_err(ExecError::NotAccessible)?
        };
        self.load(file, path, argv, envp)
    }

    fn step(
        &self,
        program: &mut BinaryProgram,
        caller: crate::host::Credentials,
    ) -> Result<Step, ExecError> {
        program.prepare(caller)?;

        match self.sniff(program.header()) {
            Sniff::Handler(format) => {
                log::debug!("{}: dispatching to {} loader", program.filename(), format.name());
                format
                    .load(program)
                    .map(Step::Dispatched)
                    .map_err(|error| ExecError::Format {
                        format: format.name(),
                        error,
                    })
            }
            Sniff::Script => {
                resolve_script(program, &*self.host, self.paths.as_deref())?;
                Ok(Step::Resolved)
            }
            Sniff::Unknown => {
                log::warn!("{}: unrecognised executable format", program.filename());
                Err(ExecError::NotExecutable)
            }
        }
    }

    fn sniff(&self, header: &[u8]) -> Sniff<'_> {
        if let Some(format) = self.formats.iter().find(|f| f.probe(header)) {
            Sniff::Handler(format.as_ref())
        } else if is_script(header) {
            Sniff::Script
        } else {
            Sniff::Unknown
        }
    }
}
