//! Memoizing alternate-root resolver.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::PathError;
use crate::path::{is_absolute, join, make_absolute};

/// Existence check used to decide whether a translated path is taken.
///
/// Only existence matters: no permission or file-type checks. The host
/// implementation follows symlinks, like `access(F_OK)`.
pub trait PathProbe: Send + Sync {
    /// Returns `true` if `path` exists.
    fn exists(&self, path: &str) -> bool;
}

/// [`PathProbe`] backed by the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl PathProbe for HostProbe {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// Translation state for an enabled resolver.
struct Translation {
    /// Absolute alternate root.
    prefix: String,
    /// Requested path → translated path, or `None` to pass through.
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl Translation {
    /// Locks the cache. The cache is append-only, so a poisoned lock
    /// still guards consistent entries.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Option<String>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Redirects absolute guest paths into an alternate root.
///
/// Constructed once at startup and shared (typically behind an `Arc`) by
/// every component that performs guest filesystem lookups. A resolver
/// built from an empty prefix or `/` is a pass-through.
pub struct PathResolver {
    translation: Option<Translation>,
    probe: Box<dyn PathProbe>,
}

impl PathResolver {
    /// Creates a resolver for `prefix`, probing the host filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if a relative prefix cannot be anchored at the
    /// current working directory.
    pub fn new(prefix: &str) -> Result<Self, PathError> {
        Self::with_probe(prefix, HostProbe)
    }

    /// Creates a resolver for `prefix` with a custom existence probe.
    ///
    /// # Errors
    ///
    /// See [`PathResolver::new`].
    pub fn with_probe(prefix: &str, probe: impl PathProbe + 'static) -> Result<Self, PathError> {
        let translation = if prefix.is_empty() || prefix == "/" {
            log::debug!("path translation disabled");
            None
        } else {
            let prefix = make_absolute(prefix)?.into_owned();
            log::debug!("path translation rooted at {prefix}");
            Some(Translation {
                prefix,
                cache: Mutex::new(HashMap::new()),
            })
        };

        Ok(Self {
            translation,
            probe: Box::new(probe),
        })
    }

    /// Creates a resolver that never translates.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            translation: None,
            probe: Box::new(HostProbe),
        }
    }

    /// Returns `true` if lookups may be redirected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.translation.is_some()
    }

    /// Returns the absolute alternate root, if translation is enabled.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.translation.as_ref().map(|t| t.prefix.as_str())
    }

    /// Number of distinct paths recorded so far.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.translation.as_ref().map_or(0, |t| t.lock().len())
    }

    /// Resolves `requested` against the alternate root.
    ///
    /// Relative and empty paths are never translated. For an absolute path
    /// the first lookup probes `prefix + requested` and records the outcome;
    /// every later lookup of the same path reuses it. The probe runs with
    /// the cache lock held, so each distinct path is probed at most once
    /// even under concurrent callers.
    pub fn resolve<'a>(&self, requested: &'a str) -> Cow<'a, str> {
        let Some(translation) = &self.translation else {
            return Cow::Borrowed(requested);
        };
        if !is_absolute(requested) {
            return Cow::Borrowed(requested);
        }

        let mut cache = translation.lock();
        if let Some(entry) = cache.get(requested) {
            log::trace!("path cache hit: {requested}");
            return match entry {
                Some(translated) => Cow::Owned(translated.clone()),
                None => Cow::Borrowed(requested),
            };
        }

        let candidate = join(&translation.prefix, requested);
        if self.probe.exists(&candidate) {
            log::debug!("translated {requested} -> {candidate}");
            cache.insert(requested.to_owned(), Some(candidate.clone()));
            Cow::Owned(candidate)
        } else {
            log::trace!("no translation for {requested}");
            cache.insert(requested.to_owned(), None);
            Cow::Borrowed(requested)
        }
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::disabled()
    }
}

impl core::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PathResolver")
            .field("prefix", &self.prefix())
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Probe that reports a fixed set of paths and counts every call.
    #[derive(Clone, Default)]
    struct CountingProbe {
        present: Arc<Vec<String>>,
        calls: Arc<AtomicUsize>,
    }

    impl CountingProbe {
        fn with(paths: &[&str]) -> Self {
            Self {
                present: Arc::new(paths.iter().map(|p| (*p).to_owned()).collect()),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PathProbe for CountingProbe {
        fn exists(&self, path: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.present.iter().any(|p| p == path)
        }
    }

    #[test]
    fn empty_prefix_passes_through() {
        let probe = CountingProbe::with(&[]);
        let resolver = PathResolver::with_probe("", probe.clone()).unwrap();
        assert!(!resolver.is_enabled());
        assert_eq!(resolver.resolve("/etc/passwd"), "/etc/passwd");
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn root_prefix_passes_through() {
        let resolver = PathResolver::with_probe("/", CountingProbe::with(&[])).unwrap();
        assert!(!resolver.is_enabled());
        assert!(matches!(resolver.resolve("/etc/passwd"), Cow::Borrowed(_)));
    }

    #[test]
    fn existing_path_is_translated_and_memoized() {
        let probe = CountingProbe::with(&["/alt/root/etc/passwd"]);
        let resolver = PathResolver::with_probe("/alt/root", probe.clone()).unwrap();

        assert_eq!(resolver.resolve("/etc/passwd"), "/alt/root/etc/passwd");
        assert_eq!(resolver.resolve("/etc/passwd"), "/alt/root/etc/passwd");
        assert_eq!(probe.calls(), 1);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[test]
    fn missing_path_passes_through_and_is_memoized() {
        let probe = CountingProbe::with(&[]);
        let resolver = PathResolver::with_probe("/alt/root", probe.clone()).unwrap();

        assert!(matches!(resolver.resolve("/etc/hosts"), Cow::Borrowed("/etc/hosts")));
        assert!(matches!(resolver.resolve("/etc/hosts"), Cow::Borrowed("/etc/hosts")));
        assert_eq!(probe.calls(), 1);
    }

    #[test]
    fn relative_and_empty_paths_are_never_translated() {
        let probe = CountingProbe::with(&["/alt/root/etc/passwd"]);
        let resolver = PathResolver::with_probe("/alt/root", probe.clone()).unwrap();

        assert_eq!(resolver.resolve("etc/passwd"), "etc/passwd");
        assert_eq!(resolver.resolve(""), "");
        assert_eq!(probe.calls(), 0);
        assert_eq!(resolver.cached_len(), 0);
    }

    #[test]
    fn relative_prefix_is_anchored_at_cwd() {
        let resolver = PathResolver::with_probe("sysroot", CountingProbe::with(&[])).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            resolver.prefix(),
            Some(format!("{}/sysroot", cwd.display()).as_str())
        );
    }

    #[test]
    fn concurrent_lookups_probe_once() {
        let probe = CountingProbe::with(&["/alt/root/lib/libc.so.6"]);
        let resolver = Arc::new(PathResolver::with_probe("/alt/root", probe.clone()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || resolver.resolve("/lib/libc.so.6").into_owned())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "/alt/root/lib/libc.so.6");
        }
        assert_eq!(probe.calls(), 1);
    }

    /// Panics on its first call, then reports every path as present.
    #[derive(Default)]
    struct PanicsOnce {
        tripped: std::sync::atomic::AtomicBool,
    }

    impl PathProbe for PanicsOnce {
        fn exists(&self, path: &str) -> bool {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("lookup of {path} failed");
            }
            true
        }
    }

    #[test]
    fn poisoned_cache_keeps_working() {
        let resolver = PathResolver::with_probe("/alt", PanicsOnce::default()).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.resolve("/etc/passwd").into_owned()
        }));
        assert!(outcome.is_err());
        assert_eq!(resolver.cached_len(), 0);

        assert_eq!(resolver.resolve("/etc/hosts"), "/alt/etc/hosts");
        assert_eq!(resolver.cached_len(), 1);
        assert_eq!(resolver.resolve("/etc/passwd"), "/alt/etc/passwd");
        assert_eq!(resolver.cached_len(), 2);
    }

    #[test]
    fn host_probe_sees_real_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/passwd"), b"root:x:0:0\n").unwrap();

        let prefix = dir.path().to_str().unwrap();
        let resolver = PathResolver::new(prefix).unwrap();

        assert_eq!(resolver.resolve("/etc/passwd"), format!("{prefix}/etc/passwd"));
        assert_eq!(resolver.resolve("/etc/shadow"), "/etc/shadow");
    }
}
