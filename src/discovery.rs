//! The discovery driver: walk the providers in order, verify candidates, and
//! stop at the first interpreter satisfying a request.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use tracing::debug;

use crate::cache::InfoCache;
use crate::info::PythonInfo;
use crate::locations;
use crate::probe;
use crate::spec::PythonSpec;

/// An explicit snapshot of environment variables.
///
/// Discovery never reads the process environment behind the caller's back;
/// everything it consumes (`PATH`, `PYENV_ROOT`, `VIRTUAL_ENV`, ...) comes
/// out of the [`Environ`] it was given.
#[derive(Debug, Clone)]
pub struct Environ {
    vars: HashMap<OsString, OsString>,
}

impl Environ {
    /// Snapshot the environment of the current process.
    pub fn from_process() -> Environ {
        Environ {
            vars: std::env::vars_os().collect(),
        }
    }

    /// An environment with nothing set.
    pub fn empty() -> Environ {
        Environ {
            vars: HashMap::new(),
        }
    }

    /// The raw value of a variable.
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// The value of a variable, if it is valid Unicode.
    pub fn get_str(&self, key: impl AsRef<OsStr>) -> Option<&str> {
        self.get(key).and_then(OsStr::to_str)
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Unset a variable, returning its previous value.
    pub fn remove(&mut self, key: impl AsRef<OsStr>) -> Option<OsString> {
        self.vars.remove(key.as_ref())
    }

    /// All variables, unordered.
    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter()
    }
}

/// A configurable interpreter search.
///
/// ```no_run
/// use python_discovery::{DiskCache, Discovery};
///
/// let cache = DiskCache::at_default_root()?;
/// let found = Discovery::new(&["python3.13", "python3.12"])
///     .cache(&cache)
///     .run()?;
/// # anyhow::Ok(())
/// ```
pub struct Discovery<'a> {
    specs: Vec<String>,
    try_first_with: Vec<PathBuf>,
    env: Environ,
    cwd: PathBuf,
    cache: Option<&'a dyn InfoCache>,
    cancelled: Option<&'a AtomicBool>,
}

impl<'a> Discovery<'a> {
    /// A search for the given requests, tried in order, against the process
    /// environment and working directory, with no cache.
    pub fn new<S: AsRef<str>>(specs: &[S]) -> Discovery<'a> {
        Discovery {
            specs: specs.iter().map(|spec| spec.as_ref().to_string()).collect(),
            try_first_with: Vec::new(),
            env: Environ::from_process(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            cache: None,
            cancelled: None,
        }
    }

    /// Directories to search before every other location.
    pub fn try_first_with(mut self, dirs: Vec<PathBuf>) -> Self {
        self.try_first_with = dirs;
        self
    }

    /// Replace the environment the search runs against.
    pub fn env(mut self, env: Environ) -> Self {
        self.env = env;
        self
    }

    /// The directory relative requests and version files resolve against.
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Persist verified metadata in `cache` and serve repeat lookups from it.
    pub fn cache(mut self, cache: &'a dyn InfoCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Abandon the search once `flag` becomes true. Checked between
    /// candidates; a cancelled search returns `Ok(None)` and writes no
    /// partial cache entries.
    pub fn cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    /// Run the search: for each request in order, verify candidates in
    /// provider order and return the first satisfying interpreter.
    ///
    /// `Ok(None)` means every request came up empty. Malformed requests and
    /// cache failures that block all progress are errors; everything that
    /// goes wrong with one individual candidate only skips that candidate.
    pub fn run(&self) -> Result<Option<PythonInfo>> {
        if self.specs.is_empty() {
            bail!("at least one interpreter request is required");
        }
        for raw in &self.specs {
            let spec = PythonSpec::from_string(raw)?;
            debug!("looking for an interpreter satisfying `{spec}`");
            for candidate in
                locations::candidates(&spec, &self.try_first_with, &self.env, &self.cwd)
            {
                if self
                    .cancelled
                    .is_some_and(|flag| flag.load(Ordering::Relaxed))
                {
                    debug!("search cancelled");
                    return Ok(None);
                }
                let Some(info) = probe::probe(&candidate, &self.env, &self.cwd, self.cache)?
                else {
                    continue;
                };
                if spec.matches(&info) {
                    debug!("selected {info}");
                    return Ok(Some(info));
                }
                debug!("{info} does not satisfy `{spec}`");
            }
            debug!("no interpreter satisfies `{spec}`");
        }
        Ok(None)
    }
}

/// Find the first interpreter satisfying any of `specs`, tried in order,
/// against the process environment. See [`Discovery`] for a configurable
/// search.
pub fn get_interpreter<S: AsRef<str>>(
    specs: &[S],
    cache: Option<&dyn InfoCache>,
) -> Result<Option<PythonInfo>> {
    let mut discovery = Discovery::new(specs);
    if let Some(cache) = cache {
        discovery = discovery.cache(cache);
    }
    discovery.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requests_is_an_error() {
        let specs: [&str; 0] = [];
        assert!(Discovery::new(&specs).run().is_err());
    }

    #[test]
    fn malformed_requests_surface_to_the_caller() {
        let error = Discovery::new(&["python@3"])
            .env(Environ::empty())
            .run()
            .unwrap_err();
        assert!(error.downcast_ref::<crate::spec::SpecParseError>().is_some());
    }

    #[test]
    fn empty_environment_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let found = Discovery::new(&["python3"])
            .env(Environ::empty())
            .current_dir(dir.path())
            .run()
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn cancelled_search_returns_absent() {
        let flag = AtomicBool::new(true);
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environ::empty();
        env.set("PATH", dir.path().as_os_str());
        let found = Discovery::new(&["python3"])
            .env(env)
            .current_dir(dir.path())
            .cancel_flag(&flag)
            .run()
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn environ_snapshot_round_trips() {
        let mut env = Environ::empty();
        assert_eq!(env.get("PATH"), None);
        env.set("PATH", "/usr/bin");
        assert_eq!(env.get_str("PATH"), Some("/usr/bin"));
        assert_eq!(env.remove("PATH"), Some("/usr/bin".into()));
        assert_eq!(env.get("PATH"), None);
    }
}
