//! The canonical description of one Python interpreter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pep440_rs::Version;
use serde::{Deserialize, Serialize};

use crate::cache::InfoCache;
use crate::discovery::Environ;
use crate::locations;
use crate::probe;
use crate::spec::PythonSpec;

/// Version of the serialized layout. Stored inside every document and as a
/// path segment of the on-disk cache; bumping it orphans all prior entries
/// without any migration.
pub const INFO_SCHEMA: u32 = 4;

/// The release stage of an interpreter, `sys.version_info.releaselevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ReleaseLevel {
    Alpha,
    Beta,
    Candidate,
    Final,
}

/// The five components of `sys.version_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct VersionInfo {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub releaselevel: ReleaseLevel,
    pub serial: u64,
}

impl VersionInfo {
    /// The PEP 440 version equivalent, with a pre-release segment for
    /// non-final builds so that e.g. 3.13.0rc1 orders before 3.13.0.
    pub fn as_version(&self) -> Version {
        let VersionInfo {
            major,
            minor,
            micro,
            serial,
            ..
        } = self;
        let text = match self.releaselevel {
            ReleaseLevel::Final => return Version::new([*major, *minor, *micro]),
            ReleaseLevel::Alpha => format!("{major}.{minor}.{micro}a{serial}"),
            ReleaseLevel::Beta => format!("{major}.{minor}.{micro}b{serial}"),
            ReleaseLevel::Candidate => format!("{major}.{minor}.{micro}rc{serial}"),
        };
        // unwrap rationale: assembled from numeric components, always a valid
        // PEP 440 version
        text.parse().unwrap()
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        match self.releaselevel {
            ReleaseLevel::Final => Ok(()),
            ReleaseLevel::Alpha => write!(f, "a{}", self.serial),
            ReleaseLevel::Beta => write!(f, "b{}", self.serial),
            ReleaseLevel::Candidate => write!(f, "rc{}", self.serial),
        }
    }
}

/// Everything we know about one interpreter after probing it.
///
/// Produced by running the interpreter itself and reading back its
/// self-reported metadata, then stamped with the executable's filesystem
/// identity (`mtime`, `size`) so cached copies can be checked for staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonInfo {
    /// Serialized layout version, must equal [`INFO_SCHEMA`]
    pub schema: u32,
    /// The binary as invoked; inside a virtual environment this is the venv
    /// interpreter
    pub executable: PathBuf,
    /// The underlying base interpreter; equals `executable` outside venvs
    pub system_executable: PathBuf,
    /// Vendor name with its display casing, e.g. `CPython`, `PyPy`;
    /// compared case-insensitively
    pub implementation: String,
    /// Full `sys.version_info` including release level and serial
    pub version_info: VersionInfo,
    /// Pointer width, 32 or 64
    pub architecture: u32,
    /// Short OS tag, `sys.platform`: `linux`, `darwin`, `win32`, ...
    pub platform: String,
    /// Lowercased ISA name, e.g. `x86_64`, `aarch64`
    pub machine: String,
    /// True only for no-GIL builds
    pub free_threaded: bool,
    /// Full `sysconfig.get_config_vars()` as reported, values are strings,
    /// numbers or null
    pub sysconfig_vars: BTreeMap<String, serde_json::Value>,
    /// `sysconfig.get_paths()`: stdlib, platstdlib, purelib, platlib,
    /// include, scripts, data
    pub sysconfig_paths: BTreeMap<String, PathBuf>,
    /// Modification time of `executable` when probed, seconds since the epoch
    pub mtime: f64,
    /// Size of `executable` in bytes when probed
    pub size: u64,
}

impl PythonInfo {
    /// Probe one executable, bypassing discovery. Returns `None` when the
    /// path is not a working interpreter.
    pub fn from_exe(
        executable: &Path,
        env: &Environ,
        cache: Option<&dyn InfoCache>,
    ) -> Result<Option<PythonInfo>> {
        let cwd = std::env::current_dir()?;
        probe::probe(executable, env, &cwd, cache)
    }

    /// Probe the interpreter the current context considers "the" Python: the
    /// active virtual environment if `VIRTUAL_ENV` is set, otherwise the
    /// first `python3`/`python` on `PATH`.
    pub fn current_system(cache: Option<&dyn InfoCache>) -> Result<Option<PythonInfo>> {
        let env = Environ::from_process();
        if let Some(venv) = env.get_str("VIRTUAL_ENV") {
            let exe = locations::venv_interpreter(Path::new(venv));
            if exe.exists() {
                return PythonInfo::from_exe(&exe, &env, cache);
            }
        }
        for name in ["python3", "python"] {
            if let Some(exe) = locations::find_on_path(name, &env) {
                return PythonInfo::from_exe(&exe, &env, cache);
            }
        }
        Ok(None)
    }

    /// `major.minor.micro` including any pre-release suffix.
    pub fn version_str(&self) -> String {
        self.version_info.to_string()
    }

    /// The PEP 440 version of this interpreter.
    pub fn version(&self) -> Version {
        self.version_info.as_version()
    }

    /// Whether this interpreter belongs to a virtual environment.
    pub fn is_virtualenv(&self) -> bool {
        self.executable != self.system_executable
    }

    /// Whether this interpreter satisfies the given request.
    pub fn satisfies(&self, spec: &PythonSpec) -> bool {
        spec.matches(self)
    }
}

impl fmt::Display for PythonInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{} at {}",
            self.implementation,
            self.version_info,
            if self.free_threaded { "t" } else { "" },
            self.executable.display()
        )
    }
}
