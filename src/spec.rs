//! Parsing and matching of interpreter requests.
//!
//! A request is either a structured token such as `python3.12`, `pypy3.9` or
//! `cpython3.13t-64-arm64`, a filesystem path, or a PEP 440 version constraint
//! expression such as `>=3.11,<3.13` with an optional implementation prefix
//! (`cpython>=3.11`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::Lazy;
use pep440_rs::VersionSpecifiers;
use regex::Regex;
use thiserror::Error;

use crate::info::PythonInfo;

/// `spec := impl? version? "t"? ("-" arch)? ("-" machine)?`, matched against
/// the lowercased input. The implementation prefix is a run of letters, so a
/// trailing `t` can only be captured as free-threaded when a version separates
/// it from the prefix.
static SPEC_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<imp>[a-z][a-z_]*)?
        (?P<version>\d+(?:\.\d+){0,2})?
        (?P<ft>t)?
        (?:-(?P<arch>32|64))?
        (?:-(?P<machine>[a-z0-9][a-z0-9_]*))?
        $",
    )
    .unwrap()
});

/// A malformed interpreter request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid interpreter request `{input}`: {message} (offending part: `{fragment}`)")]
pub struct SpecParseError {
    /// The full request as given by the caller.
    pub input: String,
    /// The substring that could not be understood.
    pub fragment: String,
    /// What went wrong.
    pub message: String,
}

impl SpecParseError {
    fn new(input: &str, fragment: &str, message: impl Into<String>) -> Self {
        SpecParseError {
            input: input.to_string(),
            fragment: fragment.to_string(),
            message: message.into(),
        }
    }
}

/// The interpreter implementation a request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecImplementation {
    /// `python` or `py`, matches every implementation
    Any,
    /// The reference implementation
    CPython,
    /// PyPy
    PyPy,
    /// GraalPy
    GraalPy,
    /// Another vendor, e.g. `jython`; compared case-insensitively
    Other(String),
}

impl SpecImplementation {
    fn from_name(name: &str) -> SpecImplementation {
        match name {
            "python" | "py" => SpecImplementation::Any,
            "cpython" => SpecImplementation::CPython,
            "pypy" => SpecImplementation::PyPy,
            "graalpy" => SpecImplementation::GraalPy,
            other => SpecImplementation::Other(other.to_string()),
        }
    }

    /// The canonical spelling used when rendering a spec back to text.
    pub fn prefix(&self) -> &str {
        match self {
            SpecImplementation::Any => "python",
            SpecImplementation::CPython => "cpython",
            SpecImplementation::PyPy => "pypy",
            SpecImplementation::GraalPy => "graalpy",
            SpecImplementation::Other(name) => name,
        }
    }

    /// Whether an interpreter's self-reported implementation name satisfies
    /// this request.
    pub fn matches(&self, implementation: &str) -> bool {
        match self {
            SpecImplementation::Any => true,
            other => implementation.eq_ignore_ascii_case(other.prefix()),
        }
    }
}

/// A parsed interpreter request.
///
/// Exactly one of three shapes: a structured token (implementation, version
/// parts, free-threaded flag, architecture, machine), a literal [`path`], or a
/// [`constraints`] expression. Absent fields are wildcards.
///
/// [`path`]: PythonSpec::path
/// [`constraints`]: PythonSpec::constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PythonSpec {
    /// Requested implementation, `None` accepts any
    pub implementation: Option<SpecImplementation>,
    /// Required major version
    pub major: Option<u64>,
    /// Required minor version
    pub minor: Option<u64>,
    /// Required micro version
    pub micro: Option<u64>,
    /// `Some(true)` requires a no-GIL build, `Some(false)` forbids one,
    /// `None` accepts either
    pub free_threaded: Option<bool>,
    /// Pointer width, 32 or 64
    pub architecture: Option<u32>,
    /// Lowercased ISA name, `arm64` and `aarch64` are interchangeable
    pub machine: Option<String>,
    /// Set when the request is a filesystem path
    pub path: Option<PathBuf>,
    /// Set when the request is a PEP 440 constraint expression
    pub constraints: Option<VersionSpecifiers>,
}

impl PythonSpec {
    /// Parse a request without searching for an interpreter.
    pub fn from_string(raw: &str) -> Result<PythonSpec, SpecParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SpecParseError::new(raw, raw, "empty request"));
        }
        if looks_like_path(trimmed) {
            return Ok(PythonSpec {
                path: Some(PathBuf::from(trimmed)),
                ..PythonSpec::default()
            });
        }
        if trimmed.contains(['<', '>', '=', '!', '~', ',']) {
            return parse_constraints(trimmed);
        }
        parse_token(raw, &trimmed.to_ascii_lowercase())
    }

    /// Whether a fully populated interpreter description satisfies this
    /// request. Never touches the filesystem.
    pub fn matches(&self, info: &PythonInfo) -> bool {
        if let Some(path) = &self.path {
            // Relative paths were resolved by whoever produced the candidate,
            // so only absolute ones can be compared here.
            if path.is_absolute() {
                return paths_equal(path, &info.executable)
                    || paths_equal(path, &info.system_executable);
            }
            return true;
        }
        if let Some(implementation) = &self.implementation {
            if !implementation.matches(&info.implementation) {
                return false;
            }
        }
        if self.major.is_some_and(|major| major != info.version_info.major) {
            return false;
        }
        if self.minor.is_some_and(|minor| minor != info.version_info.minor) {
            return false;
        }
        if self.micro.is_some_and(|micro| micro != info.version_info.micro) {
            return false;
        }
        if self
            .free_threaded
            .is_some_and(|required| required != info.free_threaded)
        {
            return false;
        }
        if self.architecture.is_some_and(|arch| arch != info.architecture) {
            return false;
        }
        if let Some(machine) = &self.machine {
            if !machine_equal(machine, &info.machine) {
                return false;
            }
        }
        if let Some(constraints) = &self.constraints {
            if !constraints.contains(&info.version_info.as_version()) {
                return false;
            }
        }
        true
    }
}

impl FromStr for PythonSpec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PythonSpec::from_string(s)
    }
}

impl fmt::Display for PythonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            return write!(f, "{}", path.display());
        }
        if let Some(implementation) = &self.implementation {
            write!(f, "{}", implementation.prefix())?;
        }
        if let Some(constraints) = &self.constraints {
            return write!(f, "{constraints}");
        }
        if let Some(major) = self.major {
            write!(f, "{major}")?;
            if let Some(minor) = self.minor {
                write!(f, ".{minor}")?;
            }
            if let Some(micro) = self.micro {
                write!(f, ".{micro}")?;
            }
        }
        if self.free_threaded == Some(true) {
            write!(f, "t")?;
        }
        if let Some(architecture) = self.architecture {
            write!(f, "-{architecture}")?;
        }
        if let Some(machine) = &self.machine {
            write!(f, "-{machine}")?;
        }
        Ok(())
    }
}

/// `arm64` and `aarch64` name the same ISA.
pub(crate) fn machine_equal(a: &str, b: &str) -> bool {
    let alias = |name: &str| {
        if name.eq_ignore_ascii_case("arm64") {
            "aarch64".to_string()
        } else {
            name.to_ascii_lowercase()
        }
    };
    alias(a) == alias(b)
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    let (a, b) = (dunce::simplified(a), dunce::simplified(b));
    if cfg!(windows) {
        a.to_string_lossy()
            .eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}

fn looks_like_path(raw: &str) -> bool {
    raw.starts_with(['/', '\\', '.'])
        || raw.contains(['/', '\\'])
        || (raw.len() >= 2
            && raw.as_bytes()[0].is_ascii_alphabetic()
            && raw.as_bytes()[1] == b':')
}

fn parse_constraints(raw: &str) -> Result<PythonSpec, SpecParseError> {
    let operator = raw.find(['<', '>', '=', '!', '~']).ok_or_else(|| {
        SpecParseError::new(raw, raw, "expected a version comparison operator")
    })?;
    let (prefix, expression) = raw.split_at(operator);
    let prefix = prefix.trim();
    let implementation = if prefix.is_empty() {
        None
    } else if prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(SpecImplementation::from_name(&prefix.to_ascii_lowercase()))
    } else {
        return Err(SpecParseError::new(
            raw,
            prefix,
            "implementation prefix must be alphabetic",
        ));
    };
    let constraints = VersionSpecifiers::from_str(expression)
        .map_err(|err| SpecParseError::new(raw, expression.trim(), err.to_string()))?;
    Ok(PythonSpec {
        implementation,
        constraints: Some(constraints),
        ..PythonSpec::default()
    })
}

fn parse_token(raw: &str, lowered: &str) -> Result<PythonSpec, SpecParseError> {
    let caps = SPEC_TOKEN
        .captures(lowered)
        .ok_or_else(|| SpecParseError::new(raw, offending_suffix(lowered), "unrecognized syntax"))?;

    let mut spec = PythonSpec {
        implementation: caps
            .name("imp")
            .map(|m| SpecImplementation::from_name(m.as_str())),
        free_threaded: caps.name("ft").map(|_| true),
        architecture: caps.name("arch").map(|m| match m.as_str() {
            "32" => 32,
            _ => 64,
        }),
        machine: caps.name("machine").map(|m| m.as_str().to_string()),
        ..PythonSpec::default()
    };

    if let Some(version) = caps.name("version") {
        let version = version.as_str();
        let mut segments = Vec::new();
        for segment in version.split('.') {
            let value: u64 = segment.parse().map_err(|_| {
                SpecParseError::new(raw, segment, "version component out of range")
            })?;
            segments.push(value);
        }
        match segments.as_slice() {
            [compact] => {
                // A dotless run of 2+ digits is shorthand, `312` means 3.12.
                // Only for 3.x and later, `27` stays a (hopeless) major 27.
                if version.len() >= 2 && version.as_bytes()[0] >= b'3' {
                    spec.major = Some(u64::from(version.as_bytes()[0] - b'0'));
                    spec.minor = Some(version[1..].parse().map_err(|_| {
                        SpecParseError::new(raw, version, "version component out of range")
                    })?);
                } else {
                    spec.major = Some(*compact);
                }
            }
            [major, minor] => {
                spec.major = Some(*major);
                spec.minor = Some(*minor);
            }
            [major, minor, micro] => {
                spec.major = Some(*major);
                spec.minor = Some(*minor);
                spec.micro = Some(*micro);
            }
            _ => unreachable!("the token grammar allows at most three segments"),
        }
    }

    if spec == PythonSpec::default() {
        return Err(SpecParseError::new(raw, raw, "empty request"));
    }
    Ok(spec)
}

/// Best-effort location of the part of the input the grammar chokes on: the
/// suffix left over after the longest parseable prefix.
fn offending_suffix(lowered: &str) -> &str {
    for (index, _) in lowered.char_indices().rev() {
        if SPEC_TOKEN.is_match(&lowered[..index]) {
            return &lowered[index..];
        }
    }
    lowered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ReleaseLevel, VersionInfo};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn spec(s: &str) -> PythonSpec {
        PythonSpec::from_string(s).unwrap()
    }

    fn info(implementation: &str, version: (u64, u64, u64)) -> PythonInfo {
        PythonInfo {
            schema: crate::info::INFO_SCHEMA,
            executable: PathBuf::from("/usr/bin/python"),
            system_executable: PathBuf::from("/usr/bin/python"),
            implementation: implementation.to_string(),
            version_info: VersionInfo {
                major: version.0,
                minor: version.1,
                micro: version.2,
                releaselevel: ReleaseLevel::Final,
                serial: 0,
            },
            architecture: 64,
            platform: "linux".to_string(),
            machine: "x86_64".to_string(),
            free_threaded: false,
            sysconfig_vars: BTreeMap::new(),
            sysconfig_paths: BTreeMap::new(),
            mtime: 0.0,
            size: 0,
        }
    }

    #[rstest]
    #[case("python3.12", Some(SpecImplementation::Any), Some(3), Some(12), None)]
    #[case("py312", Some(SpecImplementation::Any), Some(3), Some(12), None)]
    #[case("PYTHON3.12", Some(SpecImplementation::Any), Some(3), Some(12), None)]
    #[case("cpython3.8", Some(SpecImplementation::CPython), Some(3), Some(8), None)]
    #[case("pypy3.9", Some(SpecImplementation::PyPy), Some(3), Some(9), None)]
    #[case("graalpy", Some(SpecImplementation::GraalPy), None, None, None)]
    #[case("jython2.7", Some(SpecImplementation::Other("jython".to_string())), Some(2), Some(7), None)]
    #[case("3.13.0", None, Some(3), Some(13), Some(0))]
    #[case("3100", None, Some(3), Some(100), None)]
    #[case("39", None, Some(3), Some(9), None)]
    #[case("27", None, Some(27), None, None)]
    fn parse_tokens(
        #[case] input: &str,
        #[case] implementation: Option<SpecImplementation>,
        #[case] major: Option<u64>,
        #[case] minor: Option<u64>,
        #[case] micro: Option<u64>,
    ) {
        let parsed = spec(input);
        assert_eq!(parsed.implementation, implementation);
        assert_eq!(parsed.major, major);
        assert_eq!(parsed.minor, minor);
        assert_eq!(parsed.micro, micro);
        assert_eq!(parsed.path, None);
        assert_eq!(parsed.constraints, None);
    }

    #[test]
    fn parse_full_token() {
        let parsed = spec("cpython3.13t-64-arm64");
        assert_eq!(parsed.implementation, Some(SpecImplementation::CPython));
        assert_eq!((parsed.major, parsed.minor), (Some(3), Some(13)));
        assert_eq!(parsed.free_threaded, Some(true));
        assert_eq!(parsed.architecture, Some(64));
        assert_eq!(parsed.machine.as_deref(), Some("arm64"));
        assert_eq!(parsed.to_string(), "cpython3.13t-64-arm64");
    }

    #[test]
    fn machine_without_architecture() {
        let parsed = spec("python3.12-aarch64");
        assert_eq!(parsed.architecture, None);
        assert_eq!(parsed.machine.as_deref(), Some("aarch64"));
    }

    #[rstest]
    #[case("/usr/bin/python3")]
    #[case("./venv/bin/python")]
    #[case(".venv/bin/python")]
    #[case("bin/python3")]
    #[case(r"C:\Python312\python.exe")]
    fn parse_paths(#[case] input: &str) {
        let parsed = spec(input);
        assert_eq!(parsed.path, Some(PathBuf::from(input)));
        assert_eq!(parsed.constraints, None);
        assert_eq!(parsed.implementation, None);
    }

    #[test]
    fn parse_constraint_expression() {
        let parsed = spec(">=3.11,<3.13");
        let constraints = parsed.constraints.unwrap();
        assert_eq!(constraints.len(), 2);
        assert_eq!(parsed.implementation, None);
    }

    #[test]
    fn parse_constraints_with_implementation_prefix() {
        let parsed = spec("cpython>=3.11");
        assert_eq!(parsed.implementation, Some(SpecImplementation::CPython));
        assert!(parsed.constraints.is_some());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("python@3")]
    #[case("3.12.1.1")]
    #[case("1x2")]
    fn parse_rejects(#[case] input: &str) {
        assert!(PythonSpec::from_string(input).is_err());
    }

    #[test]
    fn parse_error_locates_fragment() {
        // `!` routes this to the constraint grammar, whose implementation
        // prefix may not contain digits
        let err = PythonSpec::from_string("python3.12!bogus").unwrap_err();
        assert_eq!(err.fragment, "python3.12");
    }

    #[rstest]
    #[case("python3.12", "CPython", (3, 12, 1), true)]
    #[case("python3.12", "CPython", (3, 11, 7), false)]
    #[case("python3.12.1", "CPython", (3, 12, 1), true)]
    #[case("python3.12.2", "CPython", (3, 12, 1), false)]
    #[case("python3", "CPython", (3, 12, 1), true)]
    #[case("python", "PyPy", (3, 9, 16), true)]
    #[case("pypy3.9", "CPython", (3, 9, 1), false)]
    #[case("pypy3.9", "PyPy", (3, 9, 16), true)]
    #[case("cpython3.12", "cpython", (3, 12, 0), true)]
    fn match_tokens(
        #[case] request: &str,
        #[case] implementation: &str,
        #[case] version: (u64, u64, u64),
        #[case] expected: bool,
    ) {
        assert_eq!(spec(request).matches(&info(implementation, version)), expected);
    }

    #[rstest]
    #[case((3, 11, 0), true)]
    #[case((3, 11, 9), true)]
    #[case((3, 12, 4), true)]
    #[case((3, 13, 0), false)]
    #[case((3, 10, 14), false)]
    fn match_constraint_range(#[case] version: (u64, u64, u64), #[case] expected: bool) {
        assert_eq!(
            spec(">=3.11,<3.13").matches(&info("CPython", version)),
            expected
        );
    }

    #[test]
    fn match_strict_equality_operator() {
        let exact = spec("===3.12.1");
        assert!(exact.matches(&info("CPython", (3, 12, 1))));
        assert!(!exact.matches(&info("CPython", (3, 12, 2))));
    }

    #[test]
    fn match_machine_alias() {
        let mut arm = info("CPython", (3, 12, 0));
        arm.machine = "arm64".to_string();
        assert!(spec("python3.12-aarch64").matches(&arm));
        arm.machine = "aarch64".to_string();
        assert!(spec("python3.12-arm64").matches(&arm));
        arm.machine = "x86_64".to_string();
        assert!(!spec("python3.12-arm64").matches(&arm));
    }

    #[test]
    fn match_free_threaded() {
        let mut no_gil = info("CPython", (3, 13, 0));
        no_gil.free_threaded = true;
        let standard = info("CPython", (3, 13, 0));
        let required = spec("python3.13t");
        assert!(required.matches(&no_gil));
        assert!(!required.matches(&standard));
        // an unconstrained request accepts both builds
        assert!(spec("python3.13").matches(&no_gil));
        assert!(spec("python3.13").matches(&standard));
    }

    #[test]
    fn match_architecture() {
        let mut bits32 = info("CPython", (3, 12, 0));
        bits32.architecture = 32;
        assert!(spec("python3.12-32").matches(&bits32));
        assert!(!spec("python3.12-64").matches(&bits32));
    }

    #[test]
    fn match_absolute_path_spec() {
        let target = info("CPython", (3, 12, 0));
        assert!(spec("/usr/bin/python").matches(&target));
        assert!(!spec("/opt/other/python").matches(&target));
    }

    #[test]
    fn match_prerelease_ordering() {
        // the interpreter reports 3.13.0rc1
        let mut candidate = info("CPython", (3, 13, 0));
        candidate.version_info.releaselevel = ReleaseLevel::Candidate;
        candidate.version_info.serial = 1;
        // a pre-release bound admits earlier pre-releases of the same version
        assert!(spec("<3.13.0rc2").matches(&candidate));
        // an rc sorts before the final release
        assert!(!spec(">=3.13.0").matches(&candidate));
        // structured tokens only compare the release segments
        assert!(spec("python3.13").matches(&candidate));
    }

    #[test]
    fn constraint_superset_is_monotonic() {
        let loose = spec(">=3.11");
        let tight = spec(">=3.11,<3.13");
        let subject = info("CPython", (3, 12, 2));
        assert!(tight.matches(&subject));
        assert!(loose.matches(&subject));
    }
}
