//! Enumeration of candidate interpreter paths.
//!
//! Each provider lazily yields paths for the driver to verify; none of them
//! ever executes a candidate. The fixed order is: the literal path of a path
//! request, caller-supplied hint directories, the active virtual environment,
//! the Windows registry, `PATH`, the version managers (pyenv, mise, asdf),
//! and finally standalone uv toolchains. Unreadable directories are skipped,
//! never fatal.

pub(crate) mod managers;
pub(crate) mod registry;
pub(crate) mod standalone;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use fs_err as fs;
use same_file::Handle;
use tracing::debug;

use crate::discovery::Environ;
use crate::spec::{PythonSpec, SpecImplementation};

/// All candidates for one request, provider by provider, deduplicated by
/// file identity so a path reached twice (possibly through symlinks) is only
/// verified once.
pub(crate) fn candidates<'a>(
    spec: &'a PythonSpec,
    hints: &'a [PathBuf],
    env: &'a Environ,
    cwd: &'a Path,
) -> Box<dyn Iterator<Item = PathBuf> + 'a> {
    // a path request names its candidate outright, nothing is searched
    if let Some(path) = &spec.path {
        let resolved = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        };
        return Box::new(std::iter::once(resolved));
    }

    let mut seen: HashSet<Handle> = HashSet::new();
    let chained = defer(move || hints.iter().flat_map(move |dir| find_in_dir(dir, spec, env)))
        .chain(defer(move || active_virtualenv(env)))
        .chain(defer(move || registry::candidates(env)))
        .chain(defer(move || {
            path_dirs(env)
                .into_iter()
                .flat_map(move |dir| find_in_dir(&dir, spec, env))
        }))
        .chain(defer(move || managers::candidates(spec, env, cwd)))
        .chain(defer(move || standalone::candidates(spec, env)));
    Box::new(chained.filter(move |path| match Handle::from_path(path) {
        Ok(handle) => seen.insert(handle),
        // an unopenable candidate is passed on, the verifier rejects it
        Err(_) => true,
    }))
}

/// Delay building a provider's iterator until the previous providers are
/// exhausted, so a match on `PATH` never touches a version manager's tree.
fn defer<I, F>(provider: F) -> impl Iterator<Item = PathBuf>
where
    F: FnOnce() -> I,
    I: IntoIterator<Item = PathBuf>,
{
    let mut provider = Some(provider);
    std::iter::from_fn(move || provider.take().map(|f| f())).flatten()
}

/// The interpreter of the virtual environment this process runs under, the
/// closest thing a native binary has to "the interpreter running me".
fn active_virtualenv(env: &Environ) -> Vec<PathBuf> {
    let Some(root) = env.get_str("VIRTUAL_ENV") else {
        return Vec::new();
    };
    let exe = venv_interpreter(Path::new(root));
    if exe.is_file() {
        vec![exe]
    } else {
        Vec::new()
    }
}

pub(crate) fn venv_interpreter(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join("python.exe")
    } else {
        root.join("bin").join("python")
    }
}

/// The `PATH` entries of the given environment, in order.
pub(crate) fn path_dirs(env: &Environ) -> Vec<PathBuf> {
    match env.get("PATH") {
        Some(value) => std::env::split_paths(value).collect(),
        None => Vec::new(),
    }
}

/// First executable named `name` on `PATH`.
pub(crate) fn find_on_path(name: &str, env: &Environ) -> Option<PathBuf> {
    let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    path_dirs(env)
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|path| path.is_file() && is_executable(path, env))
}

/// Executable files in one directory whose names could satisfy the request,
/// most specific first: `python3.12` before `python3` before `python`, the
/// plain `python` prefix before vendor prefixes, ties broken by name.
pub(crate) fn find_in_dir(dir: &Path, spec: &PythonSpec, env: &Environ) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("skipping unreadable directory {}: {err}", dir.display());
            return Vec::new();
        }
    };
    let mut ranked: Vec<(u32, u32, String, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(stem) = executable_stem(file_name, env) else {
            continue;
        };
        let Some((specificity, vendor)) = name_rank(spec, &stem) else {
            continue;
        };
        if !is_executable(&path, env) {
            continue;
        }
        ranked.push((specificity, vendor, file_name.to_ascii_lowercase(), path));
    }
    ranked.sort();
    ranked.into_iter().map(|(_, _, _, path)| path).collect()
}

/// The candidate's basename without its executable suffix, lowercased, or
/// `None` when the file could not be invoked by this name at all.
fn executable_stem(file_name: &str, env: &Environ) -> Option<String> {
    let lowered = file_name.to_ascii_lowercase();
    if cfg!(windows) {
        for extension in executable_extensions(env) {
            if let Some(stem) = lowered.strip_suffix(&extension) {
                return Some(stem.to_string());
            }
        }
        None
    } else {
        Some(lowered)
    }
}

/// Whether a basename is worth verifying for the request, and how early. The
/// name is parsed with the request grammar itself; a name carrying fields a
/// file name never legitimately has (architecture, machine, so `python3-config`
/// style helpers) is rejected outright.
fn name_rank(spec: &PythonSpec, stem: &str) -> Option<(u32, u32)> {
    let named = PythonSpec::from_string(stem).ok()?;
    if named.machine.is_some() || named.architecture.is_some() || named.path.is_some() {
        return None;
    }
    let vendor = match (&spec.implementation, &named.implementation) {
        (_, None) => return None,
        (None | Some(SpecImplementation::Any), Some(named_impl)) => match named_impl {
            SpecImplementation::Any => 0,
            SpecImplementation::CPython => 1,
            SpecImplementation::PyPy => 2,
            SpecImplementation::GraalPy => 3,
            SpecImplementation::Other(_) => return None,
        },
        (Some(SpecImplementation::CPython), Some(named_impl)) => match named_impl {
            // CPython ships binaries named plain `python...`
            SpecImplementation::Any => 0,
            SpecImplementation::CPython => 1,
            _ => return None,
        },
        (Some(requested), Some(named_impl)) => {
            if requested == named_impl {
                0
            } else {
                return None;
            }
        }
    };
    let conflicting = |requested: Option<u64>, named: Option<u64>| {
        matches!((requested, named), (Some(a), Some(b)) if a != b)
    };
    if conflicting(spec.major, named.major)
        || conflicting(spec.minor, named.minor)
        || conflicting(spec.micro, named.micro)
    {
        return None;
    }
    // a free-threaded request only runs suffixed or versionless names, a
    // plain `python3.13` will never satisfy it
    if spec.free_threaded == Some(true)
        && named.major.is_some()
        && named.free_threaded != Some(true)
    {
        return None;
    }
    let specificity = if named.minor.is_some() {
        0
    } else if named.major.is_some() {
        1
    } else {
        2
    };
    Some((specificity, vendor))
}

/// Lowercased executable suffixes for the platform: `PATHEXT` entries on
/// Windows, nothing elsewhere.
fn executable_extensions(env: &Environ) -> Vec<String> {
    if !cfg!(windows) {
        return Vec::new();
    }
    let pathext = env
        .get_str("PATHEXT")
        .unwrap_or(".EXE;.BAT;.CMD;.COM");
    pathext
        .split(';')
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .collect()
}

pub(crate) fn is_executable(path: &Path, env: &Environ) -> bool {
    #[cfg(unix)]
    {
        let _ = env;
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        if !path.is_file() {
            return false;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        executable_stem(name, env).is_some()
    }
}

/// The user's home directory as the given environment sees it. Resolved from
/// the environment, not the process, so searches stay a pure function of
/// their inputs.
pub(crate) fn home_dir(env: &Environ) -> Option<PathBuf> {
    let variable = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    env.get_str(variable).map(PathBuf::from)
}

/// The per-user data directory, `XDG_DATA_HOME` semantics on Unix.
pub(crate) fn data_dir(env: &Environ) -> Option<PathBuf> {
    if let Some(xdg) = env.get_str("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg));
    }
    if cfg!(windows) {
        env.get_str("APPDATA").map(PathBuf::from)
    } else {
        home_dir(env).map(|home| home.join(".local").join("share"))
    }
}

/// Child directories sorted by name, the deterministic order every tree
/// enumeration uses.
pub(crate) fn sorted_dirs(parent: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}
