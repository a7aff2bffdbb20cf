//! pyenv, mise and asdf: their installation trees, their shim directories,
//! and the rules deciding which installed version a shim dispatches to.
//!
//! Shim resolution is a pure function of the environment and the working
//! directory: the manager's version variable wins, then the nearest version
//! file walking up from the working directory, then the manager's configured
//! global version. A shim whose version cannot be resolved is skipped, never
//! executed.

use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::debug;

use super::{executable_stem, find_in_dir, home_dir, is_executable, sorted_dirs};
use crate::discovery::Environ;
use crate::spec::PythonSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Pyenv,
    Mise,
    Asdf,
}

pub(crate) struct Manager {
    pub(crate) name: &'static str,
    kind: Kind,
    root_var: &'static str,
    default_root: &'static [&'static str],
    versions: &'static [&'static str],
    version_var: &'static str,
    local_files: &'static [&'static str],
}

pub(crate) static MANAGERS: [Manager; 3] = [
    Manager {
        name: "pyenv",
        kind: Kind::Pyenv,
        root_var: "PYENV_ROOT",
        default_root: &[".pyenv"],
        versions: &["versions"],
        version_var: "PYENV_VERSION",
        local_files: &[".python-version"],
    },
    Manager {
        name: "mise",
        kind: Kind::Mise,
        root_var: "MISE_DATA_DIR",
        default_root: &[".local", "share", "mise"],
        versions: &["installs", "python"],
        version_var: "MISE_PYTHON_VERSION",
        local_files: &[".python-version", ".tool-versions"],
    },
    Manager {
        name: "asdf",
        kind: Kind::Asdf,
        root_var: "ASDF_DATA_DIR",
        default_root: &[".asdf"],
        versions: &["installs", "python"],
        version_var: "ASDF_PYTHON_VERSION",
        local_files: &[".tool-versions", ".python-version"],
    },
];

impl Manager {
    /// The manager's data directory, from its environment variable or the
    /// platform default under the user's home.
    fn root(&self, env: &Environ) -> Option<PathBuf> {
        if let Some(root) = env.get_str(self.root_var) {
            return Some(PathBuf::from(root));
        }
        let mut root = home_dir(env)?;
        for segment in self.default_root {
            root.push(segment);
        }
        Some(root)
    }

    fn versions_dir(&self, env: &Environ) -> Option<PathBuf> {
        let mut dir = self.root(env)?;
        for segment in self.versions {
            dir.push(segment);
        }
        Some(dir)
    }

    fn shims_dir(&self, env: &Environ) -> Option<PathBuf> {
        Some(self.root(env)?.join("shims"))
    }

    /// The interpreter inside this manager's tree for a resolved version
    /// string. The version may be a prefix of an installed directory name;
    /// `preferred` is the basename the caller asked for (a shim's own name).
    fn interpreter_for(
        &self,
        version: &str,
        preferred: Option<&str>,
        env: &Environ,
    ) -> Option<PathBuf> {
        let versions_dir = self.versions_dir(env)?;
        let exact = versions_dir.join(version);
        let install = if exact.is_dir() {
            exact
        } else {
            sorted_dirs(&versions_dir).into_iter().find(|dir| {
                dir.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(version))
            })?
        };
        let mut names: Vec<&str> = Vec::new();
        if let Some(preferred) = preferred {
            names.push(preferred);
        }
        names.extend(["python3", "python"]);
        for dir in [install.join("bin"), install] {
            for name in &names {
                let candidate = dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
                if candidate.is_file() && is_executable(&candidate, env) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// The manager's global version, the last resort of shim resolution.
    fn global_version(&self, env: &Environ) -> Option<String> {
        match self.kind {
            Kind::Pyenv => read_version_file(&self.root(env)?.join("version"), false),
            Kind::Mise => mise_global_version(env),
            Kind::Asdf => read_version_file(&home_dir(env)?.join(".tool-versions"), true),
        }
    }
}

/// The version string a shim of `manager` would dispatch to, or `None` when
/// nothing selects one (or the selection is the system interpreter, which a
/// shim cannot point back to).
pub(crate) fn resolve_shim(manager: &Manager, env: &Environ, cwd: &Path) -> Option<String> {
    let version = selected_version(manager, env, cwd)?;
    if version == "system" {
        None
    } else {
        Some(version)
    }
}

fn selected_version(manager: &Manager, env: &Environ, cwd: &Path) -> Option<String> {
    if let Some(version) = env.get_str(manager.version_var) {
        return version.split_whitespace().next().map(str::to_string);
    }
    for dir in cwd.ancestors() {
        for file in manager.local_files {
            let path = dir.join(file);
            if path.is_file() {
                if let Some(version) = read_version_file(&path, *file == ".tool-versions") {
                    return Some(version);
                }
            }
        }
    }
    manager.global_version(env)
}

/// First requested version out of a `.python-version` style file, or of the
/// `python` line of a `.tool-versions` file.
fn read_version_file(path: &Path, tool_versions: bool) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    if tool_versions {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let mut fields = line.split_whitespace();
                (fields.next() == Some("python")).then(|| fields.next())?
            })
            .map(str::to_string)
    } else {
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string)
    }
}

fn mise_global_version(env: &Environ) -> Option<String> {
    let config = match env.get_str("MISE_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir).join("config.toml"),
        None => home_dir(env)?.join(".config").join("mise").join("config.toml"),
    };
    let text = fs::read_to_string(config).ok()?;
    let value: toml::Value = text.parse().ok()?;
    match value.get("tools")?.get("python")? {
        toml::Value::String(version) => Some(version.clone()),
        toml::Value::Array(versions) => versions.first()?.as_str().map(str::to_string),
        _ => None,
    }
}

/// Outcome of checking whether a path is a version-manager shim.
pub(crate) enum ShimResolution {
    NotAShim,
    /// The real interpreter the shim dispatches to
    Resolved(PathBuf),
    /// A shim, but nothing selects a version for it; the caller must not
    /// execute it
    Unresolvable,
}

pub(crate) fn shim_target(executable: &Path, env: &Environ, cwd: &Path) -> ShimResolution {
    for manager in &MANAGERS {
        let Some(shims) = manager.shims_dir(env) else {
            continue;
        };
        if !executable.starts_with(&shims) {
            continue;
        }
        let Some(version) = resolve_shim(manager, env, cwd) else {
            return ShimResolution::Unresolvable;
        };
        let preferred = executable
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| executable_stem(name, env));
        match manager.interpreter_for(&version, preferred.as_deref(), env) {
            Some(real) => return ShimResolution::Resolved(real),
            None => return ShimResolution::Unresolvable,
        }
    }
    ShimResolution::NotAShim
}

/// Provider over all three managers: installed interpreters out of each
/// version tree first, then whatever the shims resolve to.
pub(crate) fn candidates(spec: &PythonSpec, env: &Environ, cwd: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for manager in &MANAGERS {
        if let Some(versions_dir) = manager.versions_dir(env) {
            if versions_dir.is_dir() {
                for install in sorted_dirs(&versions_dir) {
                    let bin = install.join("bin");
                    if bin.is_dir() {
                        found.extend(find_in_dir(&bin, spec, env));
                    }
                    if cfg!(windows) {
                        found.extend(find_in_dir(&install, spec, env));
                    }
                }
            }
        }
        let Some(shims) = manager.shims_dir(env) else {
            continue;
        };
        if !shims.is_dir() {
            continue;
        }
        let shim_files = find_in_dir(&shims, spec, env);
        if shim_files.is_empty() {
            continue;
        }
        let Some(version) = resolve_shim(manager, env, cwd) else {
            debug!("no {} version selected, skipping its shims", manager.name);
            continue;
        };
        for shim in shim_files {
            let preferred = shim
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| executable_stem(name, env));
            if let Some(real) = manager.interpreter_for(&version, preferred.as_deref(), env) {
                found.push(real);
            } else {
                debug!(
                    "{} {} has no interpreter for shim {}",
                    manager.name,
                    version,
                    shim.display()
                );
            }
        }
    }
    found
}
