//! Standalone toolchains extracted by uv under its python install directory.
//!
//! Each child of the install directory is one toolchain tree, named like
//! `cpython-3.12.1-linux-x86_64-gnu`, with the interpreter in `bin/` on Unix
//! and at the tree root on Windows.

use std::path::PathBuf;

use super::{data_dir, find_in_dir, sorted_dirs};
use crate::discovery::Environ;
use crate::spec::PythonSpec;

fn install_dir(env: &Environ) -> Option<PathBuf> {
    if let Some(dir) = env.get_str("UV_PYTHON_INSTALL_DIR") {
        return Some(PathBuf::from(dir));
    }
    Some(data_dir(env)?.join("uv").join("python"))
}

pub(crate) fn candidates(spec: &PythonSpec, env: &Environ) -> Vec<PathBuf> {
    let Some(install_dir) = install_dir(env) else {
        return Vec::new();
    };
    if !install_dir.is_dir() {
        return Vec::new();
    }
    let mut found = Vec::new();
    for toolchain in sorted_dirs(&install_dir) {
        let bin = toolchain.join("bin");
        if bin.is_dir() {
            found.extend(find_in_dir(&bin, spec, env));
        }
        if cfg!(windows) {
            found.extend(find_in_dir(&toolchain, spec, env));
        }
    }
    found
}
