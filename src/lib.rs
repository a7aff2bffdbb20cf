//! Find a Python interpreter that satisfies a textual request and report
//! rich metadata about it.
//!
//! A request ("spec") is a structured token such as `python3.12`, `pypy3.9`
//! or `python3.13t-64-arm64`, an explicit path, or a PEP 440 constraint
//! expression such as `>=3.11,<3.13`. The entry point is [`get_interpreter`],
//! or [`Discovery`] when hints, a custom environment or a cache are needed.
//!
//! Candidates are collected lazily from the caller's hint directories, the
//! active virtual environment, the Windows registry, `PATH`, the pyenv, mise
//! and asdf trees and shims, and standalone uv toolchains, strictly in that
//! order. Every candidate is verified by executing it with an inline probe
//! script and reading back its self-reported metadata; a [`DiskCache`] makes
//! repeat lookups cheap and is invalidated as soon as the binary on disk
//! changes.

#![deny(missing_docs)]

mod cache;
mod discovery;
mod info;
mod locations;
mod probe;
mod spec;

pub use cache::{CacheEntry, DiskCache, EntryOp, InfoCache};
pub use discovery::{get_interpreter, Discovery, Environ};
pub use info::{PythonInfo, ReleaseLevel, VersionInfo, INFO_SCHEMA};
pub use spec::{PythonSpec, SpecImplementation, SpecParseError};
