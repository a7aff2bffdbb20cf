//! On-disk storage for probed interpreter metadata.
//!
//! One JSON document per interpreter, keyed by a digest of the absolutized
//! executable path, under `<root>/py_info/<schema>/`. A sibling `.lock` file
//! serializes access across processes: readers and writers both take the
//! exclusive advisory lock for the duration of their critical section, and
//! updates go through a temporary file renamed into place so a document is
//! never observed half-written.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::fs_err3::FileExt;
use fs_err as fs;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::info::{PythonInfo, INFO_SCHEMA};

/// One interpreter's slot in a cache, only reachable while its lock is held.
pub trait CacheEntry {
    /// Whether a document is present, readable or not.
    fn exists(&mut self) -> bool;
    /// The stored record, or `None` when missing, unreadable or written by a
    /// different schema.
    fn read(&mut self) -> Option<PythonInfo>;
    /// Store a record, atomically replacing any previous one.
    fn write(&mut self, info: &PythonInfo) -> Result<()>;
    /// Drop the stored record; absent records are fine.
    fn remove(&mut self) -> Result<()>;
}

/// The critical-section callback passed to [`InfoCache::with_entry`].
pub type EntryOp<'a> = &'a mut dyn FnMut(&mut dyn CacheEntry) -> Result<Option<PythonInfo>>;

/// A store of interpreter metadata, pluggable by implementing these two
/// operations. The disk-backed [`DiskCache`] is the stock implementation.
pub trait InfoCache {
    /// Run `op` on the entry for `executable` while holding that entry's
    /// exclusive lock. The lock is released on every exit path, including
    /// errors and unwinding.
    fn with_entry(&self, executable: &Path, op: EntryOp) -> Result<Option<PythonInfo>>;

    /// Drop every stored entry.
    fn clear(&self) -> Result<()>;
}

/// The stock filesystem-backed implementation of [`InfoCache`].
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// A cache rooted at `root`; directories are created on first use.
    pub fn new(root: impl Into<PathBuf>) -> DiskCache {
        DiskCache { root: root.into() }
    }

    /// A cache under the user's platform cache directory.
    pub fn at_default_root() -> Result<DiskCache> {
        let base = dirs::cache_dir().context("no usable cache directory for this user")?;
        Ok(DiskCache::new(base.join("python-discovery")))
    }

    /// The directory this cache lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket(&self) -> PathBuf {
        self.root.join("py_info").join(INFO_SCHEMA.to_string())
    }
}

impl InfoCache for DiskCache {
    fn with_entry(&self, executable: &Path, op: EntryOp) -> Result<Option<PythonInfo>> {
        let bucket = self.bucket();
        fs::create_dir_all(&bucket)?;
        let digest = entry_digest(executable);
        let lock_path = bucket.join(format!("{digest}.lock"));
        let lock = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;
        let mut entry = DiskEntry {
            document: bucket.join(format!("{digest}.json")),
        };
        let outcome = op(&mut entry);
        if let Err(err) = lock.unlock() {
            // the lock still dies with the file handle, so just note it
            warn!("failed to unlock {}: {err}", lock_path.display());
        }
        outcome
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(self.root.join("py_info")) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

struct DiskEntry {
    document: PathBuf,
}

impl CacheEntry for DiskEntry {
    fn exists(&mut self) -> bool {
        self.document.exists()
    }

    fn read(&mut self) -> Option<PythonInfo> {
        let raw = match fs::read(&self.document) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("unreadable cache document {}: {err}", self.document.display());
                return None;
            }
        };
        let info: PythonInfo = match serde_json::from_slice(&raw) {
            Ok(info) => info,
            Err(err) => {
                warn!("corrupt cache document {}: {err}", self.document.display());
                return None;
            }
        };
        if info.schema != INFO_SCHEMA {
            debug!(
                "ignoring cache document {} with schema {}",
                self.document.display(),
                info.schema
            );
            return None;
        }
        Some(info)
    }

    fn write(&mut self, info: &PythonInfo) -> Result<()> {
        // unwrap rationale: the document always has the bucket as parent
        let bucket = self.document.parent().unwrap();
        let mut staged = tempfile::NamedTempFile::new_in(bucket)?;
        serde_json::to_writer(&mut staged, info)?;
        staged.flush()?;
        staged
            .persist(&self.document)
            .with_context(|| format!("failed to publish {}", self.document.display()))?;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        match fs::remove_file(&self.document) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Digest of the absolutized, case-normalized executable path; the filename
/// stem of both the document and its lock file.
fn entry_digest(executable: &Path) -> String {
    let simplified = dunce::simplified(executable);
    let mut text = simplified.to_string_lossy().into_owned();
    if cfg!(windows) {
        text.make_ascii_lowercase();
    }
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // unwrap rationale: writing to a String cannot fail
        write!(hex, "{byte:02x}").unwrap();
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ReleaseLevel, VersionInfo};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn sample(executable: &Path) -> PythonInfo {
        PythonInfo {
            schema: INFO_SCHEMA,
            executable: executable.to_path_buf(),
            system_executable: executable.to_path_buf(),
            implementation: "CPython".to_string(),
            version_info: VersionInfo {
                major: 3,
                minor: 12,
                micro: 1,
                releaselevel: ReleaseLevel::Final,
                serial: 0,
            },
            architecture: 64,
            platform: "linux".to_string(),
            machine: "x86_64".to_string(),
            free_threaded: false,
            sysconfig_vars: BTreeMap::new(),
            sysconfig_paths: BTreeMap::new(),
            mtime: 1700000000.0,
            size: 14096,
        }
    }

    #[test]
    fn round_trip_through_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let exe = Path::new("/usr/bin/python3.12");
        let info = sample(exe);

        let stored = cache
            .with_entry(exe, &mut |entry| {
                assert!(!entry.exists());
                assert_eq!(entry.read(), None);
                entry.write(&info)?;
                Ok(entry.read())
            })
            .unwrap();
        assert_eq!(stored, Some(info.clone()));

        let reread = cache
            .with_entry(exe, &mut |entry| Ok(entry.read()))
            .unwrap();
        assert_eq!(reread, Some(info));
    }

    #[test]
    fn documents_live_under_schema_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let exe = Path::new("/usr/bin/python3.12");
        cache
            .with_entry(exe, &mut |entry| {
                entry.write(&sample(exe))?;
                Ok(None)
            })
            .unwrap();

        let bucket = dir.path().join("py_info").join(INFO_SCHEMA.to_string());
        let digest = entry_digest(exe);
        assert!(bucket.join(format!("{digest}.json")).is_file());
        assert!(bucket.join(format!("{digest}.lock")).is_file());
    }

    #[test]
    fn mismatched_schema_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let exe = Path::new("/usr/bin/python3.12");
        let mut outdated = sample(exe);
        outdated.schema = INFO_SCHEMA - 1;
        cache
            .with_entry(exe, &mut |entry| {
                entry.write(&outdated)?;
                Ok(None)
            })
            .unwrap();

        let read = cache.with_entry(exe, &mut |entry| Ok(entry.read())).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn corrupt_document_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let exe = Path::new("/usr/bin/python3.12");
        let bucket = dir.path().join("py_info").join(INFO_SCHEMA.to_string());
        fs::create_dir_all(&bucket).unwrap();
        fs::write(
            bucket.join(format!("{}.json", entry_digest(exe))),
            b"not json",
        )
        .unwrap();

        let read = cache.with_entry(exe, &mut |entry| Ok(entry.read())).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn remove_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let exe = Path::new("/usr/bin/python3.12");
        cache
            .with_entry(exe, &mut |entry| {
                entry.write(&sample(exe))?;
                entry.remove()?;
                assert!(!entry.exists());
                // removing twice is fine
                entry.remove()?;
                Ok(None)
            })
            .unwrap();

        cache
            .with_entry(exe, &mut |entry| {
                entry.write(&sample(exe))?;
                Ok(None)
            })
            .unwrap();
        cache.clear().unwrap();
        assert!(!dir.path().join("py_info").exists());
        // clearing an already empty cache is fine
        cache.clear().unwrap();
    }

    #[test]
    fn digest_is_stable_per_path() {
        assert_eq!(
            entry_digest(Path::new("/usr/bin/python3")),
            entry_digest(Path::new("/usr/bin/python3"))
        );
        assert_ne!(
            entry_digest(Path::new("/usr/bin/python3")),
            entry_digest(Path::new("/usr/bin/python3.12"))
        );
    }
}
