//! Running a candidate interpreter to read back its metadata.
//!
//! The probe is the only moment this crate executes foreign code: the
//! candidate is started with an inline script (never written to disk) that
//! prints one JSON document on stdout. Anything else, a non-zero exit, a
//! timeout, garbage output, means the candidate is skipped, not a failed
//! discovery.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use fs_err as fs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, InfoCache};
use crate::discovery::Environ;
use crate::info::{PythonInfo, VersionInfo, INFO_SCHEMA};
use crate::locations::{self, managers};

/// Prints the interpreter's self-description as one line of JSON.
const GET_PYTHON_INFO: &str = include_str!("get_python_info.py");

/// How long one candidate may take to describe itself.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// What the probe script reports; field names match the script's payload.
#[derive(Deserialize)]
struct ProbeMessage {
    implementation: String,
    version_info: VersionInfo,
    pointer_width: u32,
    platform: String,
    machine: String,
    free_threaded: bool,
    #[allow(dead_code)]
    executable: String,
    base_executable: String,
    sysconfig_vars: BTreeMap<String, serde_json::Value>,
    sysconfig_paths: BTreeMap<String, String>,
}

/// Verify one candidate path: absolutize, resolve version-manager shims,
/// consult the cache, and only then execute. `Ok(None)` is a per-candidate
/// rejection; `Err` is reserved for cache failures that block any progress.
pub(crate) fn probe(
    candidate: &Path,
    env: &Environ,
    cwd: &Path,
    cache: Option<&dyn InfoCache>,
) -> Result<Option<PythonInfo>> {
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };
    let absolute = dunce::simplified(&absolute).to_path_buf();

    let Some(target) = runnable_target(&absolute, env, cwd) else {
        return Ok(None);
    };

    let Some(cache) = cache else {
        return Ok(run_probe(&target, env));
    };
    cache.with_entry(&target, &mut |entry| {
        if let Some(stored) = entry.read() {
            if still_fresh(&stored) {
                debug!("cache hit for {}", target.display());
                return Ok(Some(stored));
            }
            debug!("cache entry for {} is stale, dropping it", target.display());
            entry.remove()?;
        }
        let probed = run_probe(&target, env);
        if let Some(info) = &probed {
            if let Err(err) = entry.write(info) {
                // a cache that cannot be written to is still a cache
                warn!("failed to cache {}: {err:#}", target.display());
            }
        }
        Ok(probed)
    })
}

/// The path to actually execute: the candidate itself, or the interpreter a
/// version-manager shim would dispatch to. `None` rejects the candidate.
fn runnable_target(absolute: &Path, env: &Environ, cwd: &Path) -> Option<PathBuf> {
    if !absolute.exists() {
        debug!("candidate {} does not exist", absolute.display());
        return None;
    }
    match managers::shim_target(absolute, env, cwd) {
        managers::ShimResolution::NotAShim => {}
        managers::ShimResolution::Resolved(real) => {
            debug!(
                "shim {} dispatches to {}",
                absolute.display(),
                real.display()
            );
            return runnable_target(&real, env, cwd);
        }
        managers::ShimResolution::Unresolvable => {
            debug!("shim {} has no resolvable version", absolute.display());
            return None;
        }
    }
    if !locations::is_executable(absolute, env) {
        debug!("candidate {} is not executable", absolute.display());
        return None;
    }
    Some(absolute.to_path_buf())
}

/// A stored record is only trusted while the binary it describes is
/// byte-for-byte the one on disk now.
fn still_fresh(stored: &PythonInfo) -> bool {
    match fs::metadata(&stored.executable) {
        Ok(meta) => modified_timestamp(&meta) == stored.mtime && meta.len() == stored.size,
        Err(_) => false,
    }
}

fn modified_timestamp(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Execute the probe and normalize its report. All rejection reasons collapse
/// to `None` after leaving a trace.
fn run_probe(executable: &Path, env: &Environ) -> Option<PythonInfo> {
    let mut command = Command::new(executable);
    command
        .args(["-s", "-c", GET_PYTHON_INFO])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear()
        .envs(probe_env(env));

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!("failed to start {}: {err}", executable.display());
            return None;
        }
    };
    let output = match wait_with_deadline(child, PROBE_TIMEOUT) {
        Ok(Some(output)) => output,
        Ok(None) => {
            warn!(
                "{} did not answer the probe within {}s",
                executable.display(),
                PROBE_TIMEOUT.as_secs()
            );
            return None;
        }
        Err(err) => {
            debug!("failed to wait for {}: {err}", executable.display());
            return None;
        }
    };
    if !output.stderr.is_empty() {
        debug!(
            "stderr of {}: {}",
            executable.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    if !output.status.success() {
        debug!(
            "probe of {} exited with {}",
            executable.display(),
            output.status
        );
        return None;
    }
    let message: ProbeMessage = match serde_json::from_slice(&output.stdout) {
        Ok(message) => message,
        Err(err) => {
            debug!(
                "probe of {} printed malformed metadata: {err}",
                executable.display()
            );
            return None;
        }
    };
    let meta = match fs::metadata(executable) {
        Ok(meta) => meta,
        Err(err) => {
            debug!("candidate {} vanished: {err}", executable.display());
            return None;
        }
    };
    Some(PythonInfo {
        schema: INFO_SCHEMA,
        executable: executable.to_path_buf(),
        system_executable: PathBuf::from(message.base_executable),
        implementation: message.implementation,
        version_info: message.version_info,
        architecture: message.pointer_width,
        platform: message.platform,
        machine: normalize_machine(&message.machine),
        free_threaded: message.free_threaded,
        sysconfig_vars: message.sysconfig_vars,
        sysconfig_paths: message
            .sysconfig_paths
            .into_iter()
            .map(|(scheme, path)| (scheme, PathBuf::from(path)))
            .collect(),
        mtime: modified_timestamp(&meta),
        size: meta.len(),
    })
}

/// The caller's environment with user-site and startup customizations
/// suppressed, so the report describes the interpreter and not the user.
fn probe_env(env: &Environ) -> Vec<(OsString, OsString)> {
    let mut vars: Vec<(OsString, OsString)> = env
        .iter()
        .filter(|(key, _)| {
            let key = key.to_string_lossy();
            !key.eq_ignore_ascii_case("PYTHONSTARTUP") && !key.eq_ignore_ascii_case("PYTHONHOME")
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    vars.push(("PYTHONNOUSERSITE".into(), "1".into()));
    vars.push(("PYTHONIOENCODING".into(), "utf-8".into()));
    vars
}

fn normalize_machine(machine: &str) -> String {
    let lowered = machine.to_ascii_lowercase();
    match lowered.as_str() {
        // Windows spells x86_64 as AMD64
        "amd64" => "x86_64".to_string(),
        "x86" => "i686".to_string(),
        _ => lowered,
    }
}

struct ProbeOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// `Child::wait_with_output` with an upper bound: `Ok(None)` means the
/// deadline passed and the child was killed.
fn wait_with_deadline(
    mut child: Child,
    timeout: Duration,
) -> std::io::Result<Option<ProbeOutput>> {
    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");
    // drain both pipes off-thread so a chatty child can never fill one and
    // deadlock against our wait loop
    let stdout_reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stdout.read_to_end(&mut buffer);
        buffer
    });
    let stderr_reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stderr.read_to_end(&mut buffer);
        buffer
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    };
    Ok(Some(ProbeOutput {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    }))
}
