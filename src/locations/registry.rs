//! PEP 514: Python installations registered in the Windows registry.
//!
//! Distributions register under `Software\Python\<Company>\<Tag>` in both
//! the per-user and the machine hive; the interpreter path lives in the
//! `InstallPath` subkey. The per-user hive is enumerated first, matching the
//! precedence the launcher gives it.

use std::path::PathBuf;

use crate::discovery::Environ;

#[cfg(windows)]
pub(crate) fn candidates(_env: &Environ) -> Vec<PathBuf> {
    use tracing::debug;
    use windows_registry::{Key, CURRENT_USER, LOCAL_MACHINE};

    fn collect(hive: &Key, found: &mut Vec<PathBuf>) -> windows_registry::Result<()> {
        let python = hive.open(r"Software\Python")?;
        for company in python.keys()? {
            let Ok(company_key) = python.open(&company) else {
                continue;
            };
            let Ok(tags) = company_key.keys() else {
                continue;
            };
            for tag in tags {
                let Ok(install) = company_key.open(format!(r"{tag}\InstallPath")) else {
                    continue;
                };
                let executable = install
                    .get_string("WindowedExecutablePath")
                    .or_else(|_| install.get_string("ExecutablePath"))
                    .or_else(|_| {
                        install
                            .get_string("")
                            .map(|prefix| format!(r"{prefix}\python.exe"))
                    });
                if let Ok(executable) = executable {
                    found.push(PathBuf::from(executable));
                }
            }
        }
        Ok(())
    }

    let mut found = Vec::new();
    for (name, hive) in [("HKCU", CURRENT_USER), ("HKLM", LOCAL_MACHINE)] {
        if let Err(err) = collect(hive, &mut found) {
            debug!("skipping {name} registry enumeration: {err}");
        }
    }
    found
}

#[cfg(not(windows))]
pub(crate) fn candidates(_env: &Environ) -> Vec<PathBuf> {
    Vec::new()
}
