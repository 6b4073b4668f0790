//! Plugin discovery: filesystem scan for provider binaries.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use jack_core::paths::PLUGIN_BINARY_PREFIX;

/// Scan the given directories, in order, for executable files named
/// `jack-plugin-*`. When the same filename appears in more than one
/// directory, the earlier directory wins (so `./bin` shadows the system
/// paths during development). Entries within a directory are visited in
/// name order, so the result is deterministic.
#[must_use]
pub fn scan_plugin_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen: BTreeSet<OsString> = BTreeSet::new();
    let mut found = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping plugin directory");
                continue;
            }
        };
        let mut names: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        names.sort();
        for path in names {
            if !is_plugin_candidate(&path) {
                continue;
            }
            let Some(file_name) = path.file_name() else {
                continue;
            };
            if seen.insert(file_name.to_os_string()) {
                found.push(path);
            } else {
                debug!(binary = %path.display(), "shadowed by an earlier directory");
            }
        }
    }
    found
}

fn is_plugin_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !name.starts_with(PLUGIN_BINARY_PREFIX) {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(md) => md.is_file() && is_executable(&md),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn is_executable(md: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_md: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn touch_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_scan_filters_by_prefix_and_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        touch_executable(dir.path(), "jack-plugin-firewall");
        touch_executable(dir.path(), "jack-plugin-dnsmasq");
        // Wrong prefix.
        touch_executable(dir.path(), "firewall-helper");
        // Right prefix, not executable.
        fs::write(dir.path().join("jack-plugin-notes.txt"), b"notes").unwrap();
        #[cfg(unix)]
        fs::set_permissions(
            dir.path().join("jack-plugin-notes.txt"),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let found = scan_plugin_dirs(&[dir.path().to_path_buf()]);
        let names: Vec<String> = found
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        assert_eq!(names, vec!["jack-plugin-dnsmasq", "jack-plugin-firewall"]);
    }

    #[test]
    fn test_earlier_directory_shadows_later() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let preferred = touch_executable(first.path(), "jack-plugin-firewall");
        touch_executable(second.path(), "jack-plugin-firewall");
        touch_executable(second.path(), "jack-plugin-leds");

        let found = scan_plugin_dirs(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&preferred));
        assert!(found.iter().any(|p| p.ends_with("jack-plugin-leds")));
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let found = scan_plugin_dirs(&[PathBuf::from("/nonexistent/jack-plugins")]);
        assert!(found.is_empty());
    }
}
