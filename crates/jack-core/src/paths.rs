//! Well-known filesystem locations.

use std::ffi::OsStr;
use std::path::PathBuf;

/// Default command socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/jack.sock";

/// Environment variable overriding the command socket path.
pub const SOCKET_PATH_ENV: &str = "JACK_SOCKET_PATH";

/// Filename prefix identifying a plugin binary.
pub const PLUGIN_BINARY_PREFIX: &str = "jack-plugin-";

/// The command socket path: `JACK_SOCKET_PATH` if set, else the default.
#[must_use]
pub fn socket_path() -> PathBuf {
    socket_path_from(std::env::var_os(SOCKET_PATH_ENV).as_deref())
}

/// Resolve the socket path from an explicit override value.
#[must_use]
pub fn socket_path_from(override_value: Option<&OsStr>) -> PathBuf {
    match override_value {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

/// Directories scanned for plugin binaries, in order.
#[must_use]
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./bin"),
        PathBuf::from("/usr/lib/jack/plugins"),
        PathBuf::from("/opt/jack/plugins"),
    ]
}
