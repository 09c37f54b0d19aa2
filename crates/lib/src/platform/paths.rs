//! Per-user default directories.

use crate::consts::APP_NAME;
use std::path::PathBuf;

/// The user's home directory, or the system temp dir when it cannot be determined.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// The user's home directory, or the system temp dir when it cannot be determined.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Directory for the local artifact cache and other disposable state.
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Directory for the local artifact cache and other disposable state.
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join(".cache"))
    .join(APP_NAME)
}
