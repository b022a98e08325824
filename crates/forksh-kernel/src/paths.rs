//! XDG Base Directory paths for forksh.
//!
//! | Purpose | XDG Variable | Default |
//! |---------|--------------|---------|
//! | Runtime (control sockets) | `$XDG_RUNTIME_DIR` | system temp dir |
//! | Data (REPL history) | `$XDG_DATA_HOME` | `~/.local/share` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` |

use std::path::PathBuf;

use directories::BaseDirs;

// ═══════════════════════════════════════════════════════════════════════════
// XDG Primitives
// ═══════════════════════════════════════════════════════════════════════════

/// Get the user's home directory.
///
/// Returns `$HOME` or falls back to `/tmp` if not set.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Get XDG data home directory.
///
/// Returns `$XDG_DATA_HOME` or falls back to `~/.local/share`.
pub fn xdg_data_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
}

/// Get XDG config home directory.
///
/// Returns `$XDG_CONFIG_HOME` or falls back to `~/.config`.
pub fn xdg_config_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config"))
}

/// Get XDG runtime directory.
///
/// Returns `$XDG_RUNTIME_DIR` or falls back to the system temp directory.
pub fn xdg_runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

// ═══════════════════════════════════════════════════════════════════════════
// forksh Paths
// ═══════════════════════════════════════════════════════════════════════════

/// Where worker control sockets are bound: `$XDG_RUNTIME_DIR/forksh`.
pub fn runtime_dir() -> PathBuf {
    xdg_runtime_dir().join("forksh")
}

/// `$XDG_DATA_HOME/forksh`.
pub fn data_dir() -> PathBuf {
    xdg_data_home().join("forksh")
}

/// `$XDG_CONFIG_HOME/forksh`.
pub fn config_dir() -> PathBuf {
    xdg_config_home().join("forksh")
}

/// REPL line history.
pub fn history_file() -> PathBuf {
    data_dir().join("history.txt")
}
