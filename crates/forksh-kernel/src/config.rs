//! Configuration for a forksh session.
//!
//! Configuration is loaded from `~/.config/forksh/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::paths;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// REPL prompt.
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Program launched by `start`. Defaults to the running executable.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    /// Arguments put before the user's arguments for `start`.
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,

    /// Directory for worker control sockets.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,

    /// Keep REPL history across sessions.
    #[serde(default = "default_history")]
    pub history: bool,
}

fn default_prompt() -> String {
    "forksh>".to_string()
}

fn default_worker_args() -> Vec<String> {
    vec!["start".to_string()]
}

fn default_history() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            worker_program: None,
            worker_args: default_worker_args(),
            control_dir: None,
            history: default_history(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "forksh")
            .context("Could not determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// The program `start` launches.
    pub fn worker_program(&self) -> Result<PathBuf> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().context("Could not locate the forksh executable"),
        }
    }

    /// Where control sockets are bound.
    pub fn control_dir(&self) -> PathBuf {
        self.control_dir.clone().unwrap_or_else(paths::runtime_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.prompt, "forksh>");
        assert_eq!(config.worker_args, vec!["start"]);
        assert!(config.history);
        assert_eq!(config.control_dir(), paths::runtime_dir());
        assert!(config.worker_program().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prompt = \"fs$\"\nworker_program = \"/usr/bin/worker\"").unwrap();

        let config = KernelConfig::load_from(file.path()).unwrap();
        assert_eq!(config.prompt, "fs$");
        assert_eq!(config.worker_program().unwrap(), PathBuf::from("/usr/bin/worker"));
        assert_eq!(config.worker_args, vec!["start"]);
        assert!(config.history);
    }

    #[test]
    fn test_bad_file_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "history = \"sometimes\"").unwrap();

        let err = KernelConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config"));
    }

    #[test]
    fn test_config_path_is_toml() {
        let path = KernelConfig::config_path().unwrap();
        assert!(path.ends_with("config.toml"));
    }
}
