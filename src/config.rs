//! # Configuration
//!
//! Settings are read from a JSON file (`CGB_OVERSEER_CONFIG`, or `config.json` in the
//! platform's config directory) and then overridden by environment variables. A missing file
//! means defaults. The command line is never consulted here: it belongs to the invocation.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::instance::InstanceScope;

pub const CONFIG_PATH_VAR: &str = "CGB_OVERSEER_CONFIG";
pub const SCOPE_VAR: &str = "CGB_OVERSEER_SCOPE";
pub const LOG_VAR: &str = "CGB_OVERSEER_LOG";
pub const SOCKET_DIR_VAR: &str = "CGB_OVERSEER_SOCKET_DIR";
pub const MACHINE_WIDE_VAR: &str = "CGB_OVERSEER_MACHINE_WIDE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    /// Name of the single-instance scope.
    pub scope_name: String,
    /// Enforce one instance per machine instead of per user session.
    pub machine_wide: bool,
    /// Directory for the scope socket (Unix only).
    pub socket_dir: Option<PathBuf>,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
    /// Also write the log to this file.
    pub log_file: Option<PathBuf>,
    /// How long a later process waits for the running instance to take its arguments.
    pub transfer_timeout_secs: u64,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            scope_name: "cgb-overseer".to_string(),
            machine_wide: false,
            socket_dir: None,
            log_level: "info".to_string(),
            log_file: None,
            transfer_timeout_secs: 10,
        }
    }
}

impl OverseerConfig {
    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let config = match Self::config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "cgb", "overseer")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Applies overrides looked up through `lookup` (the environment, in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(scope) = lookup(SCOPE_VAR).filter(|s| !s.is_empty()) {
            self.scope_name = scope;
        }
        if let Some(level) = lookup(LOG_VAR).filter(|s| !s.is_empty()) {
            self.log_level = level;
        }
        if let Some(dir) = lookup(SOCKET_DIR_VAR).filter(|s| !s.is_empty()) {
            self.socket_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(MACHINE_WIDE_VAR) {
            self.machine_wide = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        self
    }

    /// Log level; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }

    pub fn scope(&self) -> InstanceScope {
        let scope = InstanceScope::new(&self.scope_name).machine_wide(self.machine_wide);
        match &self.socket_dir {
            Some(dir) => scope.with_dir(dir),
            None => scope,
        }
    }
}
