//! Installer configuration
//!
//! This module handles the runtime configuration of the installer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::subprocess::executor::DEFAULT_POLL_INTERVAL;

/// Environment variable overriding the default logs root
pub const LOGS_DIR_ENV: &str = "DK_INSTALLER_LOGS_DIR";

/// Installer configuration
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub verbose: u8,
    pub debug: bool,
    pub logs_root: PathBuf,
    pub drain_poll_interval: Duration,
    pub interrupt_on_ctrl_c: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            debug: false,
            logs_root: PathBuf::from(".dk-installer"),
            drain_poll_interval: DEFAULT_POLL_INTERVAL,
            interrupt_on_ctrl_c: true,
        }
    }
}

impl InstallerConfig {
    /// Create a configuration with the platform's default logs root
    pub fn new(verbose: u8) -> Result<Self> {
        Ok(Self {
            verbose,
            logs_root: default_logs_root()?,
            ..Default::default()
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_logs_root(mut self, logs_root: impl Into<PathBuf>) -> Self {
        self.logs_root = logs_root.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    pub fn with_ctrl_c(mut self, enabled: bool) -> Self {
        self.interrupt_on_ctrl_c = enabled;
        self
    }

    /// Get the log level filter for the process-wide subscriber
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Where session archives are kept when nothing else is configured
///
/// `DK_INSTALLER_LOGS_DIR` wins. Otherwise Windows uses
/// `Documents/DataKitchenApps/logs` and every other platform a
/// `.dk-installer` folder next to the executable.
pub fn default_logs_root() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(LOGS_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    if cfg!(windows) {
        if let Some(documents) = dirs::document_dir() {
            return Ok(documents.join("DataKitchenApps").join("logs"));
        }
    }

    let exe = std::env::current_exe().context("Could not locate the installer executable")?;
    let dir = exe
        .parent()
        .map(PathBuf::from)
        .context("Installer executable has no parent directory")?;
    Ok(dir.join(".dk-installer"))
}
