//! Application path management.
//!
//! The configuration file is looked up in the working directory first
//! (typical when running from a checkout), then in the per-user config
//! directory (`~/.config/vtouch-gw` on Linux, `%APPDATA%\vtouch-gw` on
//! Windows). Logs go next to the chosen config file.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used under the platform config directory
const APP_NAME: &str = "vtouch-gw";

/// Default config file name
pub const CONFIG_FILE: &str = "config.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether the config was found in the working directory
    pub is_local: bool,
}

impl AppPaths {
    /// Detect paths from the current environment.
    ///
    /// Note: this runs before logging is initialized.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::detect_from(&cwd, dirs::config_dir())
    }

    /// Detection against an explicit working directory and config root
    pub fn detect_from(cwd: &Path, config_root: Option<PathBuf>) -> Self {
        let local = cwd.join(CONFIG_FILE);
        if local.exists() {
            return Self {
                config: local,
                logs_dir: cwd.join("logs"),
                is_local: true,
            };
        }

        let app_dir = config_root.unwrap_or_else(|| cwd.to_path_buf()).join(APP_NAME);
        Self {
            config: app_dir.join(CONFIG_FILE),
            logs_dir: app_dir.join("logs"),
            is_local: false,
        }
    }

    /// Use an explicitly given config file; logs go next to it
    pub fn from_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let base = config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            logs_dir: base.join("logs"),
            config,
            is_local: true,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the logs directory if missing
    pub fn ensure_logs_dir(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir).with_context(|| {
                format!("Failed to create logs directory {}", self.logs_dir.display())
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_wins() -> anyhow::Result<()> {
        let cwd = tempfile::TempDir::new()?;
        std::fs::write(cwd.path().join(CONFIG_FILE), "")?;

        let paths = AppPaths::detect_from(cwd.path(), Some(PathBuf::from("/home/x/.config")));
        assert!(paths.is_local);
        assert_eq!(paths.config, cwd.path().join(CONFIG_FILE));
        assert_eq!(paths.logs_dir, cwd.path().join("logs"));
        Ok(())
    }

    #[test]
    fn test_falls_back_to_user_config_dir() -> anyhow::Result<()> {
        let cwd = tempfile::TempDir::new()?;
        let root = tempfile::TempDir::new()?;

        let paths = AppPaths::detect_from(cwd.path(), Some(root.path().to_path_buf()));
        assert!(!paths.is_local);
        assert_eq!(paths.config, root.path().join(APP_NAME).join(CONFIG_FILE));
        assert_eq!(paths.base_dir(), root.path().join(APP_NAME));
        Ok(())
    }

    #[test]
    fn test_explicit_config() {
        let paths = AppPaths::from_config("config.yaml");
        assert_eq!(paths.logs_dir, PathBuf::from("./logs"));

        let paths = AppPaths::from_config("/etc/vtouch/touch.yaml");
        assert_eq!(paths.logs_dir, PathBuf::from("/etc/vtouch/logs"));
    }

    #[test]
    fn test_ensure_logs_dir() -> anyhow::Result<()> {
        let root = tempfile::TempDir::new()?;
        let paths = AppPaths::from_config(root.path().join(CONFIG_FILE));

        paths.ensure_logs_dir()?;
        assert!(paths.logs_dir.is_dir());
        paths.ensure_logs_dir()?;
        Ok(())
    }
}
