//! Touch settings polling
//!
//! The settings store offers no change notifications, so the settings loop
//! re-reads it at a fixed interval and only acts when a value changed.

use anyhow::Result;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::{AppConfig, TouchSettings};

/// Where touch settings are read from
pub trait SettingsSource: Send {
    /// Read the current settings
    fn read(&mut self) -> Result<TouchSettings>;
}

/// Settings read from the `touch` section of the YAML config file
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettingsSource {
    fn read(&mut self) -> Result<TouchSettings> {
        Ok(AppConfig::load_blocking(&self.path)?.touch)
    }
}

/// In-memory settings shared with whoever edits them (UI, tests)
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<TouchSettings>>,
}

impl SharedSettings {
    pub fn new(settings: TouchSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn set(&self, settings: TouchSettings) {
        *self.inner.write() = settings;
    }

    pub fn get(&self) -> TouchSettings {
        *self.inner.read()
    }
}

impl SettingsSource for SharedSettings {
    fn read(&mut self) -> Result<TouchSettings> {
        Ok(self.get())
    }
}

/// Remembers the last applied settings and reports changes
#[derive(Debug, Clone)]
pub struct SettingsTracker {
    current: TouchSettings,
}

impl SettingsTracker {
    pub fn new(initial: TouchSettings) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> TouchSettings {
        self.current
    }

    /// Record freshly read settings; returns them only if they differ
    pub fn update(&mut self, fresh: TouchSettings) -> Option<TouchSettings> {
        if fresh == self.current {
            debug!("Touch settings unchanged");
            return None;
        }

        self.current = fresh;
        info!("Current configuration:");
        info!("  Virtual touch plane offset: {}", fresh.relative_offset);
        info!("  Virtual touch plane absolute offset: {}", fresh.absolute_offset);
        info!("  Relative touch detection enabled: {}", fresh.relative_mode);
        Some(fresh)
    }
}
