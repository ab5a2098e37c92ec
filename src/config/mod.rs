//! Configuration management for VTouch GW
//!
//! Handles loading, parsing, and validating the YAML configuration file. The
//! touch plane settings are re-read periodically by the settings loop (see
//! [`poller`]), everything else is read once at startup.

pub mod poller;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::classifier::ScreenMapping;
use crate::filter::Coefficients;

pub use poller::{FileSettingsSource, SettingsSource, SettingsTracker, SharedSettings};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub touch: TouchSettings,
    pub filter: FilterConfig,
    pub geometry: GeometryConfig,
    pub frames: FramesConfig,
    pub engine: EngineConfig,
}

/// Touch plane settings, polled while running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TouchSettings {
    /// Plane distance in front of the torso (sensor depth units)
    pub relative_offset: i32,
    /// Plane depth from the sensor (sensor depth units)
    pub absolute_offset: i32,
    /// Relative (torso-based) or absolute plane
    pub relative_mode: bool,
}

impl Default for TouchSettings {
    fn default() -> Self {
        Self {
            relative_offset: default_relative_offset(),
            absolute_offset: default_absolute_offset(),
            relative_mode: true,
        }
    }
}

/// Hand smoothing filter
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Sensor polling rate (Hz)
    pub sample_rate: f64,
    /// Low-pass cutoff (Hz)
    pub cutoff: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::filter::DEFAULT_SAMPLE_RATE,
            cutoff: crate::filter::DEFAULT_CUTOFF,
        }
    }
}

/// Sensor and display geometry for coordinate conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub sensor: SensorConfig,
    pub crop: CropConfig,
    pub display: DisplayConfig,
}

/// Depth map resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SensorConfig {
    pub x_res: u32,
    pub y_res: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { x_res: 640, y_res: 480 }
    }
}

/// Pixels cut from each side of the sensor frame (edges are unreliable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CropConfig {
    pub x: u32,
    pub y: u32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self { x: 20, y: 20 }
    }
}

/// Virtual screen covering all displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Left edge (negative when a display sits left of the primary)
    pub x: i32,
    /// Top edge
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Frame delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FramesConfig {
    /// Notify the consumer even when a cycle produced no contacts
    pub always_notify: bool,
    /// Capacity of the consumer channel
    pub channel_capacity: usize,
    /// Undeliverable frames kept for retry
    pub backlog_capacity: usize,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            always_notify: false,
            channel_capacity: 64,
            backlog_capacity: crate::frame::DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

/// Processing and settings loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between settings polls
    pub settings_poll_ms: u64,
    /// Consecutive sensor failures tolerated before giving up
    pub max_consecutive_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings_poll_ms: default_settings_poll_ms(),
            max_consecutive_failures: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents, path)
    }

    /// Blocking variant for use on plain threads
    pub fn load_blocking(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        // An empty file is a valid "all defaults" config
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        self.filter_coefficients()
            .context("Invalid filter configuration")?;
        self.screen_mapping()
            .context("Invalid geometry configuration")?;

        if self.engine.settings_poll_ms == 0 {
            anyhow::bail!("engine.settings_poll_ms must be greater than 0");
        }
        if self.frames.channel_capacity == 0 {
            anyhow::bail!("frames.channel_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Filter coefficients for the configured operating point
    pub fn filter_coefficients(&self) -> Result<Coefficients, crate::error::ConfigError> {
        Coefficients::low_pass(self.filter.sample_rate, self.filter.cutoff)
    }

    /// Sensor to screen conversion for the configured geometry
    pub fn screen_mapping(&self) -> Result<ScreenMapping, crate::error::ConfigError> {
        ScreenMapping::from_geometry(&self.geometry)
    }
}

// Default value functions
fn default_relative_offset() -> i32 { 350 }
fn default_absolute_offset() -> i32 { 900 }
fn default_settings_poll_ms() -> u64 { 500 }
