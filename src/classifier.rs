//! Touch classification against a virtual touch plane
//!
//! A hand is classified by comparing its depth either to a reference joint
//! (relative mode, normally the torso) or to a fixed plane depth (absolute
//! mode). Confidence gates the decision: an unreliable hand is `Unknown`, and
//! an unreliable reference can only ever produce `Cursor`.
//!
//! Positions are converted from cropped sensor space into screen space by a
//! [`ScreenMapping`], which is rebuilt only when geometry changes.

use serde::{Deserialize, Serialize};

use crate::config::{GeometryConfig, TouchSettings};
use crate::contact::Point;
use crate::error::ConfigError;
use crate::tracking::JointSample;

/// Joints below this confidence are treated as not tracked
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Classified state of one hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandStatus {
    /// Hand not reliably tracked
    #[default]
    Unknown,
    /// Hand tracked, hovering in front of the plane
    Cursor,
    /// Hand pushed through the plane
    Touched,
}

impl std::fmt::Display for HandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandStatus::Unknown => write!(f, "unknown"),
            HandStatus::Cursor => write!(f, "cursor"),
            HandStatus::Touched => write!(f, "touched"),
        }
    }
}

/// Where the touch plane sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchMode {
    /// Plane at `offset` depth units in front of the reference joint
    Relative { offset: i32 },
    /// Plane at a fixed sensor depth
    Absolute { plane: i32 },
}

impl TouchMode {
    pub fn from_settings(settings: &TouchSettings) -> Self {
        if settings.relative_mode {
            TouchMode::Relative {
                offset: settings.relative_offset,
            }
        } else {
            TouchMode::Absolute {
                plane: settings.absolute_offset,
            }
        }
    }
}

/// Result of classifying one hand sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub status: HandStatus,
    /// Screen position; `None` when the hand is `Unknown`
    pub position: Option<Point>,
}

impl Classification {
    pub const UNKNOWN: Classification = Classification {
        status: HandStatus::Unknown,
        position: None,
    };
}

/// Classify hand depth only. Pure function of its inputs.
pub fn classify_status(
    mode: TouchMode,
    hand: &JointSample,
    reference: Option<&JointSample>,
) -> HandStatus {
    if !hand.is_reliable() {
        return HandStatus::Unknown;
    }

    match mode {
        TouchMode::Relative { offset } => match reference {
            Some(reference) if reference.is_reliable() => {
                let plane = reference.position.z - offset as f32;
                if hand.position.z > plane {
                    HandStatus::Cursor
                } else {
                    HandStatus::Touched
                }
            }
            // Without a reliable reference only hovering can be trusted
            _ => HandStatus::Cursor,
        },
        TouchMode::Absolute { plane } => {
            if hand.position.z > plane as f32 {
                HandStatus::Cursor
            } else {
                HandStatus::Touched
            }
        }
    }
}

/// Linear conversion from cropped sensor space to screen space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenMapping {
    pub factor_x: f32,
    pub factor_y: f32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub crop_x: f32,
    pub crop_y: f32,
}

impl ScreenMapping {
    /// Derive conversion factors from sensor resolution, crop and display
    pub fn from_geometry(geometry: &GeometryConfig) -> Result<Self, ConfigError> {
        let sensor = &geometry.sensor;
        let crop = &geometry.crop;
        let display = &geometry.display;

        let invalid_crop = || ConfigError::InvalidCrop {
            x_res: sensor.x_res,
            y_res: sensor.y_res,
            crop_x: crop.x,
            crop_y: crop.y,
        };
        // Both edges are cropped; the remaining area must be non-empty
        let cropped_x = crop
            .x
            .checked_mul(2)
            .and_then(|c| sensor.x_res.checked_sub(c))
            .filter(|&w| w > 0)
            .ok_or_else(invalid_crop)?;
        let cropped_y = crop
            .y
            .checked_mul(2)
            .and_then(|c| sensor.y_res.checked_sub(c))
            .filter(|&h| h > 0)
            .ok_or_else(invalid_crop)?;

        if display.width == 0 || display.height == 0 {
            return Err(ConfigError::InvalidDisplay {
                width: display.width,
                height: display.height,
            });
        }

        Ok(Self {
            factor_x: display.width as f32 / cropped_x as f32,
            factor_y: display.height as f32 / cropped_y as f32,
            origin_x: display.x as f32,
            origin_y: display.y as f32,
            crop_x: crop.x as f32,
            crop_y: crop.y as f32,
        })
    }

    /// Map a sensor-space x/y to screen space
    pub fn to_screen(&self, x: f32, y: f32) -> Point {
        Point {
            x: self.origin_x + self.factor_x * (x - self.crop_x),
            y: self.origin_y + self.factor_y * (y - self.crop_y),
        }
    }
}

/// Classifier bound to one settings snapshot and one screen mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchClassifier {
    mode: TouchMode,
    mapping: ScreenMapping,
}

impl TouchClassifier {
    pub fn new(mode: TouchMode, mapping: ScreenMapping) -> Self {
        Self { mode, mapping }
    }

    pub fn mode(&self) -> TouchMode {
        self.mode
    }

    pub fn mapping(&self) -> &ScreenMapping {
        &self.mapping
    }

    /// Classify a (filtered) hand sample. A position is only produced when
    /// the hand is reliably tracked.
    pub fn classify(&self, hand: &JointSample, reference: Option<&JointSample>) -> Classification {
        let status = classify_status(self.mode, hand, reference);
        if status == HandStatus::Unknown {
            return Classification::UNKNOWN;
        }

        Classification {
            status,
            position: Some(self.mapping.to_screen(hand.position.x, hand.position.y)),
        }
    }
}
