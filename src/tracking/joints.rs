//! Skeleton joint samples
//!
//! Only three joints matter for touch detection, so a user's latest samples
//! are kept in a fixed array indexed by [`JointKind`].

use serde::{Deserialize, Serialize};

use crate::classifier::CONFIDENCE_THRESHOLD;

/// Joints read from the tracker each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Torso,
    LeftHand,
    RightHand,
}

impl JointKind {
    pub const ALL: [JointKind; 3] = [JointKind::Torso, JointKind::LeftHand, JointKind::RightHand];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Hand joint for a hand index (0 = left, anything else = right)
    pub fn hand(index: usize) -> JointKind {
        if index == 0 {
            JointKind::LeftHand
        } else {
            JointKind::RightHand
        }
    }
}

/// Position in projective sensor space (pixels for x/y, depth units for z)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One joint as reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSample {
    pub kind: JointKind,
    pub position: Vector3,
    pub confidence: f32,
}

impl JointSample {
    /// A joint that has never been seen
    pub fn missing(kind: JointKind) -> Self {
        Self {
            kind,
            position: Vector3::default(),
            confidence: 0.0,
        }
    }

    /// Normalize a raw tracker sample
    ///
    /// Depth 0 means "not measured", so confidence is dropped to zero.
    /// Confidence is clamped into [0, 1]; NaN becomes 0.
    pub fn sanitized(mut self) -> Self {
        if self.position.z == 0.0 || !self.position.z.is_finite() {
            self.confidence = 0.0;
        }
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.confidence >= CONFIDENCE_THRESHOLD
    }
}

/// Latest sample of each tracked joint for one user
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSet {
    samples: [JointSample; 3],
}

impl Default for JointSet {
    fn default() -> Self {
        Self {
            samples: JointKind::ALL.map(JointSample::missing),
        }
    }
}

impl JointSet {
    /// Store a sample in its slot (sanitized)
    pub fn record(&mut self, sample: JointSample) {
        self.samples[sample.kind.index()] = sample.sanitized();
    }

    pub fn get(&self, kind: JointKind) -> &JointSample {
        &self.samples[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &JointSample> {
        self.samples.iter()
    }
}
