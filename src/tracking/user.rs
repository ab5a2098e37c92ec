//! One tracked body with two hands

use serde::{Deserialize, Serialize};

use crate::classifier::TouchClassifier;
use crate::contact::{Contact, ContactIdAllocator};
use crate::filter::Coefficients;

use super::hand::HandTrack;
use super::joints::{JointKind, JointSample, JointSet};

/// Tracker-assigned user id
pub type UserId = u32;

/// Number of hands per user
pub const HANDS_PER_USER: usize = 2;

/// RGB cursor color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl CursorColor {
    pub const BLUE: CursorColor = CursorColor::rgb(0, 0, 255);
    pub const RED: CursorColor = CursorColor::rgb(255, 0, 0);
    pub const GREEN: CursorColor = CursorColor::rgb(0, 128, 0);
    pub const VIOLET: CursorColor = CursorColor::rgb(238, 130, 238);
    pub const YELLOW: CursorColor = CursorColor::rgb(255, 255, 0);
    pub const BROWN: CursorColor = CursorColor::rgb(165, 42, 42);
    pub const CYAN: CursorColor = CursorColor::rgb(0, 255, 255);
    pub const MAGENTA: CursorColor = CursorColor::rgb(255, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Deterministic color for a user id
    pub fn for_user(id: UserId) -> Self {
        PALETTE[id as usize % PALETTE.len()]
    }
}

/// Per-user cursor colors
pub const PALETTE: [CursorColor; 8] = [
    CursorColor::BLUE,
    CursorColor::RED,
    CursorColor::GREEN,
    CursorColor::VIOLET,
    CursorColor::YELLOW,
    CursorColor::BROWN,
    CursorColor::CYAN,
    CursorColor::MAGENTA,
];

/// A calibrated body and its two hands
#[derive(Debug, Clone)]
pub struct UserTrack {
    id: UserId,
    color: CursorColor,
    hands: [HandTrack; HANDS_PER_USER],
    joints: JointSet,
}

impl UserTrack {
    pub fn new(id: UserId, coefficients: Coefficients, ids: ContactIdAllocator) -> Self {
        let color = CursorColor::for_user(id);
        Self {
            id,
            color,
            hands: [
                HandTrack::new(color, coefficients, ids.clone()),
                HandTrack::new(color, coefficients, ids),
            ],
            joints: JointSet::default(),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn color(&self) -> CursorColor {
        self.color
    }

    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    /// Hand by index; indices above 1 are clamped to the right hand
    pub fn hand(&self, index: usize) -> &HandTrack {
        &self.hands[index.min(HANDS_PER_USER - 1)]
    }

    /// Store the latest joint samples for this cycle
    pub fn record_joints(&mut self, samples: impl IntoIterator<Item = JointSample>) {
        for sample in samples {
            self.joints.record(sample);
        }
    }

    /// Update one hand from the recorded joints
    ///
    /// Indices above 1 are clamped to 1.
    pub fn update_hand(&mut self, index: usize, classifier: &TouchClassifier) -> Option<Contact> {
        let index = index.min(HANDS_PER_USER - 1);
        let hand = *self.joints.get(JointKind::hand(index));
        let torso = *self.joints.get(JointKind::Torso);

        self.hands[index].update(&hand, Some(&torso), classifier)
    }

    /// Update both hands in order (left, right), returning their events
    pub fn update_hands(&mut self, classifier: &TouchClassifier) -> Vec<Contact> {
        (0..HANDS_PER_USER)
            .filter_map(|index| self.update_hand(index, classifier))
            .collect()
    }

    /// Force one hand to `Unknown`; indices above 1 are clamped to 1
    pub fn release_hand(&mut self, index: usize) -> Option<Contact> {
        self.hands[index.min(HANDS_PER_USER - 1)].release()
    }

    /// Force both hands to `Unknown`, returning any final `Removed` events
    pub fn release_touches(&mut self) -> Vec<Contact> {
        (0..HANDS_PER_USER)
            .filter_map(|index| self.release_hand(index))
            .collect()
    }
}
