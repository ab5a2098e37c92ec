//! One tracked hand: smoothing, classification and contact lifecycle

use crate::classifier::{Classification, HandStatus, TouchClassifier};
use crate::contact::{Contact, ContactIdAllocator, ContactLifecycle};
use crate::filter::{AxisFilter, Coefficients};

use super::joints::{JointSample, Vector3};
use super::user::CursorColor;

/// Per-hand pipeline state
#[derive(Debug, Clone)]
pub struct HandTrack {
    x_filter: AxisFilter,
    y_filter: AxisFilter,
    /// False until the first reliable sample seeded the filters
    seeded: bool,
    lifecycle: ContactLifecycle,
    color: CursorColor,
    /// Last filtered sensor-space position
    filtered: Vector3,
}

impl HandTrack {
    pub fn new(color: CursorColor, coefficients: Coefficients, ids: ContactIdAllocator) -> Self {
        Self {
            x_filter: AxisFilter::from_coefficients(coefficients),
            y_filter: AxisFilter::from_coefficients(coefficients),
            seeded: false,
            lifecycle: ContactLifecycle::new(ids),
            color,
            filtered: Vector3::default(),
        }
    }

    pub fn status(&self) -> HandStatus {
        self.lifecycle.status()
    }

    pub fn color(&self) -> CursorColor {
        self.color
    }

    pub fn active_contact(&self) -> Option<&Contact> {
        self.lifecycle.active_contact()
    }

    /// Last smoothed sensor-space position
    pub fn filtered_position(&self) -> Vector3 {
        self.filtered
    }

    /// Run one cycle for this hand and return the contact event, if any
    ///
    /// Unreliable samples skip the filters entirely so a lost hand cannot drag
    /// the smoothed position towards garbage.
    pub fn update(
        &mut self,
        hand: &JointSample,
        reference: Option<&JointSample>,
        classifier: &TouchClassifier,
    ) -> Option<Contact> {
        if !hand.is_reliable() {
            return self.lifecycle.apply(Classification::UNKNOWN);
        }

        let raw = hand.position;
        if self.seeded {
            self.filtered.x = self.x_filter.process(raw.x as f64) as f32;
            self.filtered.y = self.y_filter.process(raw.y as f64) as f32;
        } else {
            self.x_filter.reset(raw.x as f64);
            self.y_filter.reset(raw.y as f64);
            self.filtered.x = raw.x;
            self.filtered.y = raw.y;
            self.seeded = true;
        }
        self.filtered.z = raw.z;

        let smoothed = JointSample {
            position: self.filtered,
            ..*hand
        };

        self.lifecycle.apply(classifier.classify(&smoothed, reference))
    }

    /// Force this hand to `Unknown` regardless of sensor state
    pub fn release(&mut self) -> Option<Contact> {
        self.lifecycle.release()
    }
}
