//! Skeleton tracking collaborator interface
//!
//! The processing loop talks to the body tracker only through
//! [`SkeletonSource`]: one blocking wait per cycle, then per-user queries.
//! Hardware drivers live outside this crate; [`ReplaySource`] plays back a
//! recorded session and [`ScriptedSource`] feeds tests.

pub mod replay;
pub mod scripted;

use serde::{Deserialize, Serialize};

use crate::error::SensorError;
use crate::tracking::{JointKind, JointSample, UserId};

pub use replay::ReplaySource;
pub use scripted::ScriptedSource;

/// User lifecycle notifications from the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A body finished calibration and is now tracked
    UserCalibrated(UserId),
    /// A body left the scene
    UserLost(UserId),
}

/// Body tracker as seen by the processing loop
pub trait SkeletonSource: Send {
    /// Block until the tracker has a new set of samples
    fn wait_for_update(&mut self) -> Result<(), SensorError>;

    /// Users currently known to the tracker
    fn users(&self) -> Vec<UserId>;

    /// Whether the skeleton of `user` is being tracked this cycle
    fn is_tracking(&self, user: UserId) -> bool;

    /// Latest sample of one joint
    fn joint(&self, user: UserId, kind: JointKind) -> Result<JointSample, SensorError>;

    /// Lifecycle notifications since the previous call
    fn take_events(&mut self) -> Vec<TrackerEvent>;

    /// Release sensor resources; called once after both loops stopped
    fn release(&mut self) {}
}

/// One recorded tracker cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedCycle {
    #[serde(default)]
    pub users: Vec<RecordedUser>,
    #[serde(default)]
    pub events: Vec<TrackerEvent>,
}

/// One user's state in a recorded cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedUser {
    pub id: UserId,
    #[serde(default = "default_tracking")]
    pub tracking: bool,
    #[serde(default)]
    pub joints: Vec<JointSample>,
}

fn default_tracking() -> bool {
    true
}

impl RecordedCycle {
    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|u| u.id).collect()
    }

    pub fn is_tracking(&self, user: UserId) -> bool {
        self.users.iter().any(|u| u.id == user && u.tracking)
    }

    /// Joint lookup; a joint absent from the recording reads as untracked
    pub fn joint(&self, user: UserId, kind: JointKind) -> Result<JointSample, SensorError> {
        let recorded = self
            .users
            .iter()
            .find(|u| u.id == user)
            .ok_or_else(|| SensorError::Joint {
                user,
                reason: "user not present in this cycle".to_string(),
            })?;

        Ok(recorded
            .joints
            .iter()
            .find(|j| j.kind == kind)
            .copied()
            .unwrap_or_else(|| JointSample::missing(kind)))
    }
}
