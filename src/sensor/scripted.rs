//! In-memory skeleton source driven by a script of cycles

use std::collections::{HashSet, VecDeque};

use crate::error::SensorError;
use crate::tracking::{JointKind, JointSample, UserId};

use super::{RecordedCycle, SkeletonSource, TrackerEvent};

/// One scripted step
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Cycle(RecordedCycle),
    /// `wait_for_update` fails with this message
    Fail(String),
}

/// Source replaying scripted steps without any pacing
///
/// Ends with [`SensorError::EndOfStream`] once the script is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    current: RecordedCycle,
    pending_events: Vec<TrackerEvent>,
    broken_users: HashSet<UserId>,
    panicking_users: HashSet<UserId>,
    released: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_cycle(&mut self, cycle: RecordedCycle) -> &mut Self {
        self.steps.push_back(ScriptStep::Cycle(cycle));
        self
    }

    pub fn push_failure(&mut self, message: impl Into<String>) -> &mut Self {
        self.steps.push_back(ScriptStep::Fail(message.into()));
        self
    }

    /// Make every joint lookup for `user` fail
    pub fn break_user(&mut self, user: UserId) -> &mut Self {
        self.broken_users.insert(user);
        self
    }

    /// Make every joint lookup for `user` panic
    pub fn panic_user(&mut self, user: UserId) -> &mut Self {
        self.panicking_users.insert(user);
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl SkeletonSource for ScriptedSource {
    fn wait_for_update(&mut self) -> Result<(), SensorError> {
        match self.steps.pop_front() {
            Some(ScriptStep::Cycle(cycle)) => {
                self.pending_events.extend(cycle.events.iter().copied());
                self.current = cycle;
                Ok(())
            }
            Some(ScriptStep::Fail(message)) => Err(SensorError::Update(message)),
            None => Err(SensorError::EndOfStream),
        }
    }

    fn users(&self) -> Vec<UserId> {
        self.current.user_ids()
    }

    fn is_tracking(&self, user: UserId) -> bool {
        self.current.is_tracking(user)
    }

    fn joint(&self, user: UserId, kind: JointKind) -> Result<JointSample, SensorError> {
        if self.panicking_users.contains(&user) {
            panic!("scripted panic reading {:?} of user {}", kind, user);
        }
        if self.broken_users.contains(&user) {
            return Err(SensorError::Joint {
                user,
                reason: "scripted failure".to_string(),
            });
        }
        self.current.joint(user, kind)
    }

    fn take_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
