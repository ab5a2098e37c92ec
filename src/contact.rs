//! Touch contacts and the per-hand contact lifecycle
//!
//! A contact exists while a hand is `Touched`. The lifecycle turns the stream
//! of classified statuses for one hand into contact events:
//!
//! | from           | to             | event              |
//! |----------------|----------------|--------------------|
//! | Unknown/Cursor | Touched        | `New` (fresh id)   |
//! | Touched        | Touched        | `Moved`            |
//! | Touched        | Cursor/Unknown | `Removed`, dropped |
//! | anything else  |                | none               |
//!
//! Ids come from a [`ContactIdAllocator`] shared by every lifecycle in the
//! process, so they are unique and strictly increasing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::classifier::{Classification, HandStatus};

/// Fixed contact width reported to the consumer
pub const CONTACT_WIDTH: f32 = 10.0;

/// Fixed contact height reported to the consumer
pub const CONTACT_HEIGHT: f32 = 10.0;

/// 2D point in screen space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Process-wide unique contact identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub u64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state carried by each contact event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactState {
    New,
    Moved,
    Removed,
}

impl std::fmt::Display for ContactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactState::New => write!(f, "new"),
            ContactState::Moved => write!(f, "moved"),
            ContactState::Removed => write!(f, "removed"),
        }
    }
}

/// One contact event as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub state: ContactState,
    pub position: Point,
    pub width: f32,
    pub height: f32,
    pub orientation: f32,
}

impl Contact {
    fn new(id: ContactId, position: Point) -> Self {
        Self {
            id,
            state: ContactState::New,
            position,
            width: CONTACT_WIDTH,
            height: CONTACT_HEIGHT,
            orientation: 0.0,
        }
    }
}

/// Shared monotonic id source
///
/// Cloning shares the counter; ids are never reused while any clone lives.
#[derive(Debug, Clone, Default)]
pub struct ContactIdAllocator {
    next: Arc<AtomicU64>,
}

impl ContactIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `first` (useful to keep ids disjoint across sessions)
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    pub fn allocate(&self) -> ContactId {
        ContactId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Next id that would be handed out
    pub fn peek(&self) -> ContactId {
        ContactId(self.next.load(Ordering::Relaxed))
    }
}

/// Per-hand contact state machine
#[derive(Debug, Clone)]
pub struct ContactLifecycle {
    ids: ContactIdAllocator,
    status: HandStatus,
    active: Option<Contact>,
    last_position: Point,
}

impl ContactLifecycle {
    pub fn new(ids: ContactIdAllocator) -> Self {
        Self {
            ids,
            status: HandStatus::Unknown,
            active: None,
            last_position: Point::default(),
        }
    }

    pub fn status(&self) -> HandStatus {
        self.status
    }

    pub fn active_contact(&self) -> Option<&Contact> {
        self.active.as_ref()
    }

    pub fn last_position(&self) -> Point {
        self.last_position
    }

    /// Apply one classification and return the contact event it causes, if any
    ///
    /// The status is always updated. When the classification carries no
    /// position (an `Unknown` hand) the last known position is used.
    pub fn apply(&mut self, classification: Classification) -> Option<Contact> {
        if let Some(position) = classification.position {
            self.last_position = position;
        }
        let position = self.last_position;
        let previous = std::mem::replace(&mut self.status, classification.status);

        match (previous, classification.status) {
            (HandStatus::Touched, HandStatus::Touched) => {
                let contact = self.active.as_mut()?;
                contact.state = ContactState::Moved;
                contact.position = position;
                Some(*contact)
            }
            (HandStatus::Touched, _) => {
                let mut contact = self.active.take()?;
                contact.state = ContactState::Removed;
                contact.position = position;
                Some(contact)
            }
            (_, HandStatus::Touched) => {
                let contact = Contact::new(self.ids.allocate(), position);
                self.active = Some(contact);
                Some(contact)
            }
            _ => None,
        }
    }

    /// Force the hand to `Unknown`, releasing any active contact
    pub fn release(&mut self) -> Option<Contact> {
        self.apply(Classification::UNKNOWN)
    }
}
