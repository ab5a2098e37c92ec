//! Tracked user collection
//!
//! Users live in an arena indexed by their tracker id. The arena has its own
//! lock, separate from the frame batch lock, so lifecycle changes coming from
//! a tracker callback thread cannot race with the per-cycle iteration.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::contact::{Contact, ContactIdAllocator};
use crate::filter::Coefficients;
use crate::frame::FrameAggregator;

use super::user::{UserId, UserTrack};

/// Largest user id accepted into the arena
pub const MAX_USER_ID: UserId = 255;

/// Arena of users indexed by id
#[derive(Debug)]
pub struct UserArena {
    slots: Vec<Option<UserTrack>>,
    coefficients: Coefficients,
    ids: ContactIdAllocator,
}

impl UserArena {
    pub fn new(coefficients: Coefficients, ids: ContactIdAllocator) -> Self {
        Self {
            slots: Vec::new(),
            coefficients,
            ids,
        }
    }

    /// Create a user; returns false if the id is already present or out of range
    pub fn insert(&mut self, id: UserId) -> bool {
        if id > MAX_USER_ID {
            warn!("Ignoring user {} (id above {})", id, MAX_USER_ID);
            return false;
        }

        let index = id as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        if self.slots[index].is_some() {
            return false;
        }

        self.slots[index] = Some(UserTrack::new(id, self.coefficients, self.ids.clone()));
        true
    }

    pub fn get(&self, id: UserId) -> Option<&UserTrack> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: UserId) -> Option<&mut UserTrack> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a user without releasing its hands
    pub fn take(&mut self, id: UserId) -> Option<UserTrack> {
        self.slots.get_mut(id as usize).and_then(Option::take)
    }

    /// Release a user's hands, then remove it. Returns the final events.
    pub fn remove(&mut self, id: UserId) -> Option<Vec<Contact>> {
        let mut user = self.take(id)?;
        Some(user.release_touches())
    }

    pub fn ids(&self) -> Vec<UserId> {
        self.iter().map(UserTrack::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserTrack> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to the user arena
///
/// Cloneable so tracker callback threads can add and remove users while the
/// processing loop runs.
#[derive(Clone)]
pub struct UserRegistry {
    arena: Arc<Mutex<UserArena>>,
    aggregator: Arc<FrameAggregator>,
}

impl UserRegistry {
    pub fn new(
        coefficients: Coefficients,
        ids: ContactIdAllocator,
        aggregator: Arc<FrameAggregator>,
    ) -> Self {
        Self {
            arena: Arc::new(Mutex::new(UserArena::new(coefficients, ids))),
            aggregator,
        }
    }

    /// Register a newly calibrated user
    pub fn add_user(&self, id: UserId) -> bool {
        let added = self.arena.lock().insert(id);
        if added {
            info!("👤 User added: {}", id);
        } else {
            debug!("User {} already tracked", id);
        }
        added
    }

    /// Remove a lost user, blocking until the arena is free
    ///
    /// Any touching hand emits its final `Removed` contact first. Returns the
    /// number of contacts released, or `None` if the user was unknown.
    pub fn remove_user(&self, id: UserId) -> Option<usize> {
        let mut arena = self.arena.lock();
        self.remove_locked(&mut arena, id)
    }

    /// Remove a lost user only if the arena is free right now
    ///
    /// Returns `Err(())` when the lock is contended so the caller can retry on
    /// a later cycle instead of blocking.
    #[allow(clippy::result_unit_err)]
    pub fn try_remove_user(&self, id: UserId) -> Result<Option<usize>, ()> {
        let mut arena = self.arena.try_lock().ok_or(())?;
        Ok(self.remove_locked(&mut arena, id))
    }

    fn remove_locked(&self, arena: &mut UserArena, id: UserId) -> Option<usize> {
        let released = arena.remove(id)?;
        let count = released.len();
        for contact in released {
            debug!("Released contact {} of lost user {}", contact.id, id);
            self.aggregator.push(contact);
        }
        info!("👋 Lost user: {} ({} contact(s) released)", id, count);
        Some(count)
    }

    /// Lock the arena for one processing cycle
    pub fn lock(&self) -> MutexGuard<'_, UserArena> {
        self.arena.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, UserArena>> {
        self.arena.try_lock()
    }

    pub fn active_users(&self) -> Vec<UserId> {
        self.arena.lock().ids()
    }

    pub fn aggregator(&self) -> &Arc<FrameAggregator> {
        &self.aggregator
    }
}
