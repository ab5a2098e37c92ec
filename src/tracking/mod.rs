//! Per-user and per-hand tracking state
//!
//! Joint samples flow from the skeleton source into a [`UserTrack`], which
//! drives its two [`HandTrack`]s. Users are held in a [`UserRegistry`].

pub mod hand;
pub mod joints;
pub mod registry;
pub mod user;

pub use hand::HandTrack;
pub use joints::{JointKind, JointSample, JointSet, Vector3};
pub use registry::{UserArena, UserRegistry, MAX_USER_ID};
pub use user::{CursorColor, UserId, UserTrack, HANDS_PER_USER, PALETTE};
