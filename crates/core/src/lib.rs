#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod action_queue;
pub mod flags;

use rand::Rng;

// Re-export commonly used types
pub use action_queue::ActionQueue;
pub use flags::{PedDataFlags, VehicleDataFlags};
pub use glam::{EulerRot, Quat, Vec2, Vec3};

/// Identifier of a player. A player's id doubles as the id of its own ped.
pub type PlayerId = i32;

/// Network-wide identifier of a synchronized entity.
pub type EntityId = i32;

/// Reference to a host model (vehicle, ped or prop) by its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModelRef(pub i32);

impl ModelRef {
    /// Model hash zero never names a loadable model.
    pub const NONE: Self = Self(0);

    /// Whether this reference names an actual model.
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

/// Fixed tick counter of the host simulation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

/// Draw a fresh positive entity id.
///
/// Ids are random so that peers can mint them without coordination; zero is
/// never returned.
pub fn new_entity_id() -> EntityId {
    rand::thread_rng().gen_range(1..=i32::MAX)
}
