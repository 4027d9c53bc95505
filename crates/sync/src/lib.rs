#![warn(missing_docs)]
//! Entity synchronization: records of remote and local entities, the host
//! simulation boundary, and the per-tick reconciler.

pub mod entity;
pub mod host;
pub mod memory;
pub mod pool;
pub mod reconciler;

pub use entity::{Extents, ReconcileState, SyncStamps, SyncedPed, SyncedVehicle};
pub use host::{FieldKind, FieldValue, HostError, HostWorld, ModelDimensions, Toggle};
pub use memory::{MemoryObject, MemoryWorld, ObjectId};
pub use pool::{EntityPool, Shared};
pub use reconciler::{
    capture_ped, capture_vehicle, predict, rotation_error_degrees, wrap_degrees, Correction,
    ReconcileConfig, Reconciler, TickClock, TickReport,
};
