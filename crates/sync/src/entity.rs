//! Synchronized entity records.
//!
//! A record holds the last authoritative state received for an entity, the
//! tick stamps the reconciler uses to decide what to write, and the host
//! handle once the entity has been materialized.

use coopsync_core::{EntityId, ModelRef, PedDataFlags, PlayerId, Quat, SimTick, Vec3, VehicleDataFlags};
use coopsync_net::packets::{PedFullState, PedSync, VehicleFullState, VehicleSync};
use std::time::Instant;

/// Where an entity stands in the reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileState {
    /// Owner, model or model bounds still unknown.
    #[default]
    NotReady,
    /// Waiting for the host object to be (re)created.
    Materializing,
    /// Host object exists and is being corrected.
    Correcting,
}

/// Reference points on a model used to steer its orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extents {
    /// Center of the front face.
    pub front: Vec3,
    /// Center of the top face.
    pub top: Vec3,
}

/// Tick bookkeeping shared by every entity kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStamps {
    /// Tick the last sync arrived on.
    pub last_synced: SimTick,
    /// Tick the last full sync arrived on.
    pub last_full_synced: SimTick,
    /// Tick the reconciler last wrote per-tick fields.
    pub last_updated: SimTick,
    /// Wall-clock arrival of the last sync, for dead reckoning.
    pub last_synced_at: Instant,
}

impl SyncStamps {
    /// Stamps for a record created at `tick`.
    pub fn new(tick: SimTick, now: Instant) -> Self {
        Self {
            last_synced: tick,
            last_full_synced: SimTick::ZERO,
            last_updated: SimTick::ZERO,
            last_synced_at: now,
        }
    }

    /// A sync arrived since the last processed update.
    pub fn needs_update(&self) -> bool {
        self.last_synced >= self.last_updated
    }

    /// Full-state fields are newer than the last processed update.
    pub fn full_state_pending(&self) -> bool {
        self.last_full_synced >= self.last_updated
    }

    fn synced(&mut self, tick: SimTick, now: Instant, full: bool) {
        self.last_synced = tick;
        self.last_synced_at = now;
        if full {
            self.last_full_synced = tick;
        }
    }
}

/// A vehicle known to the session.
#[derive(Debug, Clone)]
pub struct SyncedVehicle<H> {
    /// Network id.
    pub id: EntityId,
    /// Owning player, once known.
    pub owner_id: Option<PlayerId>,
    /// Host object, once created.
    pub handle: Option<H>,
    /// Model, known after the first full sync.
    pub model: Option<ModelRef>,
    /// Authoritative position.
    pub position: Vec3,
    /// Authoritative orientation.
    pub quaternion: Quat,
    /// Authoritative velocity.
    pub velocity: Vec3,
    /// Authoritative angular velocity.
    pub rotation_velocity: Vec3,
    /// Throttle input.
    pub throttle: f32,
    /// Brake input.
    pub brake: f32,
    /// Steering angle in degrees.
    pub steering: f32,
    /// Discrete state.
    pub flags: VehicleDataFlags,
    /// Latest full-state block.
    pub full: Option<VehicleFullState>,
    /// Tick bookkeeping.
    pub stamps: SyncStamps,
    /// Steering reference points of the model.
    pub extents: Extents,
    /// Owned by this peer: read from the host, never corrected.
    pub is_local: bool,
    /// Runs on rails.
    pub is_train: bool,
    /// Outcome of the last reconcile pass.
    pub state: ReconcileState,
}

impl<H> SyncedVehicle<H> {
    /// Remote vehicle seeded from its first sync.
    pub fn from_sync(sync: VehicleSync, tick: SimTick, now: Instant) -> Self {
        let mut vehicle = Self {
            id: sync.id,
            owner_id: None,
            handle: None,
            model: None,
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            rotation_velocity: Vec3::ZERO,
            throttle: 0.0,
            brake: 0.0,
            steering: 0.0,
            flags: VehicleDataFlags::empty(),
            full: None,
            stamps: SyncStamps::new(tick, now),
            extents: Extents::default(),
            is_local: false,
            is_train: false,
            state: ReconcileState::NotReady,
        };
        vehicle.apply(sync, tick, now);
        vehicle
    }

    /// Vehicle owned by this peer, backed by an existing host object.
    pub fn local(id: EntityId, owner_id: PlayerId, handle: H, model: ModelRef, now: Instant) -> Self {
        Self {
            id,
            owner_id: Some(owner_id),
            handle: Some(handle),
            model: Some(model),
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            rotation_velocity: Vec3::ZERO,
            throttle: 0.0,
            brake: 0.0,
            steering: 0.0,
            flags: VehicleDataFlags::empty(),
            full: None,
            stamps: SyncStamps::new(SimTick::ZERO, now),
            extents: Extents::default(),
            is_local: true,
            is_train: false,
            state: ReconcileState::Correcting,
        }
    }

    /// Take in a newer sync.
    pub fn apply(&mut self, sync: VehicleSync, tick: SimTick, now: Instant) {
        self.owner_id = Some(sync.owner_id);
        self.position = sync.position;
        self.quaternion = sync.quaternion;
        self.velocity = sync.velocity;
        self.rotation_velocity = sync.rotation_velocity;
        self.throttle = sync.throttle;
        self.brake = sync.brake;
        self.steering = sync.steering;
        self.flags = sync.flags;
        let full = sync.full.is_some();
        if let Some(state) = sync.full {
            self.model = Some(state.model);
            self.full = Some(state);
        }
        self.stamps.synced(tick, now, full);
    }

    /// Whether `flag` is set in the last sync.
    pub fn has_flag(&self, flag: VehicleDataFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// A ped known to the session.
#[derive(Debug, Clone)]
pub struct SyncedPed<H> {
    /// Network id. Equal to the owner id for a player's own ped.
    pub id: EntityId,
    /// Owning player, once known.
    pub owner_id: Option<PlayerId>,
    /// Host object, once created.
    pub handle: Option<H>,
    /// Model, known after the first full sync.
    pub model: Option<ModelRef>,
    /// Authoritative position.
    pub position: Vec3,
    /// Euler rotation in degrees.
    pub rotation: Vec3,
    /// Authoritative velocity.
    pub velocity: Vec3,
    /// Heading in degrees.
    pub heading: f32,
    /// Health points.
    pub health: i32,
    /// Movement speed class.
    pub speed: u8,
    /// Discrete state.
    pub flags: PedDataFlags,
    /// Latest full-state block.
    pub full: Option<PedFullState>,
    /// Tick bookkeeping.
    pub stamps: SyncStamps,
    /// Owned by this peer.
    pub is_local: bool,
    /// Outcome of the last reconcile pass.
    pub state: ReconcileState,
}

impl<H> SyncedPed<H> {
    /// Remote ped seeded from its first sync.
    pub fn from_sync(sync: PedSync, tick: SimTick, now: Instant) -> Self {
        let mut ped = Self {
            id: sync.id,
            owner_id: None,
            handle: None,
            model: None,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            heading: 0.0,
            health: 0,
            speed: 0,
            flags: PedDataFlags::empty(),
            full: None,
            stamps: SyncStamps::new(tick, now),
            is_local: false,
            state: ReconcileState::NotReady,
        };
        ped.apply(sync, tick, now);
        ped
    }

    /// Ped owned by this peer, backed by an existing host object.
    pub fn local(id: EntityId, owner_id: PlayerId, handle: H, model: ModelRef, now: Instant) -> Self {
        Self {
            id,
            owner_id: Some(owner_id),
            handle: Some(handle),
            model: Some(model),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            heading: 0.0,
            health: 0,
            speed: 0,
            flags: PedDataFlags::empty(),
            full: None,
            stamps: SyncStamps::new(SimTick::ZERO, now),
            is_local: true,
            state: ReconcileState::Correcting,
        }
    }

    /// Take in a newer sync.
    pub fn apply(&mut self, sync: PedSync, tick: SimTick, now: Instant) {
        self.owner_id = Some(sync.owner_id);
        self.position = sync.position;
        self.rotation = sync.rotation;
        self.velocity = sync.velocity;
        self.heading = sync.heading;
        self.health = sync.health;
        self.speed = sync.speed;
        self.flags = sync.flags;
        let full = sync.full.is_some();
        if let Some(state) = sync.full {
            self.model = Some(state.model);
            self.full = Some(state);
        }
        self.stamps.synced(tick, now, full);
    }

    /// A player's own ped.
    pub fn is_player(&self) -> bool {
        self.id != 0 && self.owner_id == Some(self.id)
    }

    /// Whether `flag` is set in the last sync.
    pub fn has_flag(&self, flag: PedDataFlags) -> bool {
        self.flags.contains(flag)
    }
}
