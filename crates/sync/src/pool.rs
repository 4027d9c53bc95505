//! Registry of synchronized entities.
//!
//! Each collection has its own lock, held only to look up, insert, remove or
//! take a snapshot. Records are individually locked so the network task can apply a
//! sync while the simulation thread reconciles another entity.

use crate::entity::{SyncedPed, SyncedVehicle};
use coopsync_core::{EntityId, PlayerId, SimTick};
use coopsync_net::packets::{PedSync, VehicleSync};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, trace};

/// Shared, individually locked record.
pub type Shared<T> = Arc<Mutex<T>>;

/// Lock a record, recovering from a poisoned lock.
pub fn lock<T>(record: &Mutex<T>) -> MutexGuard<'_, T> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Vehicles and peds of one session.
pub struct EntityPool<H> {
    vehicles: Mutex<HashMap<EntityId, Shared<SyncedVehicle<H>>>>,
    peds: Mutex<HashMap<EntityId, Shared<SyncedPed<H>>>>,
}

impl<H: Copy> EntityPool<H> {
    /// Empty pool.
    pub fn new() -> Self {
        Self {
            vehicles: Mutex::new(HashMap::new()),
            peds: Mutex::new(HashMap::new()),
        }
    }

    /// Record a vehicle sync. Returns `true` when the vehicle was new.
    ///
    /// Syncs for vehicles this peer owns are ignored.
    pub fn apply_vehicle_sync(&self, sync: VehicleSync, tick: SimTick, now: Instant) -> bool {
        let mut vehicles = lock(&self.vehicles);
        let record = match vehicles.entry(sync.id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let id = sync.id;
                let vehicle = SyncedVehicle::from_sync(sync, tick, now);
                entry.insert(Arc::new(Mutex::new(vehicle)));
                debug!(id, "Tracking new vehicle");
                return true;
            }
        };
        drop(vehicles);

        let mut vehicle = lock(&record);
        if vehicle.is_local {
            trace!(id = sync.id, "Ignoring sync for local vehicle");
        } else {
            vehicle.apply(sync, tick, now);
        }
        false
    }

    /// Record a ped sync. Returns `true` when the ped was new.
    pub fn apply_ped_sync(&self, sync: PedSync, tick: SimTick, now: Instant) -> bool {
        let mut peds = lock(&self.peds);
        let record = match peds.entry(sync.id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let id = sync.id;
                entry.insert(Arc::new(Mutex::new(SyncedPed::from_sync(sync, tick, now))));
                debug!(id, "Tracking new ped");
                return true;
            }
        };
        drop(peds);

        let mut ped = lock(&record);
        if ped.is_local {
            trace!(id = sync.id, "Ignoring sync for local ped");
        } else {
            ped.apply(sync, tick, now);
        }
        false
    }

    /// Track a vehicle, replacing any record with the same id.
    pub fn insert_vehicle(&self, vehicle: SyncedVehicle<H>) -> Shared<SyncedVehicle<H>> {
        let record = Arc::new(Mutex::new(vehicle));
        let id = lock(&record).id;
        lock(&self.vehicles).insert(id, Arc::clone(&record));
        record
    }

    /// Track a ped, replacing any record with the same id.
    pub fn insert_ped(&self, ped: SyncedPed<H>) -> Shared<SyncedPed<H>> {
        let record = Arc::new(Mutex::new(ped));
        let id = lock(&record).id;
        lock(&self.peds).insert(id, Arc::clone(&record));
        record
    }

    /// Vehicle record by id.
    pub fn vehicle(&self, id: EntityId) -> Option<Shared<SyncedVehicle<H>>> {
        lock(&self.vehicles).get(&id).cloned()
    }

    /// Ped record by id.
    pub fn ped(&self, id: EntityId) -> Option<Shared<SyncedPed<H>>> {
        lock(&self.peds).get(&id).cloned()
    }

    /// Snapshot of all vehicle records.
    pub fn vehicles(&self) -> Vec<Shared<SyncedVehicle<H>>> {
        lock(&self.vehicles).values().cloned().collect()
    }

    /// Snapshot of all ped records.
    pub fn peds(&self) -> Vec<Shared<SyncedPed<H>>> {
        lock(&self.peds).values().cloned().collect()
    }

    /// Stop tracking a vehicle, returning its host handle if it had one.
    pub fn remove_vehicle(&self, id: EntityId) -> Option<H> {
        let record = lock(&self.vehicles).remove(&id)?;
        let handle = lock(&record).handle;
        handle
    }

    /// Stop tracking a ped, returning its host handle if it had one.
    pub fn remove_ped(&self, id: EntityId) -> Option<H> {
        let record = lock(&self.peds).remove(&id)?;
        let handle = lock(&record).handle;
        handle
    }

    /// Stop tracking every remote entity owned by `owner`.
    ///
    /// Returns the host handles that should be deleted.
    pub fn remove_owned_by(&self, owner: PlayerId) -> Vec<H> {
        let mut handles = Vec::new();
        lock(&self.vehicles).retain(|_, record| {
            let vehicle = lock(record);
            let owned = !vehicle.is_local && vehicle.owner_id == Some(owner);
            if owned {
                handles.extend(vehicle.handle);
            }
            !owned
        });
        lock(&self.peds).retain(|_, record| {
            let ped = lock(record);
            let owned = !ped.is_local && ped.owner_id == Some(owner);
            if owned {
                handles.extend(ped.handle);
            }
            !owned
        });
        debug!(owner, removed = handles.len(), "Removed entities of player");
        handles
    }

    /// Stop tracking every remote entity, returning their host handles.
    pub fn clear_remote(&self) -> Vec<H> {
        let mut handles = Vec::new();
        lock(&self.vehicles).retain(|_, record| {
            let vehicle = lock(record);
            if !vehicle.is_local {
                handles.extend(vehicle.handle);
            }
            vehicle.is_local
        });
        lock(&self.peds).retain(|_, record| {
            let ped = lock(record);
            if !ped.is_local {
                handles.extend(ped.handle);
            }
            ped.is_local
        });
        handles
    }

    /// Number of tracked vehicles.
    pub fn vehicle_count(&self) -> usize {
        lock(&self.vehicles).len()
    }

    /// Number of tracked peds.
    pub fn ped_count(&self) -> usize {
        lock(&self.peds).len()
    }
}

impl<H: Copy> Default for EntityPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coopsync_core::{ModelRef, Vec3};
    use coopsync_net::packets::VehicleFullState;

    fn vehicle_sync(id: EntityId, owner: PlayerId, x: f32) -> VehicleSync {
        VehicleSync {
            id,
            owner_id: owner,
            position: Vec3::new(x, 0.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn syncs_create_then_update() {
        let pool = EntityPool::<u32>::new();
        let now = Instant::now();
        assert!(pool.apply_vehicle_sync(vehicle_sync(1, 7, 1.0), SimTick(1), now));
        assert!(!pool.apply_vehicle_sync(vehicle_sync(1, 7, 2.0), SimTick(2), now));
        assert_eq!(pool.vehicle_count(), 1);

        let record = pool.vehicle(1).unwrap();
        let vehicle = lock(&record);
        assert_eq!(vehicle.position.x, 2.0);
        assert_eq!(vehicle.stamps.last_synced, SimTick(2));
    }

    #[test]
    fn concurrent_first_syncs_all_land() {
        use std::sync::Barrier;

        let pool = Arc::new(EntityPool::<u32>::new());
        let barrier = Arc::new(Barrier::new(8));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut sync = vehicle_sync(9, 2, i as f32);
                    // Only one sender carries the model.
                    if i == 5 {
                        sync.full = Some(VehicleFullState {
                            model: ModelRef(77),
                            ..Default::default()
                        });
                    }
                    barrier.wait();
                    pool.apply_vehicle_sync(sync, SimTick(1), now)
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|handle| handle.join().expect("sync thread panicked"))
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(pool.vehicle_count(), 1);
        let record = pool.vehicle(9).unwrap();
        assert_eq!(lock(&record).model, Some(ModelRef(77)));
    }

    #[test]
    fn local_entities_ignore_remote_syncs() {
        let pool = EntityPool::<u32>::new();
        let now = Instant::now();
        pool.insert_vehicle(SyncedVehicle::local(3, 1, 40, ModelRef(5), now));
        pool.apply_vehicle_sync(vehicle_sync(3, 9, 50.0), SimTick(1), now);

        let record = pool.vehicle(3).unwrap();
        let vehicle = lock(&record);
        assert!(vehicle.is_local);
        assert_eq!(vehicle.owner_id, Some(1));
        assert_eq!(vehicle.position, Vec3::ZERO);
    }

    #[test]
    fn removing_a_player_drops_their_entities() {
        let pool = EntityPool::<u32>::new();
        let now = Instant::now();
        pool.apply_vehicle_sync(vehicle_sync(1, 7, 0.0), SimTick(1), now);
        pool.apply_vehicle_sync(vehicle_sync(2, 8, 0.0), SimTick(1), now);
        pool.apply_ped_sync(
            PedSync {
                id: 7,
                owner_id: 7,
                ..Default::default()
            },
            SimTick(1),
            now,
        );
        lock(&pool.vehicle(1).unwrap()).handle = Some(100);
        lock(&pool.ped(7).unwrap()).handle = Some(101);

        let mut handles = pool.remove_owned_by(7);
        handles.sort();
        assert_eq!(handles, vec![100, 101]);
        assert!(pool.vehicle(1).is_none());
        assert!(pool.vehicle(2).is_some());
        assert_eq!(pool.ped_count(), 0);
    }

    #[test]
    fn clear_remote_keeps_local_entities() {
        let pool = EntityPool::<u32>::new();
        let now = Instant::now();
        pool.insert_ped(SyncedPed::local(1, 1, 10, ModelRef(2), now));
        pool.apply_ped_sync(
            PedSync {
                id: 2,
                owner_id: 2,
                ..Default::default()
            },
            SimTick(1),
            now,
        );
        lock(&pool.ped(2).unwrap()).handle = Some(11);
        assert_eq!(pool.clear_remote(), vec![11]);
        assert_eq!(pool.ped_count(), 1);
        assert_eq!(pool.remove_ped(1), Some(10));
    }
}
