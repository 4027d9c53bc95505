//! Per-tick reconciliation of remote entities against the host simulation.
//!
//! Every remote entity goes through the same cycle once per tick:
//!
//! 1. **NotReady**: owner or model unknown; nothing happens.
//! 2. **Materializing**: the host object is missing or has the wrong model;
//!    it is (re)created, and on failure retried next tick.
//! 3. **Correcting**: the authoritative position is dead-reckoned forward
//!    and the host object is nudged, pushed or snapped towards it. Discrete
//!    state is written only where it differs from what the host reports.
//!
//! Local entities are never written; [`capture_vehicle`] and
//! [`capture_ped`] read them to build outgoing syncs.

use crate::entity::{Extents, ReconcileState, SyncedPed, SyncedVehicle};
use crate::host::{FieldKind, FieldValue, HostWorld, Toggle};
use crate::pool::{lock, EntityPool};
use coopsync_core::{EulerRot, PedDataFlags, Quat, SimTick, Vec3, VehicleDataFlags};
use coopsync_net::packets::{PedFullState, PedSync, VehicleFullState, VehicleSync};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Tuning of the correction loop.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// At or beyond this squared distance the object is teleported.
    pub snap_distance_sq: f32,
    /// At or below this squared distance position is left alone.
    pub converge_distance_sq: f32,
    /// Beyond this squared distance velocity is set instead of pushing.
    pub hard_correction_distance_sq: f32,
    /// Share of the velocity difference added to the correction.
    pub velocity_blend: f32,
    /// Largest per-axis rotation error, in degrees, that is left alone.
    pub rotation_epsilon_deg: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            snap_distance_sq: 100.0,
            converge_distance_sq: 0.0009,
            hard_correction_distance_sq: 400.0,
            velocity_blend: 0.5,
            rotation_epsilon_deg: 0.05,
        }
    }
}

/// Timing of the tick being reconciled.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    /// Current simulation tick.
    pub tick: SimTick,
    /// Wall-clock time of the tick.
    pub now: Instant,
    /// One-way network latency estimate.
    pub latency: Duration,
}

/// How the position of an object was corrected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Teleported to the prediction.
    Snapped,
    /// Close enough; position untouched.
    Converged,
    /// Pushed with this force.
    Force(Vec3),
    /// Velocity overridden with this value.
    Velocity(Vec3),
}

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entities skipped for missing owner, model or model bounds.
    pub not_ready: usize,
    /// Entities whose host object could not be created this tick.
    pub materializing: usize,
    /// Entities corrected.
    pub corrected: usize,
    /// Host objects created this tick.
    pub created: usize,
}

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped - 360.0
    } else if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Per-axis rotation from `current` to `target`, in degrees.
pub fn rotation_error_degrees(target: Quat, current: Quat) -> Vec3 {
    let (ty, tx, tz) = target.to_euler(EulerRot::YXZ);
    let (cy, cx, cz) = current.to_euler(EulerRot::YXZ);
    Vec3::new(
        wrap_degrees((tx - cx).to_degrees()),
        wrap_degrees((ty - cy).to_degrees()),
        wrap_degrees((tz - cz).to_degrees()),
    )
}

/// Dead-reckoned position after `elapsed`.
pub fn predict(position: Vec3, velocity: Vec3, elapsed: Duration) -> Vec3 {
    position + velocity * elapsed.as_secs_f32()
}

/// Reference points derived from model bounds.
pub fn extents_from_dimensions(max: Vec3) -> Extents {
    Extents {
        front: Vec3::new(0.0, max.y, 0.0),
        top: Vec3::new(0.0, 0.0, max.z),
    }
}

/// Drives remote entities towards their authoritative state.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    /// Reconciler with the given tuning.
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Current tuning.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile every remote entity in `pool` once.
    pub fn tick<W: HostWorld>(
        &self,
        pool: &EntityPool<W::Handle>,
        host: &mut W,
        clock: &TickClock,
    ) -> TickReport {
        let mut report = TickReport::default();
        for record in pool.vehicles() {
            let mut vehicle = lock(&record);
            if vehicle.is_local {
                continue;
            }
            self.update_vehicle(&mut vehicle, host, clock, &mut report);
        }
        for record in pool.peds() {
            let mut ped = lock(&record);
            if ped.is_local {
                continue;
            }
            self.update_ped(&mut ped, host, clock, &mut report);
        }
        report
    }

    /// Decide and apply the positional correction for one object.
    pub fn correct_position<W: HostWorld>(
        &self,
        host: &mut W,
        handle: W::Handle,
        predicted: Vec3,
        velocity: Vec3,
        is_train: bool,
    ) -> Correction {
        let current = host.position(handle);
        let distance_sq = current.distance_squared(predicted);
        if distance_sq >= self.config.snap_distance_sq {
            host.set_position(handle, predicted);
            host.set_velocity(handle, velocity);
            return Correction::Snapped;
        }
        if distance_sq <= self.config.converge_distance_sq {
            return Correction::Converged;
        }

        let mut cali = predicted - current;
        if !is_train {
            cali += self.config.velocity_blend * (velocity - host.velocity(handle));
        }
        if is_train || distance_sq > self.config.hard_correction_distance_sq {
            let target = velocity + cali;
            host.set_velocity(handle, target);
            Correction::Velocity(target)
        } else {
            host.apply_force(handle, cali, Vec3::ZERO);
            Correction::Force(cali)
        }
    }

    /// Steer an object's orientation by pushing at its front and top.
    ///
    /// Returns `false` when the error was within tolerance.
    pub fn correct_rotation<W: HostWorld>(
        &self,
        host: &mut W,
        handle: W::Handle,
        target: Quat,
        extents: Extents,
    ) -> bool {
        let current = host.quaternion(handle);
        let error = rotation_error_degrees(target, current);
        if error.abs().max_element() <= self.config.rotation_epsilon_deg {
            return false;
        }
        host.apply_force(handle, target * extents.top - current * extents.top, extents.top);
        host.apply_force(
            handle,
            target * extents.front - current * extents.front,
            extents.front,
        );
        true
    }

    fn update_vehicle<W: HostWorld>(
        &self,
        vehicle: &mut SyncedVehicle<W::Handle>,
        host: &mut W,
        clock: &TickClock,
        report: &mut TickReport,
    ) {
        let Some(model) = vehicle.model.filter(|_| vehicle.owner_id.is_some()) else {
            vehicle.state = ReconcileState::NotReady;
            report.not_ready += 1;
            return;
        };

        let handle = match vehicle.handle {
            Some(handle) if host.exists(handle) && host.model_of(handle) == Some(model) => handle,
            stale => {
                if let Some(old) = stale {
                    host.delete(old);
                    vehicle.handle = None;
                }
                // Rotation forces are placed at the extents, so they must be known.
                let Some(dimensions) = host.model_dimensions(model) else {
                    trace!(id = vehicle.id, ?model, "Model bounds unknown");
                    vehicle.state = ReconcileState::NotReady;
                    report.not_ready += 1;
                    return;
                };
                match host.create_vehicle(model, vehicle.position, vehicle.quaternion) {
                    Ok(handle) => {
                        vehicle.handle = Some(handle);
                        vehicle.extents = extents_from_dimensions(dimensions.max);
                        vehicle.is_train = host.is_train(model);
                        // Fresh object: write all state again.
                        vehicle.stamps.last_updated = SimTick::ZERO;
                        report.created += 1;
                        debug!(id = vehicle.id, ?model, "Created vehicle");
                        handle
                    }
                    Err(err) => {
                        trace!(id = vehicle.id, ?model, "Vehicle not created yet: {err}");
                        vehicle.state = ReconcileState::Materializing;
                        report.materializing += 1;
                        return;
                    }
                }
            }
        };
        vehicle.state = ReconcileState::Correcting;
        report.corrected += 1;

        let elapsed = clock.now.saturating_duration_since(vehicle.stamps.last_synced_at) + clock.latency;
        let predicted = predict(vehicle.position, vehicle.velocity, elapsed);
        let correction =
            self.correct_position(host, handle, predicted, vehicle.velocity, vehicle.is_train);
        if correction == Correction::Snapped {
            host.set_quaternion(handle, vehicle.quaternion);
        } else {
            self.correct_rotation(host, handle, vehicle.quaternion, vehicle.extents);
        }

        if !vehicle.stamps.needs_update() {
            return;
        }

        set_field_if_changed(host, handle, FieldValue::Steering(vehicle.steering));
        set_field_if_changed(host, handle, FieldValue::Throttle(vehicle.throttle));
        set_field_if_changed(host, handle, FieldValue::Brake(vehicle.brake));

        let flags = vehicle.flags;
        for (toggle, flag) in [
            (Toggle::Dead, VehicleDataFlags::IS_DEAD),
            (Toggle::OnFire, VehicleDataFlags::IS_ON_FIRE),
            (Toggle::EngineRunning, VehicleDataFlags::IS_ENGINE_RUNNING),
            (Toggle::LightsOn, VehicleDataFlags::ARE_LIGHTS_ON),
            (Toggle::HighBeamsOn, VehicleDataFlags::ARE_HIGH_BEAMS_ON),
            (Toggle::BrakeLightsOn, VehicleDataFlags::ARE_BRAKE_LIGHTS_ON),
            (Toggle::SirenActive, VehicleDataFlags::IS_SIREN_ACTIVE),
            (Toggle::HornActive, VehicleDataFlags::IS_HORN_ACTIVE),
            (Toggle::RocketBoostActive, VehicleDataFlags::IS_ROCKET_BOOST_ACTIVE),
            (Toggle::ParachuteActive, VehicleDataFlags::IS_PARACHUTE_ACTIVE),
        ] {
            set_toggle_if_changed(host, handle, toggle, flags.contains(flag));
        }

        if vehicle.stamps.full_state_pending() {
            if let Some(full) = &vehicle.full {
                apply_vehicle_full_state(host, handle, full, flags);
            }
        }

        vehicle.stamps.last_updated = clock.tick;
    }

    fn update_ped<W: HostWorld>(
        &self,
        ped: &mut SyncedPed<W::Handle>,
        host: &mut W,
        clock: &TickClock,
        report: &mut TickReport,
    ) {
        let Some(model) = ped.model.filter(|_| ped.owner_id.is_some()) else {
            ped.state = ReconcileState::NotReady;
            report.not_ready += 1;
            return;
        };

        let handle = match ped.handle {
            Some(handle) if host.exists(handle) && host.model_of(handle) == Some(model) => handle,
            stale => {
                if let Some(old) = stale {
                    host.delete(old);
                    ped.handle = None;
                }
                match host.create_ped(model, ped.position, ped.heading) {
                    Ok(handle) => {
                        ped.handle = Some(handle);
                        ped.stamps.last_updated = SimTick::ZERO;
                        report.created += 1;
                        debug!(id = ped.id, ?model, "Created ped");
                        handle
                    }
                    Err(err) => {
                        trace!(id = ped.id, ?model, "Ped not created yet: {err}");
                        ped.state = ReconcileState::Materializing;
                        report.materializing += 1;
                        return;
                    }
                }
            }
        };
        ped.state = ReconcileState::Correcting;
        report.corrected += 1;

        let elapsed = clock.now.saturating_duration_since(ped.stamps.last_synced_at) + clock.latency;
        let predicted = predict(ped.position, ped.velocity, elapsed);
        self.correct_ped_position(host, handle, predicted, ped.velocity);

        if !ped.stamps.needs_update() {
            return;
        }

        set_field_if_changed(host, handle, FieldValue::Heading(ped.heading));
        set_field_if_changed(host, handle, FieldValue::Health(ped.health));
        let flags = ped.flags;
        for (toggle, flag) in [
            (Toggle::OnFire, PedDataFlags::IS_ON_FIRE),
            (Toggle::Ragdoll, PedDataFlags::IS_RAGDOLL),
            (Toggle::Invincible, PedDataFlags::IS_INVINCIBLE),
        ] {
            set_toggle_if_changed(host, handle, toggle, flags.contains(flag));
        }

        if ped.stamps.full_state_pending() {
            if let Some(full) = &ped.full {
                set_field_if_changed(host, handle, FieldValue::Clothes(full.clothes.clone()));
                set_field_if_changed(host, handle, FieldValue::Weapon(full.current_weapon));
            }
        }

        ped.stamps.last_updated = clock.tick;
    }

    /// Peds are moved by velocity only; forces make them stumble.
    fn correct_ped_position<W: HostWorld>(
        &self,
        host: &mut W,
        handle: W::Handle,
        predicted: Vec3,
        velocity: Vec3,
    ) -> Correction {
        let current = host.position(handle);
        let distance_sq = current.distance_squared(predicted);
        if distance_sq >= self.config.snap_distance_sq {
            host.set_position(handle, predicted);
            host.set_velocity(handle, velocity);
            Correction::Snapped
        } else if distance_sq <= self.config.converge_distance_sq {
            Correction::Converged
        } else {
            let target = velocity + (predicted - current);
            host.set_velocity(handle, target);
            Correction::Velocity(target)
        }
    }
}

fn apply_vehicle_full_state<W: HostWorld>(
    host: &mut W,
    handle: W::Handle,
    full: &VehicleFullState,
    flags: VehicleDataFlags,
) {
    set_field_if_changed(host, handle, FieldValue::Colors(full.colors));
    set_field_if_changed(host, handle, FieldValue::Livery(full.livery));
    set_field_if_changed(host, handle, FieldValue::EngineHealth(full.engine_health));
    set_field_if_changed(host, handle, FieldValue::LicensePlate(full.license_plate.clone()));
    set_field_if_changed(host, handle, FieldValue::LockStatus(full.lock_status));
    set_field_if_changed(host, handle, FieldValue::Damage(full.damage));
    if flags.contains(VehicleDataFlags::IS_AIRCRAFT) {
        set_field_if_changed(host, handle, FieldValue::LandingGear(full.landing_gear));
    } else {
        set_field_if_changed(host, handle, FieldValue::RoofState(full.roof_state));
    }
}

/// Write `on` unless the host already reports it.
fn set_toggle_if_changed<W: HostWorld>(host: &mut W, handle: W::Handle, toggle: Toggle, on: bool) {
    if host.toggle(handle, toggle) != on {
        host.set_toggle(handle, toggle, on);
    }
}

/// Write `value` unless the host already holds it or lacks the field.
fn set_field_if_changed<W: HostWorld>(host: &mut W, handle: W::Handle, value: FieldValue) {
    match host.field(handle, value.kind()) {
        Some(current) if current == value => {}
        None => trace!(field = ?value.kind(), "Host object has no such field"),
        Some(_) => host.set_field(handle, value),
    }
}

/// Build an outgoing sync for a local vehicle by reading the host.
///
/// Returns `None` when the vehicle has no live host object. `full` adds the
/// rarely changing state block.
pub fn capture_vehicle<W: HostWorld>(
    host: &W,
    vehicle: &SyncedVehicle<W::Handle>,
    full: bool,
) -> Option<VehicleSync> {
    let handle = vehicle.handle.filter(|h| host.exists(*h))?;
    let owner_id = vehicle.owner_id?;

    let mut flags = VehicleDataFlags::empty();
    for (toggle, flag) in [
        (Toggle::Dead, VehicleDataFlags::IS_DEAD),
        (Toggle::OnFire, VehicleDataFlags::IS_ON_FIRE),
        (Toggle::EngineRunning, VehicleDataFlags::IS_ENGINE_RUNNING),
        (Toggle::LightsOn, VehicleDataFlags::ARE_LIGHTS_ON),
        (Toggle::HighBeamsOn, VehicleDataFlags::ARE_HIGH_BEAMS_ON),
        (Toggle::BrakeLightsOn, VehicleDataFlags::ARE_BRAKE_LIGHTS_ON),
        (Toggle::SirenActive, VehicleDataFlags::IS_SIREN_ACTIVE),
        (Toggle::HornActive, VehicleDataFlags::IS_HORN_ACTIVE),
        (Toggle::RocketBoostActive, VehicleDataFlags::IS_ROCKET_BOOST_ACTIVE),
        (Toggle::ParachuteActive, VehicleDataFlags::IS_PARACHUTE_ACTIVE),
    ] {
        flags.set(flag, host.toggle(handle, toggle));
    }

    let f32_field = |kind| match host.field(handle, kind) {
        Some(FieldValue::Steering(v) | FieldValue::Throttle(v) | FieldValue::Brake(v)) => v,
        _ => 0.0,
    };

    let full = full.then(|| {
        let model = host.model_of(handle).or(vehicle.model).unwrap_or_default();
        let mut state = VehicleFullState {
            model,
            ..Default::default()
        };
        for kind in [
            FieldKind::Colors,
            FieldKind::Livery,
            FieldKind::EngineHealth,
            FieldKind::LicensePlate,
            FieldKind::LockStatus,
            FieldKind::RoofState,
            FieldKind::LandingGear,
            FieldKind::Damage,
        ] {
            match host.field(handle, kind) {
                Some(FieldValue::Colors(v)) => state.colors = v,
                Some(FieldValue::Livery(v)) => state.livery = v,
                Some(FieldValue::EngineHealth(v)) => state.engine_health = v,
                Some(FieldValue::LicensePlate(v)) => state.license_plate = v,
                Some(FieldValue::LockStatus(v)) => state.lock_status = v,
                Some(FieldValue::RoofState(v)) => state.roof_state = v,
                Some(FieldValue::LandingGear(v)) => state.landing_gear = v,
                Some(FieldValue::Damage(v)) => state.damage = v,
                _ => {}
            }
        }
        state
    });

    Some(VehicleSync {
        id: vehicle.id,
        owner_id,
        flags,
        position: host.position(handle),
        quaternion: host.quaternion(handle),
        velocity: host.velocity(handle),
        rotation_velocity: Vec3::ZERO,
        throttle: f32_field(FieldKind::Throttle),
        brake: f32_field(FieldKind::Brake),
        steering: f32_field(FieldKind::Steering),
        full,
    })
}

/// Build an outgoing sync for a local ped by reading the host.
pub fn capture_ped<W: HostWorld>(
    host: &W,
    ped: &SyncedPed<W::Handle>,
    full: bool,
) -> Option<PedSync> {
    let handle = ped.handle.filter(|h| host.exists(*h))?;
    let owner_id = ped.owner_id?;

    let mut flags = PedDataFlags::empty();
    for (toggle, flag) in [
        (Toggle::OnFire, PedDataFlags::IS_ON_FIRE),
        (Toggle::Ragdoll, PedDataFlags::IS_RAGDOLL),
        (Toggle::Invincible, PedDataFlags::IS_INVINCIBLE),
    ] {
        flags.set(flag, host.toggle(handle, toggle));
    }

    let health = match host.field(handle, FieldKind::Health) {
        Some(FieldValue::Health(v)) => v,
        _ => 0,
    };
    let heading = match host.field(handle, FieldKind::Heading) {
        Some(FieldValue::Heading(v)) => v,
        _ => 0.0,
    };
    let quaternion = host.quaternion(handle);
    let (y, x, z) = quaternion.to_euler(EulerRot::YXZ);
    let velocity = host.velocity(handle);

    let full = full.then(|| PedFullState {
        model: host.model_of(handle).or(ped.model).unwrap_or_default(),
        clothes: match host.field(handle, FieldKind::Clothes) {
            Some(FieldValue::Clothes(v)) => v,
            _ => Vec::new(),
        },
        current_weapon: match host.field(handle, FieldKind::Weapon) {
            Some(FieldValue::Weapon(v)) => v,
            _ => 0,
        },
    });

    Some(PedSync {
        id: ped.id,
        owner_id,
        flags,
        health,
        position: host.position(handle),
        rotation: Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees()),
        velocity,
        speed: speed_class(velocity.length()),
        heading,
        full,
    })
}

/// Movement class from ground speed in m/s: still, walking, running, sprinting.
fn speed_class(speed: f32) -> u8 {
    match speed {
        s if s < 0.5 => 0,
        s if s < 2.5 => 1,
        s if s < 5.5 => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use coopsync_core::ModelRef;
    use proptest::prelude::*;

    fn clock(tick: u64, now: Instant) -> TickClock {
        TickClock {
            tick: SimTick(tick),
            now,
            latency: Duration::ZERO,
        }
    }

    fn full_vehicle(id: i32, model: i32) -> VehicleSync {
        VehicleSync {
            id,
            owner_id: 2,
            flags: VehicleDataFlags::IS_ENGINE_RUNNING | VehicleDataFlags::ARE_LIGHTS_ON,
            position: Vec3::new(10.0, 0.0, 0.0),
            quaternion: Quat::IDENTITY,
            full: Some(VehicleFullState {
                model: ModelRef(model),
                colors: [3, 4],
                livery: 1,
                engine_health: 900.0,
                license_plate: "COOP 42".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn wraps_into_half_open_range() {
        assert_eq!(wrap_degrees(190.0), -170.0);
        assert_eq!(wrap_degrees(-190.0), 170.0);
        assert_eq!(wrap_degrees(180.0), 180.0);
        assert_eq!(wrap_degrees(-180.0), 180.0);
        assert_eq!(wrap_degrees(45.0), 45.0);
        assert_eq!(wrap_degrees(720.0 + 10.0), 10.0);
    }

    proptest! {
        #[test]
        fn wrapped_angles_stay_in_range(angle in -10_000.0f32..10_000.0) {
            let wrapped = wrap_degrees(angle);
            prop_assert!(wrapped > -180.0 && wrapped <= 180.0);
        }
    }

    #[test]
    fn thresholds_are_inclusive() {
        let reconciler = Reconciler::default();
        let mut host = MemoryWorld::new();
        let handle = host.spawn(ModelRef(1), Vec3::ZERO, Quat::IDENTITY);

        // Exactly at the snap distance (10 m).
        let correction =
            reconciler.correct_position(&mut host, handle, Vec3::new(10.0, 0.0, 0.0), Vec3::X, false);
        assert_eq!(correction, Correction::Snapped);
        assert_eq!(host.position(handle), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(host.velocity(handle), Vec3::X);

        // Exactly at the converge distance.
        let reconciler = Reconciler::new(ReconcileConfig {
            converge_distance_sq: 0.25,
            ..Default::default()
        });
        host.set_position(handle, Vec3::ZERO);
        let correction =
            reconciler.correct_position(&mut host, handle, Vec3::new(0.5, 0.0, 0.0), Vec3::ZERO, false);
        assert_eq!(correction, Correction::Converged);
        assert!(host.forces.is_empty());

        // Default converge distance: 3 cm.
        let reconciler = Reconciler::default();
        host.set_position(handle, Vec3::ZERO);
        let correction =
            reconciler.correct_position(&mut host, handle, Vec3::new(0.03, 0.0, 0.0), Vec3::ZERO, false);
        assert_eq!(correction, Correction::Converged);
        assert!(host.forces.is_empty());
    }

    #[test]
    fn vehicles_wait_for_model_bounds() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();
        host.unmeasured.insert(ModelRef(60));

        pool.apply_vehicle_sync(full_vehicle(4, 60), SimTick(1), now);
        let report = reconciler.tick(&pool, &mut host, &clock(1, now));
        assert_eq!(report.not_ready, 1);
        assert_eq!(report.created, 0);
        assert_eq!(host.creates, 0);
        assert!(host.forces.is_empty());
        let record = pool.vehicle(4).unwrap();
        assert_eq!(lock(&record).state, ReconcileState::NotReady);

        host.unmeasured.clear();
        let report = reconciler.tick(&pool, &mut host, &clock(2, now));
        assert_eq!(report.created, 1);
        assert_eq!(lock(&record).state, ReconcileState::Correcting);
        assert_eq!(lock(&record).extents.front, Vec3::new(0.0, 2.5, 0.0));
    }

    #[test]
    fn moderate_errors_push_and_blend_velocity() {
        let reconciler = Reconciler::default();
        let mut host = MemoryWorld::new();
        let handle = host.spawn(ModelRef(1), Vec3::ZERO, Quat::IDENTITY);
        host.set_velocity(handle, Vec3::new(1.0, 0.0, 0.0));

        let correction = reconciler.correct_position(
            &mut host,
            handle,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
            false,
        );
        // 2 + 0.5 * (3 - 1)
        assert_eq!(correction, Correction::Force(Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(host.forces, vec![(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO)]);
    }

    #[test]
    fn trains_get_velocity_without_blend() {
        let reconciler = Reconciler::default();
        let mut host = MemoryWorld::new();
        let handle = host.spawn(ModelRef(999), Vec3::ZERO, Quat::IDENTITY);
        host.set_velocity(handle, Vec3::new(1.0, 0.0, 0.0));

        let correction = reconciler.correct_position(
            &mut host,
            handle,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(3.0, 0.0, 0.0),
            true,
        );
        assert_eq!(correction, Correction::Velocity(Vec3::new(5.0, 0.0, 0.0)));
        assert!(host.forces.is_empty());
    }

    #[test]
    fn hard_corrections_set_velocity() {
        let reconciler = Reconciler::new(ReconcileConfig {
            snap_distance_sq: 1000.0,
            ..Default::default()
        });
        let mut host = MemoryWorld::new();
        let handle = host.spawn(ModelRef(1), Vec3::ZERO, Quat::IDENTITY);
        let correction =
            reconciler.correct_position(&mut host, handle, Vec3::new(21.0, 0.0, 0.0), Vec3::ZERO, false);
        assert_eq!(correction, Correction::Velocity(Vec3::new(21.0, 0.0, 0.0)));
    }

    #[test]
    fn rotation_pushes_front_and_top() {
        let reconciler = Reconciler::default();
        let mut host = MemoryWorld::new();
        let handle = host.spawn(ModelRef(1), Vec3::ZERO, Quat::IDENTITY);
        let extents = extents_from_dimensions(Vec3::new(1.0, 2.5, 1.5));

        assert!(!reconciler.correct_rotation(&mut host, handle, Quat::IDENTITY, extents));
        assert!(host.forces.is_empty());

        let target = Quat::from_rotation_z(30f32.to_radians());
        assert!(reconciler.correct_rotation(&mut host, handle, target, extents));
        assert_eq!(host.forces.len(), 2);
        assert_eq!(host.forces[0].1, extents.top);
        assert_eq!(host.forces[1].1, extents.front);
        let expected_front = target * extents.front - extents.front;
        assert!((host.forces[1].0 - expected_front).length() < 1e-5);
    }

    #[test]
    fn rotation_error_wraps() {
        let target = Quat::from_rotation_y(170f32.to_radians());
        let current = Quat::from_rotation_y(-170f32.to_radians());
        let error = rotation_error_degrees(target, current);
        assert!((error.y + 20.0).abs() < 1e-3, "{error:?}");
    }

    #[test]
    fn vehicle_lifecycle() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();

        // No model yet.
        pool.apply_vehicle_sync(
            VehicleSync {
                id: 1,
                owner_id: 2,
                ..Default::default()
            },
            SimTick(1),
            now,
        );
        let report = reconciler.tick(&pool, &mut host, &clock(1, now));
        assert_eq!(report.not_ready, 1);
        assert_eq!(host.creates, 0);

        // Model known but not loadable yet.
        host.unloaded.insert(ModelRef(50));
        pool.apply_vehicle_sync(full_vehicle(1, 50), SimTick(2), now);
        let report = reconciler.tick(&pool, &mut host, &clock(2, now));
        assert_eq!(report.materializing, 1);
        let record = pool.vehicle(1).unwrap();
        assert_eq!(lock(&record).state, ReconcileState::Materializing);

        // Retried on the next tick once loaded.
        host.unloaded.clear();
        let report = reconciler.tick(&pool, &mut host, &clock(3, now));
        assert_eq!(report.created, 1);
        let handle = lock(&record).handle.unwrap();
        assert!(host.toggle(handle, Toggle::EngineRunning));
        assert!(host.toggle(handle, Toggle::LightsOn));
        assert_eq!(
            host.field(handle, FieldKind::LicensePlate),
            Some(FieldValue::LicensePlate("COOP 42".into()))
        );
        assert_eq!(lock(&record).extents.front, Vec3::new(0.0, 2.5, 0.0));

        // Model changed: old object replaced.
        pool.apply_vehicle_sync(full_vehicle(1, 51), SimTick(4), now);
        reconciler.tick(&pool, &mut host, &clock(4, now));
        let replaced = lock(&record).handle.unwrap();
        assert_ne!(replaced, handle);
        assert!(!host.exists(handle));
        assert_eq!(host.model_of(replaced), Some(ModelRef(51)));

        // Deleted by the host: recreated.
        host.delete(replaced);
        reconciler.tick(&pool, &mut host, &clock(5, now));
        assert!(host.exists(lock(&record).handle.unwrap()));
    }

    #[test]
    fn discrete_state_is_written_once() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();

        pool.apply_vehicle_sync(full_vehicle(1, 50), SimTick(1), now);
        reconciler.tick(&pool, &mut host, &clock(1, now));
        let first = host.writes;
        assert!(first > 0);

        // Same state again: nothing differs, nothing is written.
        pool.apply_vehicle_sync(full_vehicle(1, 50), SimTick(2), now);
        reconciler.tick(&pool, &mut host, &clock(2, now));
        assert_eq!(host.writes, first);
    }

    #[test]
    fn per_tick_fields_wait_for_new_syncs() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();

        // Syncs are stamped with the last reconciled tick.
        pool.apply_vehicle_sync(full_vehicle(1, 50), SimTick(1), now);
        reconciler.tick(&pool, &mut host, &clock(2, now));
        let record = pool.vehicle(1).unwrap();
        let handle = lock(&record).handle.unwrap();

        // Host drifts; without a new sync the reconciler leaves it alone.
        host.set_toggle(handle, Toggle::LightsOn, false);
        let writes = host.writes;
        reconciler.tick(&pool, &mut host, &clock(3, now));
        assert_eq!(host.writes, writes);
        assert!(!host.toggle(handle, Toggle::LightsOn));

        // A partial sync restores per-tick state but not full state.
        host.set_field(handle, FieldValue::Livery(7));
        let mut partial = full_vehicle(1, 50);
        partial.full = None;
        pool.apply_vehicle_sync(partial, SimTick(3), now);
        reconciler.tick(&pool, &mut host, &clock(4, now));
        assert!(host.toggle(handle, Toggle::LightsOn));
        assert_eq!(host.field(handle, FieldKind::Livery), Some(FieldValue::Livery(7)));
    }

    #[test]
    fn dead_reckoning_uses_elapsed_time_and_latency() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let then = Instant::now();

        let mut sync = full_vehicle(1, 50);
        sync.velocity = Vec3::new(4.0, 0.0, 0.0);
        pool.apply_vehicle_sync(sync, SimTick(1), then);
        let mut tick = clock(1, then + Duration::from_millis(500));
        tick.latency = Duration::from_millis(500);
        reconciler.tick(&pool, &mut host, &tick);

        // Created at 10, predicted at 14: 16 m² away, pushed.
        let (force, _) = host.forces.last().copied().unwrap();
        assert!((force.x - (4.0 + 0.5 * 4.0)).abs() < 1e-4, "{force:?}");
    }

    #[test]
    fn local_entities_are_read_not_written() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();
        let handle = host.spawn(ModelRef(8), Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        host.set_toggle(handle, Toggle::SirenActive, true);
        host.set_field(handle, FieldValue::LicensePlate("LOCAL".into()));
        let writes = host.writes;

        let record = pool.insert_vehicle(SyncedVehicle::local(5, 1, handle, ModelRef(8), now));
        reconciler.tick(&pool, &mut host, &clock(1, now));
        assert_eq!(host.writes, writes);

        let sync = capture_vehicle(&host, &lock(&record), true).unwrap();
        assert_eq!(sync.id, 5);
        assert_eq!(sync.owner_id, 1);
        assert_eq!(sync.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(sync.flags.contains(VehicleDataFlags::IS_SIREN_ACTIVE));
        let full = sync.full.unwrap();
        assert_eq!(full.model, ModelRef(8));
        assert_eq!(full.license_plate, "LOCAL");

        assert!(capture_vehicle(&host, &lock(&record), false).unwrap().full.is_none());
    }

    #[test]
    fn peds_follow_the_same_cycle() {
        let reconciler = Reconciler::default();
        let pool = EntityPool::<u32>::new();
        let mut host = MemoryWorld::new();
        let now = Instant::now();

        pool.apply_ped_sync(
            PedSync {
                id: 3,
                owner_id: 3,
                flags: PedDataFlags::IS_ON_FIRE,
                health: 150,
                position: Vec3::new(0.0, 1.0, 0.0),
                full: Some(PedFullState {
                    model: ModelRef(12),
                    clothes: vec![1, 2, 3],
                    current_weapon: 0xA2719263,
                }),
                ..Default::default()
            },
            SimTick(1),
            now,
        );
        let report = reconciler.tick(&pool, &mut host, &clock(1, now));
        assert_eq!(report.created, 1);

        let record = pool.ped(3).unwrap();
        let handle = lock(&record).handle.unwrap();
        assert!(host.toggle(handle, Toggle::OnFire));
        assert_eq!(host.field(handle, FieldKind::Health), Some(FieldValue::Health(150)));
        assert_eq!(
            host.field(handle, FieldKind::Clothes),
            Some(FieldValue::Clothes(vec![1, 2, 3]))
        );

        let captured = capture_ped(&host, &lock(&record), true).unwrap();
        assert_eq!(captured.health, 150);
        assert!(captured.flags.contains(PedDataFlags::IS_ON_FIRE));
        assert_eq!(captured.full.unwrap().current_weapon, 0xA2719263);
    }
}
