//! In-process [`HostWorld`] for tests and headless runs.
//!
//! Objects are plain records; forces are logged instead of simulated, and
//! every state write is counted so callers can check what the reconciler
//! touched.

use crate::host::{FieldKind, FieldValue, HostError, HostWorld, ModelDimensions, Toggle};
use coopsync_core::{ModelRef, Quat, Vec3};
use coopsync_net::packets::DamageModel;
use std::collections::{HashMap, HashSet};

/// Handle of a [`MemoryWorld`] object.
pub type ObjectId = u32;

/// One simulated object.
#[derive(Debug, Clone, Default)]
pub struct MemoryObject {
    /// Model it was created from.
    pub model: ModelRef,
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub quaternion: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Boolean states; missing means off.
    pub toggles: HashMap<Toggle, bool>,
    /// Valued fields.
    pub fields: HashMap<FieldKind, FieldValue>,
}

/// Host simulation kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    objects: HashMap<ObjectId, MemoryObject>,
    next: ObjectId,
    /// Models whose creation fails with [`HostError::ModelNotLoaded`].
    pub unloaded: HashSet<ModelRef>,
    /// Models that run on rails.
    pub trains: HashSet<ModelRef>,
    /// Bounds reported for every model not in `unmeasured`.
    pub dimensions: ModelDimensions,
    /// Models with no known bounds.
    pub unmeasured: HashSet<ModelRef>,
    /// Every force applied, as `(force, offset)`.
    pub forces: Vec<(Vec3, Vec3)>,
    /// Messages passed to [`HostWorld::notify`].
    pub notifications: Vec<String>,
    /// Toggle and field writes.
    pub writes: usize,
    /// Objects created through the trait.
    pub creates: usize,
    /// Objects deleted through the trait.
    pub deletes: usize,
}

impl MemoryWorld {
    /// Empty world with car-sized model bounds.
    pub fn new() -> Self {
        Self {
            dimensions: ModelDimensions {
                min: Vec3::new(-1.0, -2.5, -0.5),
                max: Vec3::new(1.0, 2.5, 1.5),
            },
            ..Default::default()
        }
    }

    /// Place an object directly, without counting it as a trait call.
    pub fn spawn(&mut self, model: ModelRef, position: Vec3, quaternion: Quat) -> ObjectId {
        self.next += 1;
        let fields = [
            FieldValue::Steering(0.0),
            FieldValue::Throttle(0.0),
            FieldValue::Brake(0.0),
            FieldValue::Colors([0, 0]),
            FieldValue::Livery(-1),
            FieldValue::EngineHealth(1000.0),
            FieldValue::LicensePlate(String::new()),
            FieldValue::LockStatus(0),
            FieldValue::RoofState(0),
            FieldValue::LandingGear(0),
            FieldValue::Damage(DamageModel::default()),
            FieldValue::Health(200),
            FieldValue::Heading(0.0),
            FieldValue::Clothes(Vec::new()),
            FieldValue::Weapon(0),
        ]
        .into_iter()
        .map(|value| (value.kind(), value))
        .collect();
        self.objects.insert(
            self.next,
            MemoryObject {
                model,
                position,
                quaternion,
                fields,
                ..Default::default()
            },
        );
        self.next
    }

    /// Object by handle.
    pub fn object(&self, handle: ObjectId) -> Option<&MemoryObject> {
        self.objects.get(&handle)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object exists.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn with_object(&mut self, handle: ObjectId, f: impl FnOnce(&mut MemoryObject)) {
        if let Some(object) = self.objects.get_mut(&handle) {
            f(object);
        }
    }
}

impl HostWorld for MemoryWorld {
    type Handle = ObjectId;

    fn exists(&self, handle: ObjectId) -> bool {
        self.objects.contains_key(&handle)
    }

    fn model_of(&self, handle: ObjectId) -> Option<ModelRef> {
        self.objects.get(&handle).map(|o| o.model)
    }

    fn create_vehicle(
        &mut self,
        model: ModelRef,
        position: Vec3,
        quaternion: Quat,
    ) -> Result<ObjectId, HostError> {
        if !model.is_some() {
            return Err(HostError::UnknownModel(model));
        }
        if self.unloaded.contains(&model) {
            return Err(HostError::ModelNotLoaded(model));
        }
        self.creates += 1;
        Ok(self.spawn(model, position, quaternion))
    }

    fn create_ped(
        &mut self,
        model: ModelRef,
        position: Vec3,
        heading: f32,
    ) -> Result<ObjectId, HostError> {
        if !model.is_some() {
            return Err(HostError::UnknownModel(model));
        }
        if self.unloaded.contains(&model) {
            return Err(HostError::ModelNotLoaded(model));
        }
        self.creates += 1;
        let handle = self.spawn(model, position, Quat::IDENTITY);
        self.with_object(handle, |o| {
            o.fields.insert(FieldKind::Heading, FieldValue::Heading(heading));
        });
        Ok(handle)
    }

    fn delete(&mut self, handle: ObjectId) {
        if self.objects.remove(&handle).is_some() {
            self.deletes += 1;
        }
    }

    fn model_dimensions(&self, model: ModelRef) -> Option<ModelDimensions> {
        if self.unmeasured.contains(&model) {
            return None;
        }
        Some(self.dimensions)
    }

    fn is_train(&self, model: ModelRef) -> bool {
        self.trains.contains(&model)
    }

    fn position(&self, handle: ObjectId) -> Vec3 {
        self.objects.get(&handle).map(|o| o.position).unwrap_or_default()
    }

    fn set_position(&mut self, handle: ObjectId, position: Vec3) {
        self.with_object(handle, |o| o.position = position);
    }

    fn quaternion(&self, handle: ObjectId) -> Quat {
        self.objects
            .get(&handle)
            .map(|o| o.quaternion)
            .unwrap_or_default()
    }

    fn set_quaternion(&mut self, handle: ObjectId, quaternion: Quat) {
        self.with_object(handle, |o| o.quaternion = quaternion);
    }

    fn velocity(&self, handle: ObjectId) -> Vec3 {
        self.objects.get(&handle).map(|o| o.velocity).unwrap_or_default()
    }

    fn set_velocity(&mut self, handle: ObjectId, velocity: Vec3) {
        self.with_object(handle, |o| o.velocity = velocity);
    }

    fn apply_force(&mut self, _handle: ObjectId, force: Vec3, offset: Vec3) {
        self.forces.push((force, offset));
    }

    fn toggle(&self, handle: ObjectId, toggle: Toggle) -> bool {
        self.objects
            .get(&handle)
            .and_then(|o| o.toggles.get(&toggle).copied())
            .unwrap_or(false)
    }

    fn set_toggle(&mut self, handle: ObjectId, toggle: Toggle, on: bool) {
        self.writes += 1;
        self.with_object(handle, |o| {
            o.toggles.insert(toggle, on);
        });
    }

    fn field(&self, handle: ObjectId, kind: FieldKind) -> Option<FieldValue> {
        self.objects.get(&handle)?.fields.get(&kind).cloned()
    }

    fn set_field(&mut self, handle: ObjectId, value: FieldValue) {
        self.writes += 1;
        self.with_object(handle, |o| {
            o.fields.insert(value.kind(), value);
        });
    }

    fn notify(&mut self, message: &str) {
        self.notifications.push(message.to_owned());
    }
}
