//! Boundary to the host simulation.
//!
//! The reconciler never touches game objects directly. Everything it reads
//! or writes goes through [`HostWorld`], which the embedding application
//! implements on top of its entity model.

use coopsync_core::{ModelRef, Quat, Vec3};
use coopsync_net::packets::DamageModel;
use thiserror::Error;

/// Reasons the host could not materialize an object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The model is not loaded yet; retry later.
    #[error("model {0:?} is not loaded")]
    ModelNotLoaded(ModelRef),
    /// The model does not exist in the host.
    #[error("model {0:?} is unknown")]
    UnknownModel(ModelRef),
    /// Any other host failure.
    #[error("host failure: {0}")]
    Other(String),
}

/// Boolean state of a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    /// Vehicle engine running.
    EngineRunning,
    /// Headlights on.
    LightsOn,
    /// High beams on.
    HighBeamsOn,
    /// Brake lights on.
    BrakeLightsOn,
    /// Siren on.
    SirenActive,
    /// Horn sounding.
    HornActive,
    /// Object burning.
    OnFire,
    /// Wrecked vehicle or dead ped. Setting it on a vehicle explodes it,
    /// clearing it repairs it.
    Dead,
    /// Rocket boost firing.
    RocketBoostActive,
    /// Vehicle parachute deployed.
    ParachuteActive,
    /// Object cannot be damaged.
    Invincible,
    /// Ped ragdolling.
    Ragdoll,
}

/// Which valued field of a host object to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Livery index.
    Livery,
    /// Primary and secondary colors.
    Colors,
    /// Plate text.
    LicensePlate,
    /// Engine health.
    EngineHealth,
    /// Door lock status.
    LockStatus,
    /// Convertible roof state.
    RoofState,
    /// Aircraft landing gear state.
    LandingGear,
    /// Visual damage.
    Damage,
    /// Steering angle in degrees.
    Steering,
    /// Throttle input.
    Throttle,
    /// Brake input.
    Brake,
    /// Ped health.
    Health,
    /// Ped heading in degrees.
    Heading,
    /// Ped clothing drawables.
    Clothes,
    /// Weapon in hand.
    Weapon,
}

/// Value of a host object field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Livery index.
    Livery(i32),
    /// Primary and secondary colors.
    Colors([u8; 2]),
    /// Plate text.
    LicensePlate(String),
    /// Engine health.
    EngineHealth(f32),
    /// Door lock status.
    LockStatus(u8),
    /// Convertible roof state.
    RoofState(u8),
    /// Aircraft landing gear state.
    LandingGear(u8),
    /// Visual damage.
    Damage(DamageModel),
    /// Steering angle in degrees.
    Steering(f32),
    /// Throttle input.
    Throttle(f32),
    /// Brake input.
    Brake(f32),
    /// Ped health.
    Health(i32),
    /// Ped heading in degrees.
    Heading(f32),
    /// Ped clothing drawables.
    Clothes(Vec<u8>),
    /// Weapon in hand.
    Weapon(u32),
}

impl FieldValue {
    /// Field this value belongs to.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Livery(_) => FieldKind::Livery,
            FieldValue::Colors(_) => FieldKind::Colors,
            FieldValue::LicensePlate(_) => FieldKind::LicensePlate,
            FieldValue::EngineHealth(_) => FieldKind::EngineHealth,
            FieldValue::LockStatus(_) => FieldKind::LockStatus,
            FieldValue::RoofState(_) => FieldKind::RoofState,
            FieldValue::LandingGear(_) => FieldKind::LandingGear,
            FieldValue::Damage(_) => FieldKind::Damage,
            FieldValue::Steering(_) => FieldKind::Steering,
            FieldValue::Throttle(_) => FieldKind::Throttle,
            FieldValue::Brake(_) => FieldKind::Brake,
            FieldValue::Health(_) => FieldKind::Health,
            FieldValue::Heading(_) => FieldKind::Heading,
            FieldValue::Clothes(_) => FieldKind::Clothes,
            FieldValue::Weapon(_) => FieldKind::Weapon,
        }
    }
}

/// Axis-aligned bounds of a model in its local space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelDimensions {
    /// Rear-bottom-left corner.
    pub min: Vec3,
    /// Front-top-right corner.
    pub max: Vec3,
}

/// Host simulation as seen by the reconciler.
///
/// All methods are called from the simulation thread.
pub trait HostWorld {
    /// Handle of a host object.
    type Handle: Copy + Eq + std::fmt::Debug + Send + 'static;

    /// Whether the object still exists.
    fn exists(&self, handle: Self::Handle) -> bool;

    /// Model the object was created from.
    fn model_of(&self, handle: Self::Handle) -> Option<ModelRef>;

    /// Create a vehicle.
    fn create_vehicle(
        &mut self,
        model: ModelRef,
        position: Vec3,
        quaternion: Quat,
    ) -> Result<Self::Handle, HostError>;

    /// Create a ped.
    fn create_ped(
        &mut self,
        model: ModelRef,
        position: Vec3,
        heading: f32,
    ) -> Result<Self::Handle, HostError>;

    /// Remove an object.
    fn delete(&mut self, handle: Self::Handle);

    /// Local bounds of a model. Vehicles of a model without bounds are not
    /// created.
    fn model_dimensions(&self, model: ModelRef) -> Option<ModelDimensions>;

    /// Whether vehicles of this model run on rails.
    fn is_train(&self, model: ModelRef) -> bool;

    /// World position.
    fn position(&self, handle: Self::Handle) -> Vec3;

    /// Move the object.
    fn set_position(&mut self, handle: Self::Handle, position: Vec3);

    /// Orientation.
    fn quaternion(&self, handle: Self::Handle) -> Quat;

    /// Rotate the object.
    fn set_quaternion(&mut self, handle: Self::Handle, quaternion: Quat);

    /// Linear velocity.
    fn velocity(&self, handle: Self::Handle) -> Vec3;

    /// Override the linear velocity.
    fn set_velocity(&mut self, handle: Self::Handle, velocity: Vec3);

    /// Push the object with `force` applied at `offset` in local space.
    fn apply_force(&mut self, handle: Self::Handle, force: Vec3, offset: Vec3);

    /// Current value of a boolean state.
    fn toggle(&self, handle: Self::Handle, toggle: Toggle) -> bool;

    /// Change a boolean state.
    fn set_toggle(&mut self, handle: Self::Handle, toggle: Toggle, on: bool);

    /// Current value of a field, `None` if the object has no such field.
    fn field(&self, handle: Self::Handle, kind: FieldKind) -> Option<FieldValue>;

    /// Change a field.
    fn set_field(&mut self, handle: Self::Handle, value: FieldValue);

    /// Show a message to the local user.
    fn notify(&mut self, message: &str);
}
