//! Packet definitions and their wire layout.
//!
//! Every packet is a one-byte [`PacketType`] tag followed by the fields
//! written by its [`Packet::write`] implementation.

use crate::custom_event::DecodeContext;
use crate::error::DecodeError;
use crate::wire::{WireReader, WireWriter};
use coopsync_core::{
    EntityId, ModelRef, PedDataFlags, PlayerId, Quat, Vec3, VehicleDataFlags,
};

/// Protocol version folded into the schema hash.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes identifying the protocol.
pub const PROTOCOL_MAGIC: &[u8; 8] = b"COOPSYNC";

/// Maximum length of a username, in bytes.
pub const MAX_USERNAME_LEN: usize = 32;

/// Maximum length of a chat message, in bytes.
pub const MAX_CHAT_LEN: usize = 256;

/// Tag identifying the packet carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    /// Client asks to join; carried as the transport's connect payload.
    Handshake = 0,
    /// Server accepted the join; carried as the approval hail.
    HandshakeSuccess = 1,
    /// A player joined.
    PlayerConnect = 2,
    /// A player left.
    PlayerDisconnect = 3,
    /// Ask for the server's RSA public key.
    PublicKeyRequest = 4,
    /// The server's RSA public key.
    PublicKeyResponse = 5,
    /// Chat line.
    ChatMessage = 10,
    /// Application-defined event with typed arguments.
    CustomEvent = 11,
    /// Vehicle state snapshot.
    VehicleSync = 20,
    /// Ped state snapshot.
    PedSync = 21,
    /// Wrapper around a packet that expects a response.
    Request = 254,
    /// Wrapper around the response to a request.
    Response = 255,
}

impl PacketType {
    /// Every packet type, in tag order.
    pub const ALL: [PacketType; 12] = [
        PacketType::Handshake,
        PacketType::HandshakeSuccess,
        PacketType::PlayerConnect,
        PacketType::PlayerDisconnect,
        PacketType::PublicKeyRequest,
        PacketType::PublicKeyResponse,
        PacketType::ChatMessage,
        PacketType::CustomEvent,
        PacketType::VehicleSync,
        PacketType::PedSync,
        PacketType::Request,
        PacketType::Response,
    ];

    /// Whether this tag is one of the request/response wrappers.
    pub fn is_wrapper(self) -> bool {
        matches!(self, PacketType::Request | PacketType::Response)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Handshake),
            1 => Ok(PacketType::HandshakeSuccess),
            2 => Ok(PacketType::PlayerConnect),
            3 => Ok(PacketType::PlayerDisconnect),
            4 => Ok(PacketType::PublicKeyRequest),
            5 => Ok(PacketType::PublicKeyResponse),
            10 => Ok(PacketType::ChatMessage),
            11 => Ok(PacketType::CustomEvent),
            20 => Ok(PacketType::VehicleSync),
            21 => Ok(PacketType::PedSync),
            254 => Ok(PacketType::Request),
            255 => Ok(PacketType::Response),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }
}

/// A message with a fixed tag and a hand-written field layout.
pub trait Packet: Sized + Send + 'static {
    /// Tag written in front of the payload.
    const TYPE: PacketType;

    /// Append this packet's fields.
    fn write(&self, w: &mut WireWriter);

    /// Read this packet's fields from a payload.
    fn read(r: &mut WireReader<'_>, ctx: &DecodeContext) -> Result<Self, DecodeError>;
}

/// Compute the schema hash exchanged during the handshake.
///
/// Peers built from different packet tables produce different hashes and
/// refuse each other.
pub fn compute_schema_hash() -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&PROTOCOL_VERSION.to_le_bytes());
    hasher.update(PROTOCOL_MAGIC);
    for ty in PacketType::ALL {
        hasher.update(&[ty as u8]);
        hasher.update(format!("{ty:?}").as_bytes());
    }
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Join request sent as the connect payload.
///
/// The session key, IV and password travel RSA-encrypted with the server's
/// public key; everything else is plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handshake {
    /// Id the player will use for its own ped.
    pub ped_id: PlayerId,
    /// Display name.
    pub username: String,
    /// Client build version.
    pub mod_version: String,
    /// Protocol schema hash of the client build.
    pub schema_hash: u64,
    /// RSA-encrypted AES session key.
    pub aes_key_crypted: Vec<u8>,
    /// RSA-encrypted AES IV.
    pub aes_iv_crypted: Vec<u8>,
    /// RSA-encrypted password; encrypts an empty string when none is set.
    pub password_encrypted: Vec<u8>,
}

impl Packet for Handshake {
    const TYPE: PacketType = PacketType::Handshake;

    fn write(&self, w: &mut WireWriter) {
        w.write_i32(self.ped_id);
        w.write_str(&self.username);
        w.write_str(&self.mod_version);
        w.write_u64(self.schema_hash);
        w.write_bytes(&self.aes_key_crypted);
        w.write_bytes(&self.aes_iv_crypted);
        w.write_bytes(&self.password_encrypted);
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self {
            ped_id: r.read_i32()?,
            username: r.read_string()?,
            mod_version: r.read_string()?,
            schema_hash: r.read_u64()?,
            aes_key_crypted: r.read_bytes()?.to_vec(),
            aes_iv_crypted: r.read_bytes()?.to_vec(),
            password_encrypted: r.read_bytes()?.to_vec(),
        })
    }
}

/// A player as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub username: String,
}

/// Approval hail listing the players already online.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeSuccess {
    /// Players online at the moment of approval.
    pub players: Vec<PlayerInfo>,
}

impl Packet for HandshakeSuccess {
    const TYPE: PacketType = PacketType::HandshakeSuccess;

    fn write(&self, w: &mut WireWriter) {
        w.write_count(self.players.len());
        for player in &self.players {
            w.write_i32(player.id);
            w.write_str(&player.username);
        }
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let count = r.read_count(8)?;
        let mut players = Vec::with_capacity(count);
        for _ in 0..count {
            players.push(PlayerInfo {
                id: r.read_i32()?,
                username: r.read_string()?,
            });
        }
        Ok(Self { players })
    }
}

/// Request for the server's public key. Has no fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublicKeyRequest;

impl Packet for PublicKeyRequest {
    const TYPE: PacketType = PacketType::PublicKeyRequest;

    fn write(&self, _w: &mut WireWriter) {}

    fn read(_r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

/// The server's RSA public key as big-endian modulus and exponent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicKeyResponse {
    /// Big-endian modulus.
    pub modulus: Vec<u8>,
    /// Big-endian public exponent.
    pub exponent: Vec<u8>,
}

impl Packet for PublicKeyResponse {
    const TYPE: PacketType = PacketType::PublicKeyResponse;

    fn write(&self, w: &mut WireWriter) {
        w.write_bytes(&self.modulus);
        w.write_bytes(&self.exponent);
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self {
            modulus: r.read_bytes()?.to_vec(),
            exponent: r.read_bytes()?.to_vec(),
        })
    }
}

/// Broadcast when a player joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConnect {
    /// Id of the player (and of its ped).
    pub ped_id: PlayerId,
    /// Display name.
    pub username: String,
}

impl Packet for PlayerConnect {
    const TYPE: PacketType = PacketType::PlayerConnect;

    fn write(&self, w: &mut WireWriter) {
        w.write_i32(self.ped_id);
        w.write_str(&self.username);
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self {
            ped_id: r.read_i32()?,
            username: r.read_string()?,
        })
    }
}

/// Broadcast when a player leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDisconnect {
    /// Id of the player that left.
    pub ped_id: PlayerId,
}

impl Packet for PlayerDisconnect {
    const TYPE: PacketType = PacketType::PlayerDisconnect;

    fn write(&self, w: &mut WireWriter) {
        w.write_i32(self.ped_id);
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self {
            ped_id: r.read_i32()?,
        })
    }
}

/// Chat line, relayed by the server to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatMessage {
    /// Author; filled in by the server when relaying.
    pub username: String,
    /// Message text.
    pub message: String,
}

impl Packet for ChatMessage {
    const TYPE: PacketType = PacketType::ChatMessage;

    fn write(&self, w: &mut WireWriter) {
        w.write_str(&self.username);
        w.write_str(&self.message);
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        Ok(Self {
            username: r.read_string()?,
            message: r.read_string()?,
        })
    }
}

/// Visual damage of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageModel {
    /// Bit per door that has fallen off.
    pub broken_doors: u8,
    /// Bit per door that is open.
    pub open_doors: u8,
    /// Bit per smashed window.
    pub broken_windows: u8,
    /// Bit per burst tire.
    pub burst_tires: i16,
    /// Left headlight broken.
    pub left_headlight_broken: bool,
    /// Right headlight broken.
    pub right_headlight_broken: bool,
}

impl DamageModel {
    fn write(&self, w: &mut WireWriter) {
        w.write_u8(self.broken_doors);
        w.write_u8(self.open_doors);
        w.write_u8(self.broken_windows);
        w.write_i16(self.burst_tires);
        w.write_bool(self.left_headlight_broken);
        w.write_bool(self.right_headlight_broken);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            broken_doors: r.read_u8()?,
            open_doors: r.read_u8()?,
            broken_windows: r.read_u8()?,
            burst_tires: r.read_i16()?,
            left_headlight_broken: r.read_bool()?,
            right_headlight_broken: r.read_bool()?,
        })
    }
}

/// Vehicle state that changes rarely and is sent only with full syncs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleFullState {
    /// Vehicle model.
    pub model: ModelRef,
    /// Primary and secondary color.
    pub colors: [u8; 2],
    /// Livery index, `-1` for none.
    pub livery: i32,
    /// Engine health.
    pub engine_health: f32,
    /// Plate text.
    pub license_plate: String,
    /// Door lock status.
    pub lock_status: u8,
    /// Convertible roof state.
    pub roof_state: u8,
    /// Landing gear state of aircraft.
    pub landing_gear: u8,
    /// Visual damage.
    pub damage: DamageModel,
}

/// Per-tick vehicle snapshot.
///
/// `full` is present exactly when the frame carries
/// [`VehicleDataFlags::IS_FULL_SYNC`]; decoded `flags` never contain that bit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleSync {
    /// Network id of the vehicle.
    pub id: EntityId,
    /// Owning player.
    pub owner_id: PlayerId,
    /// Discrete state.
    pub flags: VehicleDataFlags,
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub quaternion: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Angular velocity.
    pub rotation_velocity: Vec3,
    /// Throttle input.
    pub throttle: f32,
    /// Brake input.
    pub brake: f32,
    /// Steering angle in degrees.
    pub steering: f32,
    /// Full-state block.
    pub full: Option<VehicleFullState>,
}

impl Packet for VehicleSync {
    const TYPE: PacketType = PacketType::VehicleSync;

    fn write(&self, w: &mut WireWriter) {
        let mut flags = self.flags;
        flags.set(VehicleDataFlags::IS_FULL_SYNC, self.full.is_some());

        w.write_i32(self.id);
        w.write_i32(self.owner_id);
        w.write_u32(flags.bits());
        w.write_vec3(self.position);
        w.write_quat(self.quaternion);
        w.write_vec3(self.velocity);
        w.write_vec3(self.rotation_velocity);
        w.write_f32(self.throttle);
        w.write_f32(self.brake);
        w.write_f32(self.steering);

        if let Some(full) = &self.full {
            w.write_i32(full.model.0);
            w.write_u8(full.colors[0]);
            w.write_u8(full.colors[1]);
            w.write_i32(full.livery);
            w.write_f32(full.engine_health);
            w.write_str(&full.license_plate);
            w.write_u8(full.lock_status);
            w.write_u8(full.roof_state);
            w.write_u8(full.landing_gear);
            full.damage.write(w);
        }
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let id = r.read_i32()?;
        let owner_id = r.read_i32()?;
        let mut flags = VehicleDataFlags::from_bits_retain(r.read_u32()?);
        let position = r.read_vec3()?;
        let quaternion = r.read_quat()?;
        let velocity = r.read_vec3()?;
        let rotation_velocity = r.read_vec3()?;
        let throttle = r.read_f32()?;
        let brake = r.read_f32()?;
        let steering = r.read_f32()?;

        let full = if flags.contains(VehicleDataFlags::IS_FULL_SYNC) {
            Some(VehicleFullState {
                model: ModelRef(r.read_i32()?),
                colors: [r.read_u8()?, r.read_u8()?],
                livery: r.read_i32()?,
                engine_health: r.read_f32()?,
                license_plate: r.read_string()?,
                lock_status: r.read_u8()?,
                roof_state: r.read_u8()?,
                landing_gear: r.read_u8()?,
                damage: DamageModel::read(r)?,
            })
        } else {
            None
        };
        // Carried by `full` on this side of the wire.
        flags.remove(VehicleDataFlags::IS_FULL_SYNC);

        Ok(Self {
            id,
            owner_id,
            flags,
            position,
            quaternion,
            velocity,
            rotation_velocity,
            throttle,
            brake,
            steering,
            full,
        })
    }
}

/// Ped state that changes rarely and is sent only with full syncs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PedFullState {
    /// Ped model.
    pub model: ModelRef,
    /// Component drawable indices.
    pub clothes: Vec<u8>,
    /// Hash of the weapon in hand.
    pub current_weapon: u32,
}

/// Per-tick ped snapshot.
///
/// `full` is present exactly when the frame carries
/// [`PedDataFlags::IS_FULL_SYNC`]; decoded `flags` never contain that bit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PedSync {
    /// Network id of the ped.
    pub id: EntityId,
    /// Owning player.
    pub owner_id: PlayerId,
    /// Discrete state.
    pub flags: PedDataFlags,
    /// Health points.
    pub health: i32,
    /// World position.
    pub position: Vec3,
    /// Euler rotation in degrees.
    pub rotation: Vec3,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Movement speed class.
    pub speed: u8,
    /// Heading in degrees.
    pub heading: f32,
    /// Full-state block.
    pub full: Option<PedFullState>,
}

impl Packet for PedSync {
    const TYPE: PacketType = PacketType::PedSync;

    fn write(&self, w: &mut WireWriter) {
        let mut flags = self.flags;
        flags.set(PedDataFlags::IS_FULL_SYNC, self.full.is_some());

        w.write_i32(self.id);
        w.write_i32(self.owner_id);
        w.write_u32(flags.bits());
        w.write_i32(self.health);
        w.write_vec3(self.position);
        w.write_vec3(self.rotation);
        w.write_vec3(self.velocity);
        w.write_u8(self.speed);
        w.write_f32(self.heading);

        if let Some(full) = &self.full {
            w.write_i32(full.model.0);
            w.write_bytes(&full.clothes);
            w.write_u32(full.current_weapon);
        }
    }

    fn read(r: &mut WireReader<'_>, _ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let id = r.read_i32()?;
        let owner_id = r.read_i32()?;
        let mut flags = PedDataFlags::from_bits_retain(r.read_u32()?);
        let health = r.read_i32()?;
        let position = r.read_vec3()?;
        let rotation = r.read_vec3()?;
        let velocity = r.read_vec3()?;
        let speed = r.read_u8()?;
        let heading = r.read_f32()?;

        let full = if flags.contains(PedDataFlags::IS_FULL_SYNC) {
            Some(PedFullState {
                model: ModelRef(r.read_i32()?),
                clothes: r.read_bytes()?.to_vec(),
                current_weapon: r.read_u32()?,
            })
        } else {
            None
        };
        flags.remove(PedDataFlags::IS_FULL_SYNC);

        Ok(Self {
            id,
            owner_id,
            flags,
            health,
            position,
            rotation,
            velocity,
            speed,
            heading,
            full,
        })
    }
}
