//! Custom events: application messages with a tagged list of arguments.
//!
//! Payload layout: `flags: u8`, `hash: i32`, `count: i32`, then `count`
//! arguments, each a one-byte type code followed by its value. Codes
//! `0x01..=0x15` are owned by this codec. Any other code must be claimed by
//! an [`ArgResolver`]; the resolver consumes the value's bytes and the
//! argument keeps them verbatim, so re-encoding reproduces the input.

use crate::error::{DecodeError, NetError};
use crate::packets::{Packet, PacketType};
use crate::wire::{WireReader, WireWriter};
use bitflags::bitflags;
use coopsync_core::{ModelRef, PlayerId, Quat, Vec2, Vec3};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

bitflags! {
    /// Delivery flags of a custom event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CustomEventFlags: u8 {
        /// Run the handlers on the simulation thread instead of the network task.
        const QUEUED = 1 << 0;
    }
}

/// Argument type codes owned by the core codec.
pub const RESERVED_ARG_CODES: RangeInclusive<u8> = 0x01..=0x15;

/// Argument type codes.
pub mod arg_code {
    /// `u8`
    pub const BYTE: u8 = 0x01;
    /// `i32`
    pub const INT32: u8 = 0x02;
    /// `u16`
    pub const UINT16: u8 = 0x03;
    /// `i16`, widened to a four-byte signed integer on the wire.
    pub const INT16: u8 = 0x04;
    /// `u32`
    pub const UINT32: u8 = 0x05;
    /// `i64`
    pub const INT64: u8 = 0x06;
    /// `u64`
    pub const UINT64: u8 = 0x07;
    /// `f32`
    pub const FLOAT: u8 = 0x08;
    /// `bool`
    pub const BOOL: u8 = 0x09;
    /// Length-prefixed UTF-8 string.
    pub const STRING: u8 = 0x10;
    /// Three `f32`.
    pub const VECTOR3: u8 = 0x11;
    /// Four `f32`, `x, y, z, w`.
    pub const QUATERNION: u8 = 0x12;
    /// Model hash as `i32`.
    pub const MODEL: u8 = 0x13;
    /// Two `f32`.
    pub const VECTOR2: u8 = 0x14;
    /// Length-prefixed byte array.
    pub const BYTES: u8 = 0x15;
}

/// One custom event argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Code `0x01`.
    Byte(u8),
    /// Code `0x02`.
    Int32(i32),
    /// Code `0x03`.
    UInt16(u16),
    /// Code `0x04`.
    Int16(i16),
    /// Code `0x05`.
    UInt32(u32),
    /// Code `0x06`.
    Int64(i64),
    /// Code `0x07`.
    UInt64(u64),
    /// Code `0x08`.
    Float(f32),
    /// Code `0x09`.
    Bool(bool),
    /// Code `0x10`.
    String(String),
    /// Code `0x11`.
    Vector3(Vec3),
    /// Code `0x12`.
    Quaternion(Quat),
    /// Code `0x13`.
    Model(ModelRef),
    /// Code `0x14`.
    Vector2(Vec2),
    /// Code `0x15`.
    Bytes(Vec<u8>),
    /// A code outside the core range, kept as the bytes its resolver consumed.
    Extension {
        /// Type code.
        tag: u8,
        /// Encoded value, exactly as read.
        raw: Vec<u8>,
    },
}

impl Arg {
    /// Type code written in front of the value.
    pub fn tag(&self) -> u8 {
        match self {
            Arg::Byte(_) => arg_code::BYTE,
            Arg::Int32(_) => arg_code::INT32,
            Arg::UInt16(_) => arg_code::UINT16,
            Arg::Int16(_) => arg_code::INT16,
            Arg::UInt32(_) => arg_code::UINT32,
            Arg::Int64(_) => arg_code::INT64,
            Arg::UInt64(_) => arg_code::UINT64,
            Arg::Float(_) => arg_code::FLOAT,
            Arg::Bool(_) => arg_code::BOOL,
            Arg::String(_) => arg_code::STRING,
            Arg::Vector3(_) => arg_code::VECTOR3,
            Arg::Quaternion(_) => arg_code::QUATERNION,
            Arg::Model(_) => arg_code::MODEL,
            Arg::Vector2(_) => arg_code::VECTOR2,
            Arg::Bytes(_) => arg_code::BYTES,
            Arg::Extension { tag, .. } => *tag,
        }
    }

    fn write(&self, w: &mut WireWriter) {
        w.write_u8(self.tag());
        match self {
            Arg::Byte(v) => w.write_u8(*v),
            Arg::Int32(v) => w.write_i32(*v),
            Arg::UInt16(v) => w.write_u16(*v),
            Arg::Int16(v) => w.write_i32(i32::from(*v)),
            Arg::UInt32(v) => w.write_u32(*v),
            Arg::Int64(v) => w.write_i64(*v),
            Arg::UInt64(v) => w.write_u64(*v),
            Arg::Float(v) => w.write_f32(*v),
            Arg::Bool(v) => w.write_bool(*v),
            Arg::String(v) => w.write_str(v),
            Arg::Vector3(v) => w.write_vec3(*v),
            Arg::Quaternion(v) => w.write_quat(*v),
            Arg::Model(v) => w.write_i32(v.0),
            Arg::Vector2(v) => w.write_vec2(*v),
            Arg::Bytes(v) => w.write_bytes(v),
            Arg::Extension { raw, .. } => w.write_raw(raw),
        }
    }

    fn read(r: &mut WireReader<'_>, ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let tag = r.read_u8()?;
        let arg = match tag {
            arg_code::BYTE => Arg::Byte(r.read_u8()?),
            arg_code::INT32 => Arg::Int32(r.read_i32()?),
            arg_code::UINT16 => Arg::UInt16(r.read_u16()?),
            arg_code::INT16 => {
                let wide = r.read_i32()?;
                let narrow = i16::try_from(wide).map_err(|_| DecodeError::OutOfRange {
                    field: "int16 argument",
                    value: i64::from(wide),
                })?;
                Arg::Int16(narrow)
            }
            arg_code::UINT32 => Arg::UInt32(r.read_u32()?),
            arg_code::INT64 => Arg::Int64(r.read_i64()?),
            arg_code::UINT64 => Arg::UInt64(r.read_u64()?),
            arg_code::FLOAT => Arg::Float(r.read_f32()?),
            arg_code::BOOL => Arg::Bool(r.read_bool()?),
            arg_code::STRING => Arg::String(r.read_string()?),
            arg_code::VECTOR3 => Arg::Vector3(r.read_vec3()?),
            arg_code::QUATERNION => Arg::Quaternion(r.read_quat()?),
            arg_code::MODEL => Arg::Model(ModelRef(r.read_i32()?)),
            arg_code::VECTOR2 => Arg::Vector2(r.read_vec2()?),
            arg_code::BYTES => Arg::Bytes(r.read_bytes()?.to_vec()),
            reserved if RESERVED_ARG_CODES.contains(&reserved) => {
                return Err(DecodeError::UnexpectedType(reserved));
            }
            extension => {
                let resolver = ctx
                    .resolver
                    .as_deref()
                    .ok_or(DecodeError::UnexpectedType(extension))?;
                let start = r.position();
                match resolver.consume(extension, r) {
                    Some(Ok(())) => Arg::Extension {
                        tag: extension,
                        raw: r.slice_since(start).to_vec(),
                    },
                    Some(Err(err)) => return Err(err),
                    None => return Err(DecodeError::UnexpectedType(extension)),
                }
            }
        };
        Ok(arg)
    }

    /// The value as `i32`, for `Int32` arguments.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Arg::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, for `String` arguments.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! arg_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                Arg::$variant(value)
            }
        })*
    };
}

arg_from! {
    u8 => Byte,
    i32 => Int32,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    bool => Bool,
    String => String,
    Vec3 => Vector3,
    Quat => Quaternion,
    ModelRef => Model,
    Vec2 => Vector2,
    Vec<u8> => Bytes,
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::String(value.to_owned())
    }
}

/// Decoder for argument codes outside the core range.
pub trait ArgResolver: Send + Sync {
    /// Consume the value of an argument with type code `tag`.
    ///
    /// Returns `None` when the resolver does not know `tag`. On success the
    /// reader must sit right after the value.
    fn consume(&self, tag: u8, reader: &mut WireReader<'_>) -> Option<Result<(), DecodeError>>;
}

type ConsumeFn = Arc<dyn Fn(&mut WireReader<'_>) -> Result<(), DecodeError> + Send + Sync>;

/// Table of extension argument decoders, one per type code.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    consumers: HashMap<u8, ConsumeFn>,
}

impl ResolverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `tag`. Core codes cannot be overridden.
    pub fn register<F>(&mut self, tag: u8, consume: F) -> Result<(), NetError>
    where
        F: Fn(&mut WireReader<'_>) -> Result<(), DecodeError> + Send + Sync + 'static,
    {
        if tag == 0 || RESERVED_ARG_CODES.contains(&tag) {
            return Err(NetError::ReservedArgType(tag));
        }
        if self.consumers.insert(tag, Arc::new(consume)).is_some() {
            debug!(tag, "Replaced custom event argument resolver");
        }
        Ok(())
    }

    /// Register a code whose values are always `len` bytes long.
    pub fn register_fixed(&mut self, tag: u8, len: usize) -> Result<(), NetError> {
        self.register(tag, move |r| r.take(len).map(|_| ()))
    }

    /// Whether `tag` has a decoder.
    pub fn contains(&self, tag: u8) -> bool {
        self.consumers.contains_key(&tag)
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.consumers.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("ResolverRegistry").field("tags", &tags).finish()
    }
}

impl ArgResolver for ResolverRegistry {
    fn consume(&self, tag: u8, reader: &mut WireReader<'_>) -> Option<Result<(), DecodeError>> {
        self.consumers.get(&tag).map(|consume| consume(reader))
    }
}

/// State a decoder may need beyond the bytes themselves.
#[derive(Clone, Default)]
pub struct DecodeContext {
    /// Decoder for extension argument codes.
    pub resolver: Option<Arc<dyn ArgResolver>>,
}

impl DecodeContext {
    /// Context that resolves extension codes through `resolver`.
    pub fn with_resolver(resolver: Arc<dyn ArgResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }
}

impl std::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// Application event identified by the hash of its name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomEvent {
    /// Delivery flags.
    pub flags: CustomEventFlags,
    /// [`event_hash`] of the event name.
    pub hash: i32,
    /// Ordered arguments.
    pub args: Vec<Arg>,
}

impl CustomEvent {
    /// Event with `hash` and `args`, handled on the network task.
    pub fn new(hash: i32, args: Vec<Arg>) -> Self {
        Self {
            flags: CustomEventFlags::empty(),
            hash,
            args,
        }
    }

    /// Event whose handlers run on the simulation thread.
    pub fn queued(hash: i32, args: Vec<Arg>) -> Self {
        Self {
            flags: CustomEventFlags::QUEUED,
            hash,
            args,
        }
    }

    /// Whether handlers must run on the simulation thread.
    pub fn is_queued(&self) -> bool {
        self.flags.contains(CustomEventFlags::QUEUED)
    }
}

impl Packet for CustomEvent {
    const TYPE: PacketType = PacketType::CustomEvent;

    fn write(&self, w: &mut WireWriter) {
        w.write_u8(self.flags.bits());
        w.write_i32(self.hash);
        w.write_count(self.args.len());
        for arg in &self.args {
            arg.write(w);
        }
    }

    fn read(r: &mut WireReader<'_>, ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let flags = CustomEventFlags::from_bits_retain(r.read_u8()?);
        let hash = r.read_i32()?;
        // Every argument is at least its type code.
        let count = r.read_count(1)?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(Arg::read(r, ctx)?);
        }
        Ok(Self { flags, hash, args })
    }
}

/// Stable 32-bit hash of an event name.
pub fn event_hash(name: &str) -> i32 {
    let hash = blake3::hash(name.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&hash.as_bytes()[..4]);
    i32::from_le_bytes(prefix)
}

/// Who sent a custom event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSender {
    /// The server.
    Server,
    /// A connected player.
    Player(PlayerId),
}

/// Custom event handler.
pub type EventHandler = Arc<dyn Fn(EventSender, &CustomEvent) -> anyhow::Result<()> + Send + Sync>;

/// Custom event handlers keyed by event hash.
#[derive(Default)]
pub struct EventHandlers {
    handlers: RwLock<HashMap<i32, Vec<EventHandler>>>,
}

impl EventHandlers {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the event called `name`. Returns its hash.
    pub fn register<F>(&self, name: &str, handler: F) -> i32
    where
        F: Fn(EventSender, &CustomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let hash = event_hash(name);
        self.register_hash(hash, handler);
        hash
    }

    /// Register a handler for an event hash.
    pub fn register_hash<F>(&self, hash: i32, handler: F)
    where
        F: Fn(EventSender, &CustomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.entry(hash).or_default().push(Arc::new(handler));
    }

    /// Handlers registered for `hash`, in registration order.
    pub fn handlers_for(&self, hash: i32) -> Vec<EventHandler> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler for `event`. Returns how many ran.
    pub fn invoke(&self, sender: EventSender, event: &CustomEvent) -> usize {
        let handlers = self.handlers_for(event.hash);
        if handlers.is_empty() {
            debug!(hash = event.hash, ?sender, "No handler for custom event");
        }
        run_handlers(&handlers, sender, event)
    }
}

/// Run `handlers` against `event`, logging failures and panics.
pub fn run_handlers(handlers: &[EventHandler], sender: EventSender, event: &CustomEvent) -> usize {
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(sender, event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(hash = event.hash, ?sender, "Custom event handler failed: {err:#}");
            }
            Err(_) => {
                warn!(hash = event.hash, ?sender, "Custom event handler panicked");
            }
        }
    }
    handlers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_packet, encode_packet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn every_core_arg() -> Vec<Arg> {
        vec![
            Arg::Byte(0xab),
            Arg::Int32(-7),
            Arg::UInt16(65_000),
            Arg::Int16(-1234),
            Arg::UInt32(4_000_000_000),
            Arg::Int64(i64::MIN),
            Arg::UInt64(u64::MAX),
            Arg::Float(1.5),
            Arg::Bool(true),
            Arg::String("héllo".into()),
            Arg::Vector3(Vec3::new(1.0, 2.0, 3.0)),
            Arg::Quaternion(Quat::from_xyzw(0.0, 0.0, 0.0, 1.0)),
            Arg::Model(ModelRef(-1)),
            Arg::Vector2(Vec2::new(-1.0, 0.5)),
            Arg::Bytes(vec![0, 1, 2]),
        ]
    }

    #[test]
    fn every_core_code_round_trips() {
        let event = CustomEvent::new(event_hash("test"), every_core_arg());
        let frame = encode_packet(&event);
        let decoded = decode_packet::<CustomEvent>(&frame, &DecodeContext::default()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(encode_packet(&decoded), frame);
    }

    #[test]
    fn payload_layout() {
        let event = CustomEvent::new(42, vec![Arg::Int32(7), Arg::from("go")]);
        let frame = encode_packet(&event);
        let expected: Vec<u8> = [
            &[PacketType::CustomEvent as u8, 0][..],
            &42i32.to_le_bytes(),
            &2i32.to_le_bytes(),
            &[arg_code::INT32],
            &7i32.to_le_bytes(),
            &[arg_code::STRING],
            &2u32.to_le_bytes(),
            b"go",
        ]
        .concat();
        assert_eq!(frame, expected);
    }

    #[test]
    fn int16_is_widened_on_the_wire() {
        let frame = encode_packet(&CustomEvent::new(1, vec![Arg::Int16(-2)]));
        // tag, flags, hash, count, code, then four bytes of value
        assert_eq!(frame.len(), 1 + 1 + 4 + 4 + 1 + 4);
        assert_eq!(&frame[11..], &(-2i32).to_le_bytes());
    }

    #[test]
    fn wide_int16_value_is_rejected() {
        let mut frame = encode_packet(&CustomEvent::new(1, vec![Arg::Int16(0)]));
        frame[11..].copy_from_slice(&70_000i32.to_le_bytes());
        assert!(matches!(
            decode_packet::<CustomEvent>(&frame, &DecodeContext::default()),
            Err(DecodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unassigned_reserved_code_is_unexpected() {
        // 0x0a lies inside the reserved range but names no type.
        let mut w = WireWriter::new();
        w.write_u8(PacketType::CustomEvent as u8);
        w.write_u8(0);
        w.write_i32(9);
        w.write_i32(1);
        w.write_u8(0x0a);
        w.write_i32(0);
        let frame = w.into_bytes();

        let mut registry = ResolverRegistry::new();
        assert!(registry.register(0x0a, |_| Ok(())).is_err());
        registry.register_fixed(0x40, 4).unwrap();
        let ctx = DecodeContext::with_resolver(Arc::new(registry));
        assert_eq!(
            decode_packet::<CustomEvent>(&frame, &ctx),
            Err(DecodeError::UnexpectedType(0x0a))
        );
    }

    #[test]
    fn unresolved_extension_code_is_unexpected() {
        let event = CustomEvent::new(
            3,
            vec![Arg::Extension {
                tag: 0x40,
                raw: vec![1, 2, 3, 4],
            }],
        );
        let frame = encode_packet(&event);
        assert_eq!(
            decode_packet::<CustomEvent>(&frame, &DecodeContext::default()),
            Err(DecodeError::UnexpectedType(0x40))
        );

        let other = ResolverRegistry::new();
        let ctx = DecodeContext::with_resolver(Arc::new(other));
        assert_eq!(
            decode_packet::<CustomEvent>(&frame, &ctx),
            Err(DecodeError::UnexpectedType(0x40))
        );
    }

    #[test]
    fn extension_args_keep_their_bytes() {
        let mut registry = ResolverRegistry::new();
        registry.register_fixed(0x40, 4).unwrap();
        registry
            .register(0x41, |r| r.read_bytes().map(|_| ()))
            .unwrap();
        let ctx = DecodeContext::with_resolver(Arc::new(registry));

        let mut w = WireWriter::new();
        w.write_u8(PacketType::CustomEvent as u8);
        w.write_u8(CustomEventFlags::QUEUED.bits());
        w.write_i32(77);
        w.write_i32(3);
        w.write_u8(0x40);
        w.write_raw(&[9, 8, 7, 6]);
        w.write_u8(0x41);
        w.write_bytes(b"blob");
        w.write_u8(arg_code::BOOL);
        w.write_bool(false);
        let frame = w.into_bytes();

        let decoded = decode_packet::<CustomEvent>(&frame, &ctx).unwrap();
        assert!(decoded.is_queued());
        assert_eq!(
            decoded.args[0],
            Arg::Extension {
                tag: 0x40,
                raw: vec![9, 8, 7, 6]
            }
        );
        assert_eq!(decoded.args[2], Arg::Bool(false));
        assert_eq!(encode_packet(&decoded), frame);
    }

    #[test]
    fn truncated_arguments_fail() {
        let frame = encode_packet(&CustomEvent::new(5, vec![Arg::from("abcdef")]));
        for cut in 1..frame.len() {
            assert!(
                decode_packet::<CustomEvent>(&frame[..cut], &DecodeContext::default()).is_err(),
                "cut at {cut} decoded"
            );
        }
    }

    #[test]
    fn event_hash_is_stable() {
        assert_eq!(event_hash("coop.spawn"), event_hash("coop.spawn"));
        assert_ne!(event_hash("coop.spawn"), event_hash("coop.despawn"));
    }

    #[test]
    fn handlers_run_in_order_and_failures_are_contained() {
        let handlers = EventHandlers::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&calls);
        let hash = handlers.register("coop.ping", move |_, _| {
            first.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("first handler fails")
        });
        handlers.register_hash(hash, |_, _| panic!("second handler panics"));
        let third = Arc::clone(&calls);
        handlers.register_hash(hash, move |sender, event| {
            assert_eq!(sender, EventSender::Player(4));
            assert_eq!(event.args[0].as_i32(), Some(1));
            third.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });

        let ran = handlers.invoke(
            EventSender::Player(4),
            &CustomEvent::new(hash, vec![Arg::Int32(1)]),
        );
        assert_eq!(ran, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        assert_eq!(
            handlers.invoke(EventSender::Server, &CustomEvent::new(hash ^ 1, vec![])),
            0
        );
    }
}
