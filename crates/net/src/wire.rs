//! Primitive field encoding shared by every packet.
//!
//! Numbers are little-endian and fixed width. Strings and byte arrays carry
//! a `u32` length prefix. Vectors and quaternions are sequences of `f32`
//! components (`x, y, z[, w]`).

use crate::error::DecodeError;
use coopsync_core::{Quat, Vec2, Vec3};

/// Append-only buffer for outgoing fields.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append bytes verbatim, without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a bool as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Write a `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write an `i16`.
    pub fn write_i16(&mut self, value: i16) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write an `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write an `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Write a length-prefixed byte array.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_raw(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a collection count.
    pub fn write_count(&mut self, count: usize) {
        self.write_i32(count as i32);
    }

    /// Write a 2D vector.
    pub fn write_vec2(&mut self, value: Vec2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    /// Write a 3D vector.
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Write a quaternion as `x, y, z, w`.
    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }
}

/// Bounded cursor over one inbound message.
///
/// Every read is checked against the bytes that remain; nothing reads past
/// the end of the message.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the message.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Everything not yet consumed, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Bytes consumed since `start`, an earlier [`position`](Self::position).
    pub fn slice_since(&self, start: usize) -> &'a [u8] {
        &self.data[start.min(self.pos)..self.pos]
    }

    /// Consume exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a bool. Only `0` and `1` are accepted.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::OutOfRange {
                field: "bool",
                value: i64::from(other),
            }),
        }
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read an `i16`.
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read an `i64`.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Read a `u64`.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read an `f32`.
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Read a length-prefixed byte array.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read a collection count whose entries occupy at least `min_entry_len`
    /// bytes each.
    ///
    /// Counts that are negative or that could not possibly fit in the rest
    /// of the message are rejected before anything is allocated.
    pub fn read_count(&mut self, min_entry_len: usize) -> Result<usize, DecodeError> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(DecodeError::BadLength(i64::from(count)));
        }
        let count = count as usize;
        if count.saturating_mul(min_entry_len.max(1)) > self.remaining() {
            return Err(DecodeError::BadLength(count as i64));
        }
        Ok(count)
    }

    /// Read a 2D vector.
    pub fn read_vec2(&mut self) -> Result<Vec2, DecodeError> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    /// Read a 3D vector.
    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    /// Read a quaternion stored as `x, y, z, w`.
    pub fn read_quat(&mut self) -> Result<Quat, DecodeError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(Quat::from_xyzw(x, y, z, w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_little_endian() {
        let mut w = WireWriter::new();
        w.write_i32(1);
        w.write_u16(0x0203);
        assert_eq!(w.as_bytes(), &[1, 0, 0, 0, 0x03, 0x02]);
    }

    #[test]
    fn strings_carry_u32_length() {
        let mut w = WireWriter::new();
        w.write_str("go");
        assert_eq!(w.as_bytes(), &[2, 0, 0, 0, b'g', b'o']);

        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "go");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn reads_past_end_are_truncation_errors() {
        let mut r = WireReader::new(&[1, 2, 3]);
        assert_eq!(
            r.read_i32(),
            Err(DecodeError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut r = WireReader::new(&[0xff, 0xff, 0xff, 0x7f, 1]);
        assert!(matches!(
            r.read_bytes(),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn impossible_counts_are_rejected() {
        let mut w = WireWriter::new();
        w.write_i32(-1);
        let bytes = w.into_bytes();
        assert_eq!(
            WireReader::new(&bytes).read_count(1),
            Err(DecodeError::BadLength(-1))
        );

        let mut w = WireWriter::new();
        w.write_i32(1000);
        w.write_raw(&[0; 8]);
        let bytes = w.into_bytes();
        assert_eq!(
            WireReader::new(&bytes).read_count(4),
            Err(DecodeError::BadLength(1000))
        );
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut w = WireWriter::new();
        w.write_bytes(&[0xc3, 0x28]);
        let bytes = w.into_bytes();
        assert_eq!(
            WireReader::new(&bytes).read_string(),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn bool_accepts_only_zero_and_one() {
        assert_eq!(WireReader::new(&[1]).read_bool(), Ok(true));
        assert!(WireReader::new(&[2]).read_bool().is_err());
    }

    #[test]
    fn slice_since_tracks_consumed_bytes() {
        let data = [9, 1, 0, 0, 0, 7];
        let mut r = WireReader::new(&data);
        r.read_u8().unwrap();
        let start = r.position();
        r.read_i32().unwrap();
        assert_eq!(r.slice_since(start), &[1, 0, 0, 0]);
    }

    #[test]
    fn vectors_and_quaternions() {
        let mut w = WireWriter::new();
        w.write_vec3(Vec3::new(1.0, -2.5, 3.0));
        w.write_quat(Quat::from_xyzw(0.0, 0.0, 0.7071, 0.7071));
        w.write_vec2(Vec2::new(4.0, 5.0));
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 12 + 16 + 8);

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, -2.5, 3.0));
        let q = r.read_quat().unwrap();
        assert_eq!((q.x, q.y, q.z, q.w), (0.0, 0.0, 0.7071, 0.7071));
        assert_eq!(r.read_vec2().unwrap(), Vec2::new(4.0, 5.0));
    }
}
