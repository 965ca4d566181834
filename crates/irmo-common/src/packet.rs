//! Length-checked serialization of the primitive wire types into a growable
//! byte buffer.
//!
//! Unlike the teacher's [`Framed`](crate) JSON-over-length-prefix codec,
//! Irmo's wire format is a dense, hand-rolled binary encoding: every
//! multi-byte integer is big-endian, strings are NUL-terminated, and reads
//! never panic or over-read — a short buffer just fails the read and the
//! caller drops the packet (see SPEC_FULL.md §7, protocol errors).

use crate::value::{IrmoValue, ValueType};
use bytes::{BufMut, BytesMut};

/// A packet buffer used for both writing (building an outgoing packet) and
/// reading (parsing a received one). The same `pos` field is reused as
/// write-cursor and read-cursor; a packet is written once, then read once.
#[derive(Debug, Clone)]
pub struct Packet {
	buf: BytesMut,
	pos: usize,
	/// `true` if `buf` was borrowed from caller-owned bytes via
	/// [`Packet::from_bytes`]; such packets must not be written to.
	readonly: bool,
}

impl Default for Packet {
	fn default() -> Self {
		Self::new()
	}
}

impl Packet {
	/// A new, empty, writable packet.
	pub fn new() -> Self {
		Self {
			buf: BytesMut::new(),
			pos: 0,
			readonly: false,
		}
	}

	/// Wraps already-received bytes for parsing. The packet may be read from
	/// but never written to.
	pub fn from_bytes(data: &[u8]) -> Self {
		Self {
			buf: BytesMut::from(data),
			pos: 0,
			readonly: true,
		}
	}

    pub fn as_bytes(&self) -> &[u8] {
		&self.buf
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Resets the read cursor to the start, e.g. to re-parse a packet from
	/// scratch after a `verify_value` dry run.
	pub fn rewind(&mut self) {
		self.pos = 0;
	}

	pub fn remaining(&self) -> usize {
		self.buf.len().saturating_sub(self.pos)
	}

	fn assert_writable(&self) {
		debug_assert!(!self.readonly, "attempted to write to a read-only packet");
	}

	pub fn write_u8(&mut self, v: u8) {
		self.assert_writable();
		self.buf.put_u8(v);
	}

	pub fn write_u16(&mut self, v: u16) {
		self.assert_writable();
		self.buf.put_u16(v);
	}

	pub fn write_u32(&mut self, v: u32) {
		self.assert_writable();
		self.buf.put_u32(v);
	}

	pub fn write_string(&mut self, s: &str) {
		self.assert_writable();
		self.buf.put_slice(s.as_bytes());
		self.buf.put_u8(0);
	}

	pub fn read_u8(&mut self) -> Option<u8> {
		if self.remaining() < 1 {
			return None;
		}
		let v = self.buf[self.pos];
		self.pos += 1;
		Some(v)
	}

	pub fn read_u16(&mut self) -> Option<u16> {
		if self.remaining() < 2 {
			return None;
		}
		let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
		self.pos += 2;
		Some(v)
	}

	pub fn read_u32(&mut self) -> Option<u32> {
		if self.remaining() < 4 {
			return None;
		}
		let v = u32::from_be_bytes([
			self.buf[self.pos],
			self.buf[self.pos + 1],
			self.buf[self.pos + 2],
			self.buf[self.pos + 3],
		]);
		self.pos += 4;
		Some(v)
	}

	/// Reads a NUL-terminated string. Fails if no NUL byte is found before
	/// the end of the buffer; never reads past it.
	pub fn read_string(&mut self) -> Option<String> {
		let start = self.pos;
		let nul_offset = self.buf[start..].iter().position(|&b| b == 0)?;
		let s = std::str::from_utf8(&self.buf[start..start + nul_offset])
			.ok()?
			.to_owned();
		self.pos = start + nul_offset + 1;
		Some(s)
	}

	/// Checks that a value of `ty` can be read without actually consuming or
	/// returning it. Used by the protocol engine to validate an atom's
	/// payload before committing to parsing it.
	pub fn verify_value(&mut self, ty: ValueType) -> bool {
		let saved = self.pos;
		let ok = self.read_value(ty).is_some();
		self.pos = saved;
		ok
	}

	pub fn read_value(&mut self, ty: ValueType) -> Option<IrmoValue> {
		match ty {
			ValueType::Unknown => None,
			ValueType::Int8 => self.read_u8().map(|v| IrmoValue::Int(v as u32)),
			ValueType::Int16 => self.read_u16().map(|v| IrmoValue::Int(v as u32)),
			ValueType::Int32 => self.read_u32().map(IrmoValue::Int),
			ValueType::String => self.read_string().map(IrmoValue::String),
		}
	}

	pub fn write_value(&mut self, ty: ValueType, value: &IrmoValue) {
		match (ty, value) {
			(ValueType::Int8, IrmoValue::Int(v)) => self.write_u8(*v as u8),
			(ValueType::Int16, IrmoValue::Int(v)) => self.write_u16(*v as u16),
			(ValueType::Int32, IrmoValue::Int(v)) => self.write_u32(*v),
			(ValueType::String, IrmoValue::String(s)) => self.write_string(s),
			_ => debug_assert!(false, "value/type mismatch writing packet"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip_primitives() {
		let mut p = Packet::new();
		p.write_u8(0x12);
		p.write_u16(0x3456);
		p.write_u32(0x789a_bcde);
		p.write_string("hello");

		let expected_len = 1 + 2 + 4 + "hello".len() + 1;
		assert_eq!(p.len(), expected_len);

		let mut p = Packet::from_bytes(p.as_bytes());
		assert_eq!(p.read_u8(), Some(0x12));
		assert_eq!(p.read_u16(), Some(0x3456));
		assert_eq!(p.read_u32(), Some(0x789a_bcde));
		assert_eq!(p.read_string(), Some("hello".to_owned()));
	}

	#[test]
	fn short_reads_fail_without_panicking() {
		let mut p = Packet::from_bytes(&[0x01]);
		assert_eq!(p.read_u16(), None);
		assert_eq!(p.read_u8(), Some(0x01));
	}

	#[test]
	fn string_without_terminator_fails() {
		let mut p = Packet::from_bytes(b"no-nul-here");
		assert_eq!(p.read_string(), None);
	}

	#[test]
	fn value_round_trip_by_type() {
		for (ty, value) in [
			(ValueType::Int8, IrmoValue::Int(200)),
			(ValueType::Int16, IrmoValue::Int(40_000)),
			(ValueType::Int32, IrmoValue::Int(3_000_000_000)),
			(ValueType::String, IrmoValue::String("irmo".to_owned())),
		] {
			let mut p = Packet::new();
			p.write_value(ty, &value);
			let mut p = Packet::from_bytes(p.as_bytes());
			assert!(p.verify_value(ty));
			assert_eq!(p.read_value(ty), Some(value));
		}
	}
}
