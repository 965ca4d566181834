//! Send-atoms: the wire-level mutation records carried in data packets
//! (SPEC_FULL.md §4.4).
//!
//! This module is deliberately data-only: verifying/reading/writing an atom
//! needs the schema (to know each variable's type), but *running* one
//! against a [`crate::world::World`] or reacting to it being acked is the
//! connection's job, not the atom's -- see `crate::protocol::peer`.

use crate::interface::Interface;
use crate::packet::Packet;
use crate::value::IrmoValue;
use crate::world::{ClassId, MethodId, ObjectId, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AtomKind {
	Null = 0,
	NewObject = 1,
	Change = 2,
	Destroy = 3,
	Method = 4,
	SendWindow = 5,
	SyncPoint = 6,
}

impl AtomKind {
	pub fn from_tag(tag: u8) -> Option<Self> {
		Some(match tag {
			0 => Self::Null,
			1 => Self::NewObject,
			2 => Self::Change,
			3 => Self::Destroy,
			4 => Self::Method,
			5 => Self::SendWindow,
			6 => Self::SyncPoint,
			_ => return None,
		})
	}

	pub fn tag(self) -> u8 {
		self as u8
	}
}

/// A single queued mutation. `Null` occupies a sequence slot left behind by
/// an atom that was coalesced away (SPEC_FULL.md §4.4, "Change-atom
/// coalescing" / "Destroy-atom coalescing").
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
	Null,
	NewObject {
		object_id: ObjectId,
		class_id: ClassId,
	},
	Change {
		class_id: ClassId,
		object_id: ObjectId,
		/// Values copied at enqueue time, never borrowed from the live
		/// object (SPEC_FULL.md §4.4, "Ownership of variable values").
		values: Vec<(VarId, IrmoValue)>,
	},
	Destroy {
		object_id: ObjectId,
	},
	Method {
		method_id: MethodId,
		source: ObjectId,
		args: Vec<IrmoValue>,
	},
	SendWindow {
		max_bytes: u16,
	},
	SyncPoint,
}

impl Atom {
	pub fn kind(&self) -> AtomKind {
		match self {
			Self::Null => AtomKind::Null,
			Self::NewObject { .. } => AtomKind::NewObject,
			Self::Change { .. } => AtomKind::Change,
			Self::Destroy { .. } => AtomKind::Destroy,
			Self::Method { .. } => AtomKind::Method,
			Self::SendWindow { .. } => AtomKind::SendWindow,
			Self::SyncPoint => AtomKind::SyncPoint,
		}
	}

	/// If this is a `Change` atom for `object_id`, clears `var`'s bit; if no
	/// bits remain this returns `true`, telling the caller to replace the
	/// atom with `Atom::Null` in place (coalescing, SPEC_FULL.md §4.4).
	pub(crate) fn clear_change_var(&mut self, var: VarId) -> bool {
		match self {
			Self::Change { values, .. } => {
				values.retain(|(v, _)| *v != var);
				values.is_empty()
			}
			_ => false,
		}
	}

	/// The object this atom concerns, if any (used to index the send
	/// queue's object-id hash for coalescing).
	pub(crate) fn object_id(&self) -> Option<ObjectId> {
		match self {
			Self::NewObject { object_id, .. }
			| Self::Change { object_id, .. }
			| Self::Destroy { object_id } => Some(*object_id),
			_ => None,
		}
	}
}

fn bitmap_len(nvars: usize) -> usize {
	nvars.div_ceil(8)
}

/// Writes `atom`'s payload to `packet`. `interface` resolves the variable
/// and argument types needed to encode `Change`'s bitmap and `Method`'s
/// arguments with the wire's declared type rather than a guess from the
/// value alone.
pub fn write(atom: &Atom, interface: &Interface, packet: &mut Packet) {
	match atom {
		Atom::Null => {}
		Atom::NewObject { object_id, class_id } => {
			packet.write_u16(*object_id);
			packet.write_u8(*class_id);
		}
		Atom::Change { class_id, object_id, values } => {
			packet.write_u8(*class_id);
			packet.write_u16(*object_id);
			let class = interface
				.class(*class_id)
				.expect("atom's class_id always resolves against its own interface");
			let nvars = class.num_variables();
			let mut bitmap = vec![0u8; bitmap_len(nvars)];
			for (var, _) in values {
				bitmap[*var as usize / 8] |= 1 << (*var as usize % 8);
			}
			for byte in &bitmap {
				packet.write_u8(*byte);
			}
			for (var, value) in values {
				let ty = class
					.variable(*var)
					.expect("changed var index always resolves")
					.ty();
				packet.write_value(ty, value);
			}
		}
		Atom::Destroy { object_id } => {
			packet.write_u16(*object_id);
		}
		Atom::Method { method_id, args, .. } => {
			packet.write_u8(*method_id);
			let method = interface
				.method(*method_id)
				.expect("atom's method_id always resolves against its own interface");
			for (arg, value) in method.arguments().iter().zip(args) {
				packet.write_value(arg.ty(), value);
			}
		}
		Atom::SendWindow { max_bytes } => {
			packet.write_u16(*max_bytes);
		}
		Atom::SyncPoint => {}
	}
}

/// Reads an atom of `kind` from `packet`, using `interface` to resolve
/// schema-dependent payloads (Change bitmaps, Method/Change value types).
pub fn read(kind: AtomKind, packet: &mut Packet, interface: &Interface) -> Option<Atom> {
	match kind {
		AtomKind::Null => Some(Atom::Null),
		AtomKind::NewObject => {
			let object_id = packet.read_u16()?;
			let class_id = packet.read_u8()?;
			Some(Atom::NewObject { object_id, class_id })
		}
		AtomKind::Change => {
			let class_id = packet.read_u8()?;
			let object_id = packet.read_u16()?;
			let class = interface.class(class_id)?;
			let nvars = class.num_variables();
			let bitmap_bytes = bitmap_len(nvars);
			let mut bitmap = Vec::with_capacity(bitmap_bytes);
			for _ in 0..bitmap_bytes {
				bitmap.push(packet.read_u8()?);
			}
			let mut values = Vec::new();
			for var in 0..nvars {
				if bitmap[var / 8] & (1 << (var % 8)) != 0 {
					let ty = class.variable(var as VarId)?.ty();
					let value = packet.read_value(ty)?;
					values.push((var as VarId, value));
				}
			}
			Some(Atom::Change { class_id, object_id, values })
		}
		AtomKind::Destroy => {
			let object_id = packet.read_u16()?;
			Some(Atom::Destroy { object_id })
		}
		AtomKind::Method => {
			let method_id = packet.read_u8()?;
			let method = interface.method(method_id)?;
			let mut args = Vec::with_capacity(method.num_arguments());
			for arg in method.arguments() {
				args.push(packet.read_value(arg.ty())?);
			}
			Some(Atom::Method { method_id, source: 0, args })
		}
		AtomKind::SendWindow => {
			let max_bytes = packet.read_u16()?;
			Some(Atom::SendWindow { max_bytes })
		}
		AtomKind::SyncPoint => Some(Atom::SyncPoint),
	}
}

/// Verifies (without consuming on success/failure distinction, but the
/// packet's read cursor *does* advance -- callers that need a dry run use
/// `Packet::verify_value` semantics by cloning the packet position
/// themselves) that `kind`'s payload is well-formed.
pub fn verify(kind: AtomKind, packet: &mut Packet, interface: &Interface) -> bool {
	read(kind, packet, interface).is_some()
}

/// Encoded length in bytes of `atom` once written with [`write`], given the
/// same `interface` that would be passed to it.
pub fn length(atom: &Atom, interface: &Interface) -> usize {
	match atom {
		Atom::Null => 0,
		Atom::NewObject { .. } => 2 + 1,
		Atom::Change { class_id, values, .. } => {
			let class = interface.class(*class_id).expect("valid class_id");
			let mut len = 1 + 2 + bitmap_len(class.num_variables());
			for (var, value) in values {
				let ty = class.variable(*var).expect("valid var id").ty();
				len += value_len(value, ty);
			}
			len
		}
		Atom::Destroy { .. } => 2,
		Atom::Method { method_id, args, .. } => {
			let method = interface.method(*method_id).expect("valid method_id");
			1 + method
				.arguments()
				.iter()
				.zip(args)
				.map(|(arg, value)| value_len(value, arg.ty()))
				.sum::<usize>()
		}
		Atom::SendWindow { .. } => 2,
		Atom::SyncPoint => 0,
	}
}

fn value_len(value: &IrmoValue, ty: crate::value::ValueType) -> usize {
	use crate::value::ValueType;
	match (value, ty) {
		(IrmoValue::Int(_), ValueType::Int8) => 1,
		(IrmoValue::Int(_), ValueType::Int16) => 2,
		(IrmoValue::String(s), _) => s.len() + 1,
		(IrmoValue::Int(_), _) => 4,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::ValueType;

	fn sample_interface() -> Interface {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_variable("Player", "x", ValueType::Int16).unwrap();
		iface.new_variable("Player", "name", ValueType::String).unwrap();
		iface.new_method("Shout").unwrap();
		iface.new_argument("Shout", "msg", ValueType::String).unwrap();
		iface
	}

	#[test]
	fn new_object_round_trip() {
		let iface = sample_interface();
		let atom = Atom::NewObject { object_id: 7, class_id: 0 };
		let mut p = Packet::new();
		write(&atom, &iface, &mut p);
		let mut p = Packet::from_bytes(p.as_bytes());
		assert_eq!(read(AtomKind::NewObject, &mut p, &iface), Some(atom));
	}

	#[test]
	fn change_round_trip_with_bitmap() {
		let iface = sample_interface();
		let values = vec![(1u8, IrmoValue::String("hi".into()))];
		let atom = Atom::Change { class_id: 0, object_id: 3, values };
		let mut p = Packet::new();
		write(&atom, &iface, &mut p);
		let mut p = Packet::from_bytes(p.as_bytes());
		let read_atom = read(AtomKind::Change, &mut p, &iface).unwrap();
		assert_eq!(read_atom, atom);
	}

	#[test]
	fn method_round_trip() {
		let iface = sample_interface();
		let atom = Atom::Method {
			method_id: 0,
			source: 0,
			args: vec![IrmoValue::String("hello".into())],
		};
		let mut p = Packet::new();
		write(&atom, &iface, &mut p);
		let mut p = Packet::from_bytes(p.as_bytes());
		assert_eq!(read(AtomKind::Method, &mut p, &iface), Some(atom));
	}
}
