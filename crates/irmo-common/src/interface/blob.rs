//! Binary schema blob format: `Interface::dump`/`Interface::load`.
//!
//! Signature `b"Irmo Interface Blob\0"`, u32 version (currently `1`), then
//! class records, method records, and a trailing u32 structural hash used as
//! a self-check against corruption (SPEC_FULL.md §6, "Schema blob").

use crate::error::SchemaError;
use crate::packet::Packet;
use crate::value::ValueType;

use super::Interface;

const SIGNATURE: &[u8] = b"Irmo Interface Blob\0";
const VERSION: u32 = 1;

pub(super) fn dump(iface: &Interface) -> Vec<u8> {
	let mut p = Packet::new();
	for &b in SIGNATURE {
		p.write_u8(b);
	}
	p.write_u32(VERSION);

	p.write_u8(iface.classes.len() as u8);
	for class in &iface.classes {
		p.write_string(&class.name);
		match class.parent {
			Some(parent_id) => {
				p.write_u8(1);
				p.write_string(&iface.classes[parent_id as usize].name);
			}
			None => p.write_u8(0),
		}
		// Only the variables this class declared itself, not the inherited
		// prefix copied in from its parent -- the loader reconstructs the
		// inherited prefix by re-running new_class/new_variable in order.
		let own_vars: Vec<_> = class
			.vars
			.iter()
			.filter(|v| v.declared_in == class.id)
			.collect();
		p.write_u8(own_vars.len() as u8);
		for var in own_vars {
			p.write_string(&var.name);
			p.write_u8(var.ty.tag());
		}
	}

	p.write_u8(iface.methods.len() as u8);
	for method in &iface.methods {
		p.write_string(&method.name);
		p.write_u8(method.args.len() as u8);
		for arg in &method.args {
			p.write_string(&arg.name);
			p.write_u8(arg.ty.tag());
		}
	}

	p.write_u32(iface.hash());
	p.as_bytes().to_vec()
}

pub(super) fn load(data: &[u8]) -> Result<Interface, SchemaError> {
	let mut p = Packet::from_bytes(data);

	for &expected in SIGNATURE {
		if p.read_u8() != Some(expected) {
			return Err(SchemaError::BadSignature);
		}
	}
	let version = p.read_u32().ok_or(SchemaError::Truncated)?;
	if version != VERSION {
		return Err(SchemaError::BadVersion(version));
	}

	let mut iface = Interface::new();

	let num_classes = p.read_u8().ok_or(SchemaError::Truncated)?;
	for _ in 0..num_classes {
		let name = p.read_string().ok_or(SchemaError::Truncated)?;
		let has_parent = p.read_u8().ok_or(SchemaError::Truncated)?;
		let parent = if has_parent != 0 {
			Some(p.read_string().ok_or(SchemaError::Truncated)?)
		} else {
			None
		};
		iface.new_class(&name, parent.as_deref())?;

		let num_vars = p.read_u8().ok_or(SchemaError::Truncated)?;
		for _ in 0..num_vars {
			let var_name = p.read_string().ok_or(SchemaError::Truncated)?;
			let tag = p.read_u8().ok_or(SchemaError::Truncated)?;
			let ty = ValueType::from_tag(tag).ok_or(SchemaError::UnknownType(tag))?;
			iface.new_variable(&name, &var_name, ty)?;
		}
	}

	let num_methods = p.read_u8().ok_or(SchemaError::Truncated)?;
	for _ in 0..num_methods {
		let name = p.read_string().ok_or(SchemaError::Truncated)?;
		iface.new_method(&name)?;

		let num_args = p.read_u8().ok_or(SchemaError::Truncated)?;
		for _ in 0..num_args {
			let arg_name = p.read_string().ok_or(SchemaError::Truncated)?;
			let tag = p.read_u8().ok_or(SchemaError::Truncated)?;
			let ty = ValueType::from_tag(tag).ok_or(SchemaError::UnknownType(tag))?;
			iface.new_argument(&name, &arg_name, ty)?;
		}
	}

	let expected_hash = p.read_u32().ok_or(SchemaError::Truncated)?;
	if iface.hash() != expected_hash {
		return Err(SchemaError::HashMismatch);
	}

	Ok(iface)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::ValueType;

	fn sample_interface() -> Interface {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_variable("Player", "x", ValueType::Int16).unwrap();
		iface.new_variable("Player", "y", ValueType::Int16).unwrap();
		iface
			.new_variable("Player", "name", ValueType::String)
			.unwrap();
		iface.new_class("Ghost", Some("Player")).unwrap();
		iface
			.new_variable("Ghost", "alpha", ValueType::Int8)
			.unwrap();
		iface.new_method("Shout").unwrap();
		iface
			.new_argument("Shout", "message", ValueType::String)
			.unwrap();
		iface
	}

	#[test]
	fn round_trips() {
		let iface = sample_interface();
		let blob = dump(&iface);
		let loaded = load(&blob).unwrap();
		assert_eq!(loaded.hash(), iface.hash());
		assert_eq!(loaded.num_classes(), iface.num_classes());
		assert_eq!(
			loaded.class_by_name("Ghost").unwrap().num_variables(),
			iface.class_by_name("Ghost").unwrap().num_variables()
		);
	}

	#[test]
	fn rejects_bad_signature() {
		let mut blob = dump(&sample_interface());
		blob[0] = b'X';
		assert!(matches!(load(&blob), Err(SchemaError::BadSignature)));
	}

	#[test]
	fn rejects_truncated_blob() {
		assert!(matches!(load(&[]), Err(SchemaError::BadSignature)));
	}

	#[test]
	fn rejects_corrupted_hash() {
		let mut blob = dump(&sample_interface());
		let last = blob.len() - 1;
		blob[last] ^= 0xff;
		assert!(matches!(load(&blob), Err(SchemaError::HashMismatch)));
	}
}
