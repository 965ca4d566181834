//! [`IrmoValue`], the tagged union that every variable and method argument
//! value is carried in.

use std::fmt;

/// One of the four wire types a [`IrmoValue`] can hold.
///
/// Declaration order is the wire encoding (see SPEC_FULL.md §6): `Unknown` is
/// never valid on the wire and exists only as the zero discriminant so a
/// corrupt tag byte fails loudly rather than aliasing a real type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ValueType {
	Unknown = 0,
	Int8 = 1,
	Int16 = 2,
	Int32 = 3,
	String = 4,
}

impl ValueType {
	pub fn from_tag(tag: u8) -> Option<Self> {
		Some(match tag {
			0 => Self::Unknown,
			1 => Self::Int8,
			2 => Self::Int16,
			3 => Self::Int32,
			4 => Self::String,
			_ => return None,
		})
	}

	pub fn tag(self) -> u8 {
		self as u8
	}

	/// Maximum value an integer variable of this type may hold, or `None` for
	/// `String` (no range check applies).
	pub fn int_max(self) -> Option<u32> {
		match self {
			Self::Int8 => Some(0xff),
			Self::Int16 => Some(0xffff),
			Self::Int32 => Some(u32::MAX),
			Self::String | Self::Unknown => None,
		}
	}

	pub fn is_string(self) -> bool {
		matches!(self, Self::String)
	}
}

impl fmt::Display for ValueType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Unknown => "unknown",
			Self::Int8 => "int8",
			Self::Int16 => "int16",
			Self::Int32 => "int32",
			Self::String => "string",
		};
		f.write_str(s)
	}
}

/// A value held by a class variable or method argument.
///
/// Which variant is valid for a given slot is dictated entirely by the
/// schema's declared [`ValueType`] for that slot; this is never
/// self-describing on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IrmoValue {
	#[default]
	Int(u32),
	String(String),
}

impl IrmoValue {
	/// Default value for a freshly created variable of `ty`: `0` for
	/// integers, `""` for strings (never absent/null, per the data model
	/// invariant that a string variable is never null).
	pub fn default_for(ty: ValueType) -> Self {
		if ty.is_string() {
			Self::String(String::new())
		} else {
			Self::Int(0)
		}
	}

	pub fn as_int(&self) -> Option<u32> {
		match self {
			Self::Int(i) => Some(*i),
			Self::String(_) => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s.as_str()),
			Self::Int(_) => None,
		}
	}

	pub fn matches_type(&self, ty: ValueType) -> bool {
		match self {
			Self::Int(_) => !ty.is_string() && ty != ValueType::Unknown,
			Self::String(_) => ty.is_string(),
		}
	}
}

impl From<u32> for IrmoValue {
	fn from(i: u32) -> Self {
		Self::Int(i)
	}
}

impl From<String> for IrmoValue {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

impl From<&str> for IrmoValue {
	fn from(s: &str) -> Self {
		Self::String(s.to_owned())
	}
}
