//! The schema model: classes (with single inheritance), variables and
//! methods, and the structural hash used to confirm two peers agree on a
//! schema before a connection is allowed to proceed (SPEC_FULL.md §3).

mod blob;
mod class;
mod hash;
mod method;
mod var;

pub use class::Class;
pub use method::{Method, MethodArg};
pub use var::ClassVar;

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::value::ValueType;

use hash::rotate_left_1;

/// A complete schema: a fixed set of classes and methods, identified to
/// peers by its structural [`Interface::hash`] rather than by name or
/// version number.
#[derive(Debug, Clone, Default)]
pub struct Interface {
	classes: Vec<Class>,
	class_by_name: HashMap<String, u8>,
	methods: Vec<Method>,
	method_by_name: HashMap<String, u8>,
}

impl Interface {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn num_classes(&self) -> usize {
		self.classes.len()
	}

	pub fn classes(&self) -> &[Class] {
		&self.classes
	}

	pub fn class(&self, id: u8) -> Option<&Class> {
		self.classes.get(id as usize)
	}

	pub fn class_by_name(&self, name: &str) -> Option<&Class> {
		self.class_by_name.get(name).map(|&id| &self.classes[id as usize])
	}

	pub fn num_methods(&self) -> usize {
		self.methods.len()
	}

	pub fn methods(&self) -> &[Method] {
		&self.methods
	}

	pub fn method(&self, id: u8) -> Option<&Method> {
		self.methods.get(id as usize)
	}

	pub fn method_by_name(&self, name: &str) -> Option<&Method> {
		self.method_by_name.get(name).map(|&id| &self.methods[id as usize])
	}

	/// Declares a new class, optionally inheriting from an existing one by
	/// name. The parent's variables are copied into the new class verbatim
	/// (see [`Class::new`]).
	pub fn new_class(&mut self, name: &str, parent: Option<&str>) -> Result<u8, SchemaError> {
		if self.class_by_name.contains_key(name) {
			return Err(SchemaError::DuplicateName(name.to_owned()));
		}
		if self.classes.len() >= 256 {
			return Err(SchemaError::TooManyClasses);
		}
		let parent_pair = match parent {
			Some(parent_name) => {
				let parent_id = *self
					.class_by_name
					.get(parent_name)
					.ok_or_else(|| SchemaError::UnknownParent(parent_name.to_owned()))?;
				Some((parent_id, &self.classes[parent_id as usize]))
			}
			None => None,
		};
		let id = self.classes.len() as u8;
		let class = Class::new(name.to_owned(), id, parent_pair);
		self.classes.push(class);
		self.class_by_name.insert(name.to_owned(), id);
		Ok(id)
	}

	pub fn new_variable(
		&mut self,
		class_name: &str,
		var_name: &str,
		ty: ValueType,
	) -> Result<u8, SchemaError> {
		let id = *self
			.class_by_name
			.get(class_name)
			.ok_or_else(|| SchemaError::UnknownClass(class_name.to_owned()))?;
		self.classes[id as usize].new_variable(var_name, ty)
	}

	pub fn new_method(&mut self, name: &str) -> Result<u8, SchemaError> {
		if self.method_by_name.contains_key(name) {
			return Err(SchemaError::DuplicateName(name.to_owned()));
		}
		if self.methods.len() >= 256 {
			return Err(SchemaError::TooManyMethods);
		}
		let id = self.methods.len() as u8;
		self.methods.push(Method::new(name.to_owned(), id));
		self.method_by_name.insert(name.to_owned(), id);
		Ok(id)
	}

	pub fn new_argument(
		&mut self,
		method_name: &str,
		arg_name: &str,
		ty: ValueType,
	) -> Result<u8, SchemaError> {
		let id = *self
			.method_by_name
			.get(method_name)
			.ok_or_else(|| SchemaError::UnknownMethod(method_name.to_owned()))?;
		self.methods[id as usize].new_argument(arg_name, ty)
	}

	/// True if the class `class_id` is, or inherits from (directly or
	/// transitively), the class `ancestor_id`.
	pub fn is_a(&self, class_id: u8, ancestor_id: u8) -> bool {
		match self.classes.get(class_id as usize) {
			Some(class) => class.is_a(ancestor_id, |id| {
				self.classes.get(id as usize).and_then(|c| c.parent)
			}),
			None => false,
		}
	}

	/// The structural hash identifying this schema to a peer. Folded over
	/// classes then methods in declaration order; `0` is reserved to mean "no
	/// schema loaded" so a genuine zero hash is mapped to `1`.
	pub fn hash(&self) -> u32 {
		let mut hash: u32 = 0;
		for class in &self.classes {
			hash = rotate_left_1(hash) ^ class.hash();
		}
		for method in &self.methods {
			hash = rotate_left_1(hash) ^ method.hash();
		}
		if hash == 0 {
			1
		} else {
			hash
		}
	}

	pub fn dump(&self) -> Vec<u8> {
		blob::dump(self)
	}

	pub fn load(data: &[u8]) -> Result<Self, SchemaError> {
		blob::load(data)
	}
}
