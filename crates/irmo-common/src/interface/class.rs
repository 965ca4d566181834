use std::collections::HashMap;

use crate::error::SchemaError;
use crate::value::ValueType;

use super::hash::{rotate_left_1, string_hash};
use super::var::ClassVar;

/// A class declared on an interface.
///
/// `vars` is the *dense* variable array: when a class is created with a
/// parent, the parent's variables are copied in verbatim (same name, type
/// and id, `declared_in` pointing back at the ancestor that introduced them)
/// before any of the class's own variables are appended. This mirrors the
/// original's single-inheritance layout, where a subclass object's variable
/// array is laid out identically to its parent's for the inherited prefix.
#[derive(Debug, Clone)]
pub struct Class {
	pub(crate) name: String,
	pub(crate) id: u8,
	pub(crate) parent: Option<u8>,
	pub(crate) vars: Vec<ClassVar>,
	var_by_name: HashMap<String, u8>,
}

impl Class {
	pub(crate) fn new(name: String, id: u8, parent: Option<(u8, &Class)>) -> Self {
		let mut vars = Vec::new();
		let mut var_by_name = HashMap::new();
		if let Some((_, parent_class)) = parent {
			for v in &parent_class.vars {
				var_by_name.insert(v.name.clone(), v.id);
				vars.push(v.clone());
			}
		}
		Self {
			name,
			id,
			parent: parent.map(|(idx, _)| idx),
			vars,
			var_by_name,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn id(&self) -> u8 {
		self.id
	}

	pub fn parent(&self) -> Option<u8> {
		self.parent
	}

	pub fn num_variables(&self) -> usize {
		self.vars.len()
	}

	pub fn variables(&self) -> &[ClassVar] {
		&self.vars
	}

	pub fn variable(&self, id: u8) -> Option<&ClassVar> {
		self.vars.get(id as usize)
	}

	pub fn variable_by_name(&self, name: &str) -> Option<&ClassVar> {
		self.var_by_name.get(name).map(|&id| &self.vars[id as usize])
	}

	/// True if `self` is `other`, or descends from it through the parent
	/// chain. Callers must supply a lookup function since a `Class` only
	/// knows its own parent's id, not the full interface.
	pub fn is_a(&self, other_id: u8, lookup: impl Fn(u8) -> Option<u8>) -> bool {
		let mut current = self.id;
		loop {
			if current == other_id {
				return true;
			}
			match lookup(current) {
				Some(parent) => current = parent,
				None => return false,
			}
		}
	}

	pub(crate) fn new_variable(
		&mut self,
		name: &str,
		ty: ValueType,
	) -> Result<u8, SchemaError> {
		if self.var_by_name.contains_key(name) {
			return Err(SchemaError::DuplicateVariable(name.to_owned()));
		}
		if self.vars.len() >= 256 {
			return Err(SchemaError::TooManyVariables(self.name.clone()));
		}
		let id = self.vars.len() as u8;
		self.vars.push(ClassVar {
			name: name.to_owned(),
			ty,
			id,
			declared_in: self.id,
		});
		self.var_by_name.insert(name.to_owned(), id);
		Ok(id)
	}

	/// Structural hash, folded over the *entire* variable array (inherited
	/// prefix included) in index order, then mixed with the class's own name
	/// and, if it has a parent, the parent's index.
	pub(crate) fn hash(&self) -> u32 {
		let mut hash: u32 = 0;
		for var in &self.vars {
			hash = rotate_left_1(hash) ^ var.hash();
		}
		hash ^= string_hash(&self.name);
		if let Some(parent) = self.parent {
			hash = rotate_left_1(hash) ^ parent as u32;
		}
		hash
	}
}
