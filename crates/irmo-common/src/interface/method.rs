use std::collections::HashMap;

use crate::error::SchemaError;
use crate::value::ValueType;

use super::hash::{rotate_left_1, string_hash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodArg {
	pub(crate) name: String,
	pub(crate) ty: ValueType,
	pub(crate) id: u8,
}

impl MethodArg {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn ty(&self) -> ValueType {
		self.ty
	}

	pub fn id(&self) -> u8 {
		self.id
	}

	pub(crate) fn hash(&self) -> u32 {
		self.ty.tag() as u32 ^ string_hash(&self.name)
	}
}

/// A method (RPC) declared on an interface. Method ids and argument ids are
/// flat, like class ids and variable ids; methods have no inheritance.
#[derive(Debug, Clone)]
pub struct Method {
	pub(crate) name: String,
	pub(crate) id: u8,
	pub(crate) args: Vec<MethodArg>,
	arg_by_name: HashMap<String, u8>,
}

impl Method {
	pub(crate) fn new(name: String, id: u8) -> Self {
		Self {
			name,
			id,
			args: Vec::new(),
			arg_by_name: HashMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn id(&self) -> u8 {
		self.id
	}

	pub fn num_arguments(&self) -> usize {
		self.args.len()
	}

	pub fn arguments(&self) -> &[MethodArg] {
		&self.args
	}

	pub fn argument(&self, id: u8) -> Option<&MethodArg> {
		self.args.get(id as usize)
	}

	pub fn argument_by_name(&self, name: &str) -> Option<&MethodArg> {
		self.arg_by_name.get(name).map(|&id| &self.args[id as usize])
	}

	pub(crate) fn new_argument(
		&mut self,
		name: &str,
		ty: ValueType,
	) -> Result<u8, SchemaError> {
		if self.arg_by_name.contains_key(name) {
			return Err(SchemaError::DuplicateVariable(name.to_owned()));
		}
		if self.args.len() >= 256 {
			return Err(SchemaError::TooManyArguments(self.name.clone()));
		}
		let id = self.args.len() as u8;
		self.args.push(MethodArg {
			name: name.to_owned(),
			ty,
			id,
		});
		self.arg_by_name.insert(name.to_owned(), id);
		Ok(id)
	}

	pub(crate) fn hash(&self) -> u32 {
		let mut hash: u32 = 0;
		for arg in &self.args {
			hash = rotate_left_1(hash) ^ arg.hash();
		}
		hash ^ string_hash(&self.name)
	}
}
