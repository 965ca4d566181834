use std::any::Any;

use crate::interface::Class;
use crate::value::IrmoValue;

use super::callback::CallbackList;
use super::{ClassId, ObjectId, VarId};

/// A user-supplied mirror type an [`Object`] can be bound to (SPEC_FULL.md
/// §4.3.1). `pull` reports the binding's current value for each variable it
/// wants to drive; `Object::update` diffs these against the live object and
/// only applies (and only fires watches/enqueues atoms for) variables that
/// actually changed.
pub trait BoundStruct {
	fn pull(&self, push: &mut dyn FnMut(VarId, IrmoValue));
}

pub(crate) type VarCallback = Box<dyn FnMut(&Object, VarId, &IrmoValue)>;
pub(crate) type ObjectCallback = Box<dyn FnMut(&Object)>;

/// The per-object watch lists: one list per variable index the object has
/// ever had a specific watcher registered on, plus an any-variable and a
/// destroy list.
///
/// Kept on [`super::World`] rather than on `Object` itself (keyed by
/// [`ObjectId`]), even though conceptually these watches belong to the
/// object: callbacks take `&Object`, and a callback list living *inside*
/// the object it watches would need to be mutably borrowed (to iterate) at
/// the same time as the object is immutably borrowed (to hand to the
/// callback) -- two overlapping borrows of the same value. Storing them as
/// a sibling map makes the two borrows disjoint.
#[derive(Default)]
pub(crate) struct ObjectCallbacks {
	pub(crate) variable: Vec<CallbackList<VarCallback>>,
	pub(crate) any_variable: CallbackList<VarCallback>,
	pub(crate) destroy: CallbackList<ObjectCallback>,
}

impl ObjectCallbacks {
	pub(crate) fn with_vars(nvars: usize) -> Self {
		let mut c = Self::default();
		c.variable.resize_with(nvars, CallbackList::new);
		c
	}
}

/// A single networked entity: a class, an id, and its variable array.
pub struct Object {
	pub(crate) id: ObjectId,
	pub(crate) class_id: ClassId,
	pub(crate) variables: Vec<IrmoValue>,
	/// Present only in objects belonging to a remote (mirrored) world: the
	/// stream sequence number at which each variable was last written,
	/// used to discard out-of-order Change atoms.
	pub(crate) variable_time: Option<Vec<u32>>,
	pub(crate) binding: Option<Box<dyn BoundStruct>>,
	user_data: Option<Box<dyn Any>>,
}

impl Object {
	pub(crate) fn new(id: ObjectId, class: &Class, remote: bool) -> Self {
		let nvars = class.num_variables();
		let variables = class
			.variables()
			.iter()
			.map(|v| IrmoValue::default_for(v.ty()))
			.collect();
		Self {
			id,
			class_id: class.id(),
			variables,
			variable_time: remote.then(|| vec![0; nvars]),
			binding: None,
			user_data: None,
		}
	}

	pub fn id(&self) -> ObjectId {
		self.id
	}

	pub fn class_id(&self) -> ClassId {
		self.class_id
	}

	pub fn get(&self, var: VarId) -> Option<&IrmoValue> {
		self.variables.get(var as usize)
	}

	pub fn user_data(&self) -> Option<&dyn Any> {
		self.user_data.as_deref()
	}

	pub fn user_data_mut(&mut self) -> Option<&mut (dyn Any + 'static)> {
		self.user_data.as_deref_mut()
	}

	pub fn set_user_data(&mut self, data: Box<dyn Any>) {
		self.user_data = Some(data);
	}

	pub fn bind(&mut self, binding: Box<dyn BoundStruct>) {
		self.binding = Some(binding);
	}

	pub fn unbind(&mut self) {
		self.binding = None;
	}
}
