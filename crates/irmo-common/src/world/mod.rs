//! The authoritative (or mirrored) set of networked objects, and the
//! callback machinery watching them (SPEC_FULL.md §4.3).

mod callback;
mod object;

pub use callback::CallbackId;
pub use object::{BoundStruct, Object};

use std::collections::HashMap;
use std::sync::Arc;

use object::{ObjectCallback, ObjectCallbacks, VarCallback};

use crate::error::{Error, ResourceError, ValidationError};
use crate::interface::Interface;
use crate::value::IrmoValue;

use callback::CallbackList;

pub type ClassId = u8;
pub type VarId = u8;
pub type MethodId = u8;
pub type ObjectId = u16;

type MethodCallback = Box<dyn FnMut(ObjectId, &[IrmoValue])>;

/// Callback lists shared by every object of one class (or, for the
/// "any class" record, every object in the world).
#[derive(Default)]
struct ClassCallbacks {
	new_object: CallbackList<ObjectCallback>,
	destroy_object: CallbackList<ObjectCallback>,
	variable: Vec<CallbackList<VarCallback>>,
	any_variable: CallbackList<VarCallback>,
}

impl ClassCallbacks {
	fn with_vars(nvars: usize) -> Self {
		let mut c = Self::default();
		c.variable.resize_with(nvars, CallbackList::new);
		c
	}
}

/// Receives notification of every mutation applied to a [`World`], so a
/// [`crate::protocol::Peer`] can translate it into send-atoms without the
/// world needing to know anything about the protocol engine.
pub trait WorldObserver {
	fn object_created(&mut self, object_id: ObjectId, class_id: ClassId);
	fn variable_changed(
		&mut self,
		class_id: ClassId,
		object_id: ObjectId,
		var: VarId,
		value: &IrmoValue,
	);
	fn object_destroyed(&mut self, object_id: ObjectId, class_id: ClassId);
	fn method_invoked(&mut self, method: MethodId, object_id: ObjectId, args: &[IrmoValue]);
}

/// A world: the full set of objects conforming to one [`Interface`], plus
/// every callback registered against it.
pub struct World {
	interface: Arc<Interface>,
	objects: HashMap<ObjectId, Object>,
	object_callbacks: HashMap<ObjectId, ObjectCallbacks>,
	lastid: ObjectId,
	remote: bool,
	class_callbacks: Vec<ClassCallbacks>,
	any_class: ClassCallbacks,
	method_callbacks: HashMap<MethodId, CallbackList<MethodCallback>>,
	observers: Vec<Box<dyn WorldObserver>>,
}

impl World {
	/// Creates a new, empty local (authoritative) world for `interface`.
	pub fn new(interface: Arc<Interface>) -> Self {
		Self::new_with_remote(interface, false)
	}

	/// Creates an empty mirror world, fed exclusively by applied send-atoms
	/// rather than the public mutation API (SPEC_FULL.md §3 invariants).
	pub fn new_remote(interface: Arc<Interface>) -> Self {
		Self::new_with_remote(interface, true)
	}

	fn new_with_remote(interface: Arc<Interface>, remote: bool) -> Self {
		let class_callbacks = interface
			.classes()
			.iter()
			.map(|c| ClassCallbacks::with_vars(c.num_variables()))
			.collect();
		let method_callbacks = interface
			.methods()
			.iter()
			.map(|m| (m.id(), CallbackList::new()))
			.collect();
		Self {
			interface,
			objects: HashMap::new(),
			object_callbacks: HashMap::new(),
			lastid: 0,
			remote,
			class_callbacks,
			any_class: ClassCallbacks::default(),
			method_callbacks,
			observers: Vec::new(),
		}
	}

	pub fn interface(&self) -> &Arc<Interface> {
		&self.interface
	}

	pub fn is_remote(&self) -> bool {
		self.remote
	}

	pub fn object(&self, id: ObjectId) -> Option<&Object> {
		self.objects.get(&id)
	}

	pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
		self.objects.get_mut(&id)
	}

	pub fn num_objects(&self) -> usize {
		self.objects.len()
	}

	/// Iterates every object in the world, optionally restricted (via
	/// `is_a`) to a given class and its descendants.
	pub fn iter_objects(&self, class: Option<ClassId>) -> impl Iterator<Item = &Object> + '_ {
		self.objects.values().filter(move |obj| match class {
			Some(c) => self.interface.is_a(obj.class_id, c),
			None => true,
		})
	}

	/// Registers an observer that is notified of every mutation applied to
	/// this world, in addition to (and after) any class/object callbacks —
	/// this is how a `Server` or `Connection` wires world mutations into a
	/// peer's send queue without the world needing to know the protocol
	/// engine exists.
	pub fn add_observer(&mut self, observer: Box<dyn WorldObserver>) {
		self.observers.push(observer);
	}

	/// Allocates the next free object id by linear probing around the
	/// 16-bit id space starting at `lastid`.
	fn alloc_id(&mut self) -> Result<ObjectId, Error> {
		if self.objects.len() >= u16::MAX as usize {
			return Err(ResourceError::WorldFull.into());
		}
		let mut candidate = self.lastid.wrapping_add(1);
		loop {
			if !self.objects.contains_key(&candidate) {
				self.lastid = candidate;
				return Ok(candidate);
			}
			candidate = candidate.wrapping_add(1);
		}
	}

	/// Creates a new object of `class_id`, firing `new_object` callbacks
	/// (most-specific class first, then ancestors, then the any-class
	/// record) and notifying observers so it is enqueued to every client.
	pub fn new_object(&mut self, class_id: ClassId) -> Result<ObjectId, Error> {
		if self.remote {
			return Err(ValidationError::WorldIsRemote.into());
		}
		let id = self.alloc_id()?;
		self.new_object_with_id(id, class_id)?;
		for observer in &mut self.observers {
			observer.object_created(id, class_id);
		}
		Ok(id)
	}

	/// Same as [`World::new_object`] but used both by `new_object` and when
	/// applying a NewObject atom on a remote world (id is dictated by the
	/// wire there, not allocated locally).
	pub(crate) fn new_object_with_id(
		&mut self,
		id: ObjectId,
		class_id: ClassId,
	) -> Result<(), Error> {
		let class = self
			.interface
			.class(class_id)
			.ok_or(ValidationError::NoSuchObject(id as u32))?;
		let nvars = class.num_variables();
		let object = Object::new(id, class, self.remote);
		self.objects.insert(id, object);
		self.object_callbacks
			.insert(id, ObjectCallbacks::with_vars(nvars));
		self.fire_new_object(id, class_id);
		Ok(())
	}

	fn fire_new_object(&mut self, id: ObjectId, class_id: ClassId) {
		let mut chain = self.ancestor_chain(class_id);
		chain.reverse();
		for class in chain {
			if let (Some(cb), Some(obj)) =
				(self.class_callbacks.get_mut(class as usize), self.objects.get(&id))
			{
				cb.new_object.for_each(|f| f(obj));
			}
		}
		if let Some(obj) = self.objects.get(&id) {
			self.any_class.new_object.for_each(|f| f(obj));
		}
	}

	fn ancestor_chain(&self, class_id: ClassId) -> Vec<ClassId> {
		let mut chain = Vec::new();
		let mut current = Some(class_id);
		while let Some(id) = current {
			chain.push(id);
			current = self.interface.class(id).and_then(|c| c.parent());
		}
		chain
	}

	/// Sets variable `var` on object `id` to `value`, validating range and
	/// class membership, firing the full callback chain (per-object
	/// specific, per-object any-variable, then per-class from the
	/// variable's declaring class down to the any-class record), then
	/// notifying observers of the change.
	pub fn set(&mut self, id: ObjectId, var: VarId, value: IrmoValue) -> Result<(), Error> {
		if self.remote {
			return Err(ValidationError::WorldIsRemote.into());
		}
		self.apply_set(id, var, value, None)
	}

	/// Applies a write arriving from the wire (a Change atom), with stale
	/// write protection via `seq`.
	pub(crate) fn apply_remote_set(
		&mut self,
		id: ObjectId,
		var: VarId,
		value: IrmoValue,
		seq: u32,
	) -> Result<(), Error> {
		self.apply_set(id, var, value, Some(seq))
	}

	fn apply_set(
		&mut self,
		id: ObjectId,
		var: VarId,
		value: IrmoValue,
		seq: Option<u32>,
	) -> Result<(), Error> {
		let class_id = {
			let obj = self
				.objects
				.get(&id)
				.ok_or(ValidationError::NoSuchObject(id as u32))?;
			obj.class_id
		};
		let class = self
			.interface
			.class(class_id)
			.expect("object's class_id always resolves");
		let class_var = class
			.variable(var)
			.ok_or(ValidationError::NotMyVariable)?;
		if let Some(max) = class_var.ty().int_max() {
			if let Some(v) = value.as_int() {
				if v > max {
					return Err(ValidationError::OutOfRange { value: v, max }.into());
				}
			}
		}
		let declared_in = class_var.declared_in();

		{
			let obj = self.objects.get_mut(&id).unwrap();
			if let (Some(times), Some(s)) = (obj.variable_time.as_mut(), seq) {
				if times[var as usize] >= s {
					return Ok(());
				}
				times[var as usize] = s;
			}
			obj.variables[var as usize] = value.clone();
		}

		if let (Some(cb), Some(obj)) =
			(self.object_callbacks.get_mut(&id), self.objects.get(&id))
		{
			cb.variable[var as usize].for_each(|f| f(obj, var, &value));
			cb.any_variable.for_each(|f| f(obj, var, &value));
		}

		let mut chain = self.ancestor_chain(declared_in);
		chain.reverse();
		for class in chain {
			if let (Some(cb), Some(obj)) =
				(self.class_callbacks.get_mut(class as usize), self.objects.get(&id))
			{
				cb.variable[var as usize].for_each(|f| f(obj, var, &value));
				cb.any_variable.for_each(|f| f(obj, var, &value));
			}
		}
		if let Some(obj) = self.objects.get(&id) {
			self.any_class.any_variable.for_each(|f| f(obj, var, &value));
		}

		for observer in &mut self.observers {
			observer.variable_changed(class_id, id, var, &value);
		}
		Ok(())
	}

	/// Diffs a bound struct's current values against the live object and
	/// applies only the variables that actually changed (SPEC_FULL.md
	/// §4.3.1); a no-op call after a set that already applied the same
	/// value fires nothing.
	pub fn update(&mut self, id: ObjectId) -> Result<(), Error> {
		if self.remote {
			return Err(ValidationError::WorldIsRemote.into());
		}
		let pulled = {
			let obj = self
				.objects
				.get(&id)
				.ok_or(ValidationError::NoSuchObject(id as u32))?;
			let Some(binding) = obj.binding.as_ref() else {
				return Ok(());
			};
			let mut pulled = Vec::new();
			binding.pull(&mut |var, value| pulled.push((var, value)));
			pulled
		};
		for (var, value) in pulled {
			let changed = self
				.objects
				.get(&id)
				.and_then(|o| o.get(var))
				.map(|current| *current != value)
				.unwrap_or(false);
			if changed {
				self.apply_set(id, var, value, None)?;
			}
		}
		Ok(())
	}

	/// Destroys object `id`: fires destroy callbacks bottom-up (most
	/// specific class first), notifies observers, then unlinks it.
	pub fn destroy(&mut self, id: ObjectId) -> Result<(), Error> {
		if self.remote {
			return Err(ValidationError::WorldIsRemote.into());
		}
		self.destroy_internal(id)
	}

	pub(crate) fn destroy_internal(&mut self, id: ObjectId) -> Result<(), Error> {
		let class_id = {
			let obj = self
				.objects
				.get(&id)
				.ok_or(ValidationError::NoSuchObject(id as u32))?;
			obj.class_id
		};

		if let (Some(cb), Some(obj)) =
			(self.object_callbacks.get_mut(&id), self.objects.get(&id))
		{
			cb.destroy.for_each(|f| f(obj));
		}

		let chain = self.ancestor_chain(class_id);
		for class in chain {
			if let (Some(cb), Some(obj)) =
				(self.class_callbacks.get_mut(class as usize), self.objects.get(&id))
			{
				cb.destroy_object.for_each(|f| f(obj));
			}
		}
		if let Some(obj) = self.objects.get(&id) {
			self.any_class.destroy_object.for_each(|f| f(obj));
		}

		for observer in &mut self.observers {
			observer.object_destroyed(id, class_id);
		}
		self.objects.remove(&id);
		self.object_callbacks.remove(&id);
		Ok(())
	}

	/// Invokes `method` with `args`, running its callbacks and notifying
	/// observers so a server fans the invocation out to other clients.
	pub fn invoke(&mut self, method: MethodId, args: &[IrmoValue]) {
		self.invoke_from(method, 0, args);
	}

	pub(crate) fn invoke_from(&mut self, method: MethodId, source: ObjectId, args: &[IrmoValue]) {
		if let Some(cb) = self.method_callbacks.get_mut(&method) {
			cb.for_each(|f| f(source, args));
		}
		for observer in &mut self.observers {
			observer.method_invoked(method, source, args);
		}
	}

	pub fn on_new_object(
		&mut self,
		class: Option<ClassId>,
		callback: impl FnMut(&Object) + 'static,
	) -> CallbackId {
		let list = match class {
			Some(c) => &mut self.class_callbacks[c as usize].new_object,
			None => &mut self.any_class.new_object,
		};
		list.register(Box::new(callback))
	}

	pub fn on_destroy_object(
		&mut self,
		class: Option<ClassId>,
		callback: impl FnMut(&Object) + 'static,
	) -> CallbackId {
		let list = match class {
			Some(c) => &mut self.class_callbacks[c as usize].destroy_object,
			None => &mut self.any_class.destroy_object,
		};
		list.register(Box::new(callback))
	}

	pub fn on_class_variable(
		&mut self,
		class: ClassId,
		var: VarId,
		callback: impl FnMut(&Object, VarId, &IrmoValue) + 'static,
	) -> CallbackId {
		self.class_callbacks[class as usize].variable[var as usize].register(Box::new(callback))
	}

	pub fn on_any_class_variable(
		&mut self,
		class: Option<ClassId>,
		callback: impl FnMut(&Object, VarId, &IrmoValue) + 'static,
	) -> CallbackId {
		let list = match class {
			Some(c) => &mut self.class_callbacks[c as usize].any_variable,
			None => &mut self.any_class.any_variable,
		};
		list.register(Box::new(callback))
	}

	pub fn on_object_variable(
		&mut self,
		id: ObjectId,
		var: VarId,
		callback: impl FnMut(&Object, VarId, &IrmoValue) + 'static,
	) -> Option<CallbackId> {
		let cb = self.object_callbacks.get_mut(&id)?;
		Some(cb.variable[var as usize].register(Box::new(callback)))
	}

	pub fn on_object_destroy(
		&mut self,
		id: ObjectId,
		callback: impl FnMut(&Object) + 'static,
	) -> Option<CallbackId> {
		let cb = self.object_callbacks.get_mut(&id)?;
		Some(cb.destroy.register(Box::new(callback)))
	}

	pub fn on_method(
		&mut self,
		method: MethodId,
		callback: impl FnMut(ObjectId, &[IrmoValue]) + 'static,
	) -> Option<CallbackId> {
		Some(self.method_callbacks.get_mut(&method)?.register(Box::new(callback)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::ValueType;

	fn test_interface() -> Arc<Interface> {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_variable("Player", "x", ValueType::Int16).unwrap();
		iface.new_variable("Player", "name", ValueType::String).unwrap();
		Arc::new(iface)
	}

	#[test]
	fn new_object_gets_default_values() {
		let mut world = World::new(test_interface());
		let id = world.new_object(0).unwrap();
		let obj = world.object(id).unwrap();
		assert_eq!(obj.get(0), Some(&IrmoValue::Int(0)));
		assert_eq!(obj.get(1), Some(&IrmoValue::String(String::new())));
	}

	#[test]
	fn set_out_of_range_is_rejected() {
		let mut world = World::new(test_interface());
		let id = world.new_object(0).unwrap();
		let err = world.set(id, 0, IrmoValue::Int(100_000)).unwrap_err();
		assert!(matches!(
			err,
			Error::Validation(ValidationError::OutOfRange { .. })
		));
	}

	#[test]
	fn callbacks_fire_on_set_and_destroy() {
		use std::cell::RefCell;
		use std::rc::Rc;

		let mut world = World::new(test_interface());
		let id = world.new_object(0).unwrap();

		let seen = Rc::new(RefCell::new(Vec::new()));
		let seen2 = seen.clone();
		world.on_class_variable(0, 0, move |_obj, var, value| {
			seen2.borrow_mut().push((var, value.clone()));
		});

		world.set(id, 0, IrmoValue::Int(42)).unwrap();
		assert_eq!(seen.borrow().as_slice(), &[(0u8, IrmoValue::Int(42))]);

		let destroyed = Rc::new(RefCell::new(false));
		let destroyed2 = destroyed.clone();
		world.on_object_destroy(id, move |_obj| {
			*destroyed2.borrow_mut() = true;
		});
		world.destroy(id).unwrap();
		assert!(*destroyed.borrow());
		assert!(world.object(id).is_none());
	}

	#[test]
	fn is_a_respects_inheritance() {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_class("Ghost", Some("Player")).unwrap();
		let iface = Arc::new(iface);
		let mut world = World::new(iface.clone());
		let id = world.new_object(1).unwrap();
		assert!(iface.is_a(world.object(id).unwrap().class_id(), 0));
	}
}
