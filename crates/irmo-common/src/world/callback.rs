//! Handle-based callback registries.
//!
//! Each registered callback gets an opaque, monotonically-increasing
//! [`CallbackId`] rather than an index into a `Vec`, so removing one entry
//! during dispatch of another never invalidates a handle someone is still
//! holding (SPEC_FULL.md §3, "Callback-list membership during iteration is
//! stable").

use std::collections::HashMap;

/// A handle returned by [`CallbackList::register`]; pass back to
/// [`CallbackList::unregister`] to remove exactly that entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Entry<F> {
	callback: F,
	destroy_watchers: Vec<Box<dyn FnMut()>>,
}

/// An ordered set of callbacks of a single kind (e.g. "variable changed on
/// this object"), each removable independently via its [`CallbackId`].
pub struct CallbackList<F> {
	next_id: u64,
	order: Vec<CallbackId>,
	entries: HashMap<CallbackId, Entry<F>>,
}

impl<F> Default for CallbackList<F> {
	fn default() -> Self {
		Self {
			next_id: 0,
			order: Vec::new(),
			entries: HashMap::new(),
		}
	}
}

impl<F> CallbackList<F> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn register(&mut self, callback: F) -> CallbackId {
		let id = CallbackId(self.next_id);
		self.next_id += 1;
		self.order.push(id);
		self.entries.insert(
			id,
			Entry {
				callback,
				destroy_watchers: Vec::new(),
			},
		);
		id
	}

	/// Attaches a watcher fired exactly once, when `id` is unregistered
	/// (whether explicitly or via [`CallbackList::clear`]).
	pub fn watch_destroy(&mut self, id: CallbackId, watcher: impl FnMut() + 'static) {
		if let Some(entry) = self.entries.get_mut(&id) {
			entry.destroy_watchers.push(Box::new(watcher));
		}
	}

	pub fn unregister(&mut self, id: CallbackId) {
		if let Some(mut entry) = self.entries.remove(&id) {
			self.order.retain(|&o| o != id);
			for watcher in &mut entry.destroy_watchers {
				watcher();
			}
		}
	}

	/// Invokes every currently-registered callback with `f`, in registration
	/// order. Snapshots the id order before iterating so a callback that
	/// unregisters itself or another entry mid-walk cannot corrupt the walk;
	/// entries removed after the snapshot is taken are simply skipped.
	pub fn for_each(&mut self, mut f: impl FnMut(&mut F)) {
		for id in self.order.clone() {
			if let Some(entry) = self.entries.get_mut(&id) {
				f(&mut entry.callback);
			}
		}
	}

	/// Unregisters every callback, firing destroy watchers for each.
	pub fn clear(&mut self) {
		let ids: Vec<_> = self.order.clone();
		for id in ids {
			self.unregister(id);
		}
	}
}
