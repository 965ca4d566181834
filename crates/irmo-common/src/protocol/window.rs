//! The send window (fixed-capacity, indexed by position) and receive window
//! (sparse, growable) that anchor a [`super::peer::Peer`]'s reliability
//! layer (SPEC_FULL.md §4.5, "Send window and queue" / "Receive window").

use std::collections::VecDeque;

use crate::atom::Atom;

/// One atom's bookkeeping while it sits in the send window.
pub struct SendSlot {
	pub atom: Atom,
	pub size: usize,
	/// `None` until the atom has been transmitted at least once.
	pub send_time: Option<u64>,
	pub resent: bool,
}

/// A fixed-capacity (`ProtocolConfig::max_sendwindow`) array of in-flight
/// atoms, indexed `[0, len)`; index 0 is always the oldest unacked atom.
#[derive(Default)]
pub struct SendWindow {
	pub start_seq: u32,
	slots: VecDeque<SendSlot>,
}

impl SendWindow {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn bytes_in_window(&self) -> usize {
		self.slots.iter().map(|s| s.size).sum()
	}

	pub fn push(&mut self, atom: Atom, size: usize) {
		self.slots.push_back(SendSlot { atom, size, send_time: None, resent: false });
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut SendSlot)> {
		let start = self.start_seq;
		self.slots
			.iter_mut()
			.enumerate()
			.map(move |(i, slot)| (start.wrapping_add(i as u32), slot))
	}

	pub fn get_mut(&mut self, index: usize) -> Option<&mut SendSlot> {
		self.slots.get_mut(index)
	}

	/// Clears the first `count` slots (they've been cumulatively acked),
	/// returning them for `acked` hooks and RTT sampling.
	pub fn ack_through(&mut self, count: usize) -> Vec<SendSlot> {
		let count = count.min(self.slots.len());
		let drained: Vec<_> = self.slots.drain(..count).collect();
		self.start_seq = self.start_seq.wrapping_add(count as u32);
		drained
	}
}

/// One atom's bookkeeping while it sits in the receive window.
pub struct RecvSlot {
	pub atom: Atom,
}

/// A sparse, growable array of received-but-not-yet-delivered atoms, indexed
/// by `seq - start_seq`.
#[derive(Default)]
pub struct ReceiveWindow {
	pub start_seq: u32,
	slots: VecDeque<Option<RecvSlot>>,
}

impl ReceiveWindow {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts (or overwrites, for a retransmit) the atom at `seq`, growing
	/// the window if needed. Returns `false` if `seq` is before the window
	/// start (already delivered; caller should just ack).
	pub fn insert(&mut self, seq: u32, atom: Atom) -> bool {
		let offset = seq.wrapping_sub(self.start_seq) as i32;
		if offset < 0 {
			return false;
		}
		let offset = offset as usize;
		if offset >= self.slots.len() {
			self.slots.resize_with(offset + 1, || None);
		}
		self.slots[offset] = Some(RecvSlot { atom });
		true
	}

	/// Runs `f` over every contiguous occupied slot starting at index 0,
	/// freeing each slot and advancing `start_seq` as it goes.
	pub fn drain_contiguous(&mut self, mut f: impl FnMut(u32, &mut Atom)) {
		while let Some(Some(_)) = self.slots.front() {
			let mut slot = self.slots.pop_front().flatten().unwrap();
			f(self.start_seq, &mut slot.atom);
			self.start_seq = self.start_seq.wrapping_add(1);
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn send_window_ack_through_advances_start() {
		let mut w = SendWindow::new();
		w.push(Atom::Null, 0);
		w.push(Atom::SyncPoint, 0);
		w.push(Atom::Destroy { object_id: 1 }, 2);
		assert_eq!(w.len(), 3);
		let acked = w.ack_through(2);
		assert_eq!(acked.len(), 2);
		assert_eq!(w.len(), 1);
		assert_eq!(w.start_seq, 2);
	}

	#[test]
	fn receive_window_executes_contiguous_prefix_only() {
		let mut w = ReceiveWindow::new();
		w.insert(0, Atom::Null);
		w.insert(2, Atom::SyncPoint);
		let mut executed = Vec::new();
		w.drain_contiguous(|seq, atom| executed.push((seq, atom.clone())));
		assert_eq!(executed, vec![(0, Atom::Null)]);
		assert_eq!(w.start_seq, 1);

		w.insert(1, Atom::Null);
		let mut executed = Vec::new();
		w.drain_contiguous(|seq, atom| executed.push((seq, atom.clone())));
		assert_eq!(executed, vec![(1, Atom::Null), (2, Atom::SyncPoint)]);
		assert_eq!(w.start_seq, 3);
	}
}
