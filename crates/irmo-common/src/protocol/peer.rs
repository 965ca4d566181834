//! The per-connection protocol engine: handshake state machine, reliable
//! atom delivery, and AIMD congestion control (SPEC_FULL.md §4.5). This is
//! the Rust name for the original's `IrmoClient` -- "client" in the
//! original is used symmetrically by both connection sides, which reads
//! oddly in a server's own peer list, so the type here is named for what it
//! actually is: the server's or client's record of one remote endpoint.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::atom::{self, Atom, AtomKind};
use crate::interface::Interface;
use crate::net::{Address, Socket};
use crate::packet::Packet;
use crate::value::IrmoValue;
use crate::world::{ClassId, MethodId, ObjectId, VarId, World};

use super::clock::Clock;
use super::config::{ProtocolConfig, PROTOCOL_VERSION};
use super::header::{self, FLAG_ACK, FLAG_DTA, FLAG_FIN, FLAG_SYN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	Connecting,
	Connected,
	Disconnecting,
	Disconnected,
}

/// Why a connection ended up `Disconnected`, surfaced to host applications
/// through `Peer::disconnect_reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	LocalRequest,
	RemoteRequest,
	Refused(String),
	DeadPeer,
}

/// Notable state transitions a [`Peer`] records for its owner (a `Server`
/// or `Connection`) to react to -- enqueueing a world snapshot once a
/// handshake completes, or firing disconnect callbacks -- without `Peer`
/// needing to hold a callback list of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
	Connected,
	Disconnected,
}

/// One remote endpoint's full protocol state: handshake progress, send
/// queue/window, receive window, and AIMD congestion state.
pub struct Peer<A: Address> {
	config: Rc<ProtocolConfig>,
	clock: Rc<dyn Clock>,
	interface: Arc<Interface>,

	pub remote_addr: A,
	state: ConnState,
	disconnect_reason: Option<DisconnectReason>,
	/// `true` once this side has applied a SyncPoint atom received from
	/// the remote (its initial world dump is fully applied locally).
	local_synced: bool,
	/// `true` once the SyncPoint atom *this side* sent has been acked.
	remote_synced: bool,
	/// Set on the server's single "self-connection" to its own local
	/// world; such a peer never accepts an incoming SYN (SPEC_FULL.md
	/// §4.6).
	pub internal_server: bool,

	hostname: String,

	send_queue: VecDeque<Atom>,
	send_window: super::window::SendWindow,
	recv_window: super::window::ReceiveWindow,

	rtt_ms: f64,
	rtt_dev_ms: f64,
	backoff: u32,
	cwnd: usize,
	ssthresh: usize,
	need_ack: bool,
	peer_max_sendwindow_bytes: Option<usize>,

	handshake_attempts: u32,
	last_retry_ms: Option<u64>,
	disconnect_wait_start_ms: Option<u64>,

	events: Vec<PeerEvent>,

	/// Opaque host-application state (SPEC_FULL.md §4.3.2); never inspected
	/// by the library itself.
	user_data: Option<Box<dyn Any>>,
}

impl<A: Address> Peer<A> {
	pub fn new(
		config: Rc<ProtocolConfig>,
		clock: Rc<dyn Clock>,
		interface: Arc<Interface>,
		remote_addr: A,
	) -> Self {
		Self {
			cwnd: config.initial_cwnd,
			ssthresh: config.initial_ssthresh,
			rtt_ms: config.initial_rtt_ms as f64,
			rtt_dev_ms: config.initial_rtt_deviation_ms as f64,
			config,
			clock,
			interface,
			remote_addr,
			state: ConnState::Connecting,
			disconnect_reason: None,
			local_synced: false,
			remote_synced: false,
			internal_server: false,
			hostname: String::new(),
			send_queue: VecDeque::new(),
			send_window: super::window::SendWindow::new(),
			recv_window: super::window::ReceiveWindow::new(),
			backoff: 1,
			need_ack: false,
			peer_max_sendwindow_bytes: None,
			handshake_attempts: 0,
			last_retry_ms: None,
			disconnect_wait_start_ms: None,
			events: Vec::new(),
			user_data: None,
		}
	}

	pub fn state(&self) -> ConnState {
		self.state
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

	/// Drains and returns every state-transition event recorded since the
	/// last call, for the owning `Server`/`Connection` to react to.
	pub fn drain_events(&mut self) -> Vec<PeerEvent> {
		std::mem::take(&mut self.events)
	}

	pub fn is_synchronized(&self) -> bool {
		self.local_synced && self.remote_synced
	}

	pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
		self.disconnect_reason.as_ref()
	}

	/// Requests a graceful disconnect: moves to `Disconnecting` and starts
	/// resending `SYN|FIN` until the peer acks or the retry count is
	/// exhausted.
	pub fn disconnect(&mut self) {
		if self.state == ConnState::Connected || self.state == ConnState::Connecting {
			self.state = ConnState::Disconnecting;
			self.handshake_attempts = 0;
			self.last_retry_ms = None;
		}
	}

	// -- enqueueing (called by the world-observer adapter / server) --

	pub fn enqueue_new_object(&mut self, object_id: ObjectId, class_id: ClassId) {
		self.send_queue.push_back(Atom::NewObject { object_id, class_id });
	}

	/// Change-atom coalescing (SPEC_FULL.md §4.4): clears the bit in any
	/// in-flight or queued Change atom for this object/variable before
	/// appending the new write, so a variable written twice before a
	/// packet goes out is sent once with its latest value.
	pub fn enqueue_change(
		&mut self,
		class_id: ClassId,
		object_id: ObjectId,
		var: VarId,
		value: IrmoValue,
	) {
		for (_, slot) in self.send_window.iter_mut() {
			if slot.atom.clear_change_var(var) {
				if slot.atom.object_id() == Some(object_id) {
					slot.atom = Atom::Null;
				}
			}
		}
		for queued in self.send_queue.iter_mut() {
			if queued.object_id() == Some(object_id) {
				if let Atom::Change { values, .. } = queued {
					values.retain(|(v, _)| *v != var);
				}
			}
		}
		if let Some(Atom::Change { values, .. }) = self
			.send_queue
			.iter_mut()
			.find(|a| matches!(a, Atom::Change { object_id: o, .. } if *o == object_id))
		{
			values.push((var, value));
		} else {
			self.send_queue.push_back(Atom::Change {
				class_id,
				object_id,
				values: vec![(var, value)],
			});
		}
	}

	/// Destroy-atom coalescing (SPEC_FULL.md §4.4): any pending Change for
	/// this object in the queue or window is nullified before the Destroy
	/// is appended.
	pub fn enqueue_destroy(&mut self, object_id: ObjectId) {
		for (_, slot) in self.send_window.iter_mut() {
			if slot.atom.object_id() == Some(object_id) && slot.atom.kind() == AtomKind::Change {
				slot.atom = Atom::Null;
			}
		}
		for queued in self.send_queue.iter_mut() {
			if queued.object_id() == Some(object_id) && queued.kind() == AtomKind::Change {
				*queued = Atom::Null;
			}
		}
		self.send_queue.push_back(Atom::Destroy { object_id });
	}

	pub fn enqueue_method(&mut self, method_id: MethodId, source: ObjectId, args: Vec<IrmoValue>) {
		self.send_queue.push_back(Atom::Method { method_id, source, args });
	}

	pub fn enqueue_sync_point(&mut self) {
		self.send_queue.push_back(Atom::SyncPoint);
	}

	/// Queues every current object and variable of `world` as NewObject +
	/// Change atoms, terminated by a SyncPoint -- the initial state dump
	/// sent right after a handshake completes.
	pub fn enqueue_world_snapshot(&mut self, world: &World) {
		for object in world.iter_objects(None) {
			self.enqueue_new_object(object.id(), object.class_id());
			let class = self
				.interface
				.class(object.class_id())
				.expect("object's class always resolves");
			for var in class.variables() {
				if let Some(value) = object.get(var.id()) {
					self.enqueue_change(object.class_id(), object.id(), var.id(), value.clone());
				}
			}
		}
		self.enqueue_sync_point();
	}

	// -- handshake driving --

	#[instrument(skip(self, socket), fields(addr = %self.remote_addr))]
	pub fn start_connecting(&mut self, hostname: String, socket: &impl Socket<Addr = A>) {
		self.hostname = hostname;
		self.send_syn(socket);
	}

	fn send_syn(&mut self, socket: &impl Socket<Addr = A>) {
		let mut p = Packet::new();
		p.write_u16(FLAG_SYN);
		p.write_u16(PROTOCOL_VERSION);
		p.write_u32(self.interface.hash());
		p.write_u32(self.interface.hash());
		p.write_string(&self.hostname);
		let _ = socket.send_packet(&self.remote_addr, &p);
		self.handshake_attempts += 1;
		self.last_retry_ms = Some(self.clock.now_ms());
	}

	fn send_syn_ack(&self, socket: &impl Socket<Addr = A>) {
		let mut p = Packet::new();
		p.write_u16(FLAG_SYN | FLAG_ACK);
		let _ = socket.send_packet(&self.remote_addr, &p);
	}

	fn send_refusal(&self, socket: &impl Socket<Addr = A>, reason: &str) {
		let mut p = Packet::new();
		p.write_u16(FLAG_SYN | FLAG_FIN);
		p.write_string(reason);
		let _ = socket.send_packet(&self.remote_addr, &p);
	}

	fn send_fin(&mut self, socket: &impl Socket<Addr = A>) {
		let mut p = Packet::new();
		p.write_u16(FLAG_SYN | FLAG_FIN);
		let _ = socket.send_packet(&self.remote_addr, &p);
		self.handshake_attempts += 1;
		self.last_retry_ms = Some(self.clock.now_ms());
	}

	fn send_fin_ack(&self, socket: &impl Socket<Addr = A>) {
		let mut p = Packet::new();
		p.write_u16(FLAG_SYN | FLAG_FIN | FLAG_ACK);
		let _ = socket.send_packet(&self.remote_addr, &p);
	}

	/// Server-side: validates an incoming initial SYN against the schema
	/// this server offers/expects, replying with `SYN|ACK` or a refusal.
	pub fn accept_syn(
		&mut self,
		packet: &mut Packet,
		socket: &impl Socket<Addr = A>,
		expected_local_hash: u32,
		expected_remote_hash: u32,
	) -> bool {
		let Some(version) = packet.read_u16() else {
			return false;
		};
		let Some(local_hash) = packet.read_u32() else {
			return false;
		};
		let Some(remote_hash) = packet.read_u32() else {
			return false;
		};
		let hostname = packet.read_string().unwrap_or_default();

		if version != PROTOCOL_VERSION {
			self.send_refusal(
				socket,
				"client and server side protocol versions do not match",
			);
			self.transition_refused("protocol version mismatch".to_owned());
			return false;
		}
		if local_hash != expected_local_hash || remote_hash != expected_remote_hash {
			self.send_refusal(socket, "interface hash mismatch");
			self.transition_refused("interface hash mismatch".to_owned());
			return false;
		}
		self.hostname = hostname;
		self.send_syn_ack(socket);
		if self.state != ConnState::Connected {
			self.state = ConnState::Connected;
			self.events.push(PeerEvent::Connected);
		}
		true
	}

	fn transition_refused(&mut self, reason: String) {
		self.state = ConnState::Disconnected;
		self.disconnect_reason = Some(DisconnectReason::Refused(reason));
		self.events.push(PeerEvent::Disconnected);
	}

	/// Drives the handshake/disconnect retry timers; call every tick
	/// before building data packets.
	pub fn pump_timers(&mut self, socket: &impl Socket<Addr = A>) {
		let now = self.clock.now_ms();
		match self.state {
			ConnState::Connecting => {
				let effective_timeout =
					self.config.handshake_retry_interval_ms * self.backoff as u64;
				if effective_timeout > self.config.retry_saturation_ms {
					self.state = ConnState::Disconnected;
					self.disconnect_reason = Some(DisconnectReason::DeadPeer);
					self.events.push(PeerEvent::Disconnected);
					return;
				}
				let due = self
					.last_retry_ms
					.map(|t| now.saturating_sub(t) >= self.config.handshake_retry_interval_ms)
					.unwrap_or(true);
				if due && self.handshake_attempts < self.config.handshake_retry_count {
					self.send_syn(socket);
				} else if due {
					self.state = ConnState::Disconnected;
					self.disconnect_reason = Some(DisconnectReason::DeadPeer);
					self.events.push(PeerEvent::Disconnected);
				}
			}
			ConnState::Disconnecting => {
				let due = self
					.last_retry_ms
					.map(|t| now.saturating_sub(t) >= self.config.handshake_retry_interval_ms)
					.unwrap_or(true);
				if due && self.handshake_attempts < self.config.handshake_retry_count {
					self.send_fin(socket);
				} else if due {
					self.state = ConnState::Disconnected;
					self.disconnect_reason = Some(DisconnectReason::LocalRequest);
					self.events.push(PeerEvent::Disconnected);
				}
			}
			ConnState::Disconnected => {
				if let Some(start) = self.disconnect_wait_start_ms {
					if now.saturating_sub(start) > self.config.disconnect_hold_off_ms {
						self.disconnect_wait_start_ms = None;
					}
				}
			}
			_ => {}
		}
	}

	/// `true` once the post-disconnect ack-retransmit hold-off has
	/// elapsed and this peer record can be dropped.
	pub fn ready_to_reap(&self) -> bool {
		self.state == ConnState::Disconnected && self.disconnect_wait_start_ms.is_none()
	}

	/// Processes one received packet. `world` is the mirror world fed by
	/// this peer (if any); returns the set of method invocations and
	/// object mutations that should be re-applied/fanned-out by the
	/// caller is handled internally against `world`.
	#[instrument(skip(self, packet, world, socket), fields(addr = %self.remote_addr))]
	pub fn handle_packet(
		&mut self,
		packet: &mut Packet,
		world: Option<&mut World>,
		socket: &impl Socket<Addr = A>,
	) {
		let Some(flags) = packet.read_u16() else {
			return;
		};

		if flags & FLAG_SYN != 0 && flags & FLAG_FIN != 0 {
			if flags & FLAG_ACK != 0 {
				self.state = ConnState::Disconnected;
				self.disconnect_reason = Some(DisconnectReason::LocalRequest);
			} else {
				let was_disconnecting = self.state == ConnState::Disconnecting;
				let reason = packet.read_string();
				self.send_fin_ack(socket);
				self.state = ConnState::Disconnected;
				self.disconnect_wait_start_ms = Some(self.clock.now_ms());
				self.disconnect_reason = Some(match reason {
					Some(r) if !was_disconnecting => DisconnectReason::Refused(r),
					_ => DisconnectReason::RemoteRequest,
				});
			}
			self.events.push(PeerEvent::Disconnected);
			return;
		}

		if flags & FLAG_SYN != 0 && flags & FLAG_ACK != 0 {
			if self.state == ConnState::Connecting {
				self.state = ConnState::Connected;
				self.events.push(PeerEvent::Connected);
				debug!("handshake complete");
			}
			return;
		}

		if flags == FLAG_ACK || flags & FLAG_DTA != 0 {
			if flags & FLAG_ACK != 0 {
				if let Some(ack_low) = packet.read_u16() {
					self.apply_ack(ack_low);
				}
			}
			if flags & FLAG_DTA != 0 {
				self.apply_data(packet, world);
			}
		}
	}

	fn apply_ack(&mut self, ack_low: u16) {
		let reconstructed =
			header::reconstruct_stream_position(ack_low, self.send_window.start_seq);
		let count = reconstructed.wrapping_sub(self.send_window.start_seq) as usize;
		if count == 0 || count > self.send_window.len() {
			return;
		}
		let now = self.clock.now_ms();
		let acked = self.send_window.ack_through(count);
		let mut oldest_was_fresh = true;
		for (i, slot) in acked.iter().enumerate() {
			if i == 0 {
				oldest_was_fresh = !slot.resent;
			}
			if matches!(slot.atom, Atom::SyncPoint) {
				self.remote_synced = true;
			}
		}
		if let (true, Some(send_time)) = (oldest_was_fresh, acked.first().and_then(|s| s.send_time))
		{
			let sample = now.saturating_sub(send_time) as f64;
			self.rtt_ms = 0.9 * self.rtt_ms + 0.1 * sample;
			self.rtt_dev_ms = 0.9 * self.rtt_dev_ms + 0.1 * (sample - self.rtt_ms).abs();
			self.backoff = 1;
		}
		let threshold = self.config.packet_threshold;
		if self.cwnd < self.ssthresh {
			self.cwnd += threshold;
		} else {
			self.cwnd += (threshold * threshold) / self.cwnd.max(1);
		}
	}

	fn apply_data(&mut self, packet: &mut Packet, mut world: Option<&mut World>) {
		let Some(start_low) = packet.read_u16() else {
			return;
		};
		let start = header::reconstruct_stream_position(start_low, self.recv_window.start_seq);

		let mut offset = 0u32;
		while packet.remaining() > 0 {
			let Some(header_byte) = packet.read_u8() else {
				break;
			};
			let Some((kind, count)) = header::parse_run_header(header_byte) else {
				break;
			};
			for _ in 0..count {
				let seq = start.wrapping_add(offset);
				offset += 1;
				let Some(atom) = atom::read(kind, packet, &self.interface) else {
					warn!(?kind, "malformed atom payload, dropping rest of packet");
					return;
				};
				if seq.wrapping_sub(self.recv_window.start_seq) == 0 {
					self.need_ack = true;
				} else if (seq.wrapping_sub(self.recv_window.start_seq) as i32) < 0 {
					self.need_ack = true;
					continue;
				}
				self.recv_window.insert(seq, atom);
			}
		}

		// Atoms are applied strictly in sequence order: only the
		// contiguous occupied prefix of the receive window is ever
		// executed (SPEC_FULL.md §5, "Ordering guarantees"), never a
		// later, merely-received-early atom.
		self.recv_window.drain_contiguous(|seq, atom| {
			if matches!(atom, Atom::SyncPoint) {
				self.local_synced = true;
			} else if let Some(world) = world.as_deref_mut() {
				apply_atom(atom, world, seq);
			}
		});
		self.need_ack = true;
	}

	/// Pumps the send queue into the send window while there is budget,
	/// then builds and transmits as many ripe packets as the window
	/// allows (SPEC_FULL.md §4.5, "Send window and queue").
	#[instrument(skip(self, socket), fields(addr = %self.remote_addr))]
	pub fn pump_and_send(&mut self, socket: &impl Socket<Addr = A>) {
		if self.state != ConnState::Connected && self.state != ConnState::Connecting {
			return;
		}
		self.drain_queue_into_window();
		let sent_any = self.send_ripe_packets(socket);
		if !sent_any && self.need_ack {
			self.send_bare_ack(socket);
			self.need_ack = false;
		}
	}

	fn effective_max_bytes(&self) -> usize {
		let mut cap = self.cwnd;
		if let Some(remote) = self.peer_max_sendwindow_bytes {
			cap = cap.min(remote);
		}
		cap
	}

	fn drain_queue_into_window(&mut self) {
		while self.send_window.len() < self.config.max_sendwindow
			&& self.send_window.bytes_in_window() < self.effective_max_bytes()
		{
			let Some(atom) = self.send_queue.pop_front() else {
				break;
			};
			let size = atom::length(&atom, &self.interface).max(1);
			self.send_window.push(atom, size);
		}
	}

	fn send_ripe_packets(&mut self, socket: &impl Socket<Addr = A>) -> bool {
		let now = self.clock.now_ms();
		let mut sent_any = false;
		loop {
			let timeout_ms =
				(self.rtt_ms + 2.0 * self.rtt_dev_ms + 1.0) as u64 * self.backoff as u64;
			let mut run_start: Option<usize> = None;
			let mut run_bytes = 0usize;
			let mut run_end = 0usize;
			for (i, (_, slot)) in self.send_window.iter_mut().enumerate() {
				let ripe = match slot.send_time {
					None => true,
					Some(t) => now.saturating_sub(t) >= timeout_ms,
				};
				if !ripe {
					if run_start.is_some() {
						break;
					}
					continue;
				}
				if run_start.is_none() {
					run_start = Some(i);
				}
				if run_bytes + slot.size > self.config.packet_threshold && run_start != Some(i) {
					break;
				}
				run_bytes += slot.size;
				run_end = i + 1;
			}
			let Some(start) = run_start else { break };
			if run_end <= start {
				break;
			}
			self.send_packet_run(socket, start, run_end, now);
			sent_any = true;
			if run_end >= self.send_window.len() {
				break;
			}
		}
		sent_any
	}

	fn send_packet_run(
		&mut self,
		socket: &impl Socket<Addr = A>,
		start: usize,
		end: usize,
		now: u64,
	) {
		let mut p = Packet::new();
		p.write_u16(FLAG_ACK | FLAG_DTA);
		p.write_u16(self.recv_window.start_seq as u16);
		let start_seq = self.send_window.start_seq.wrapping_add(start as u32);
		p.write_u16(start_seq as u16);

		let mut resent_run = false;
		{
			let mut i = start;
			while i < end {
				let kind = self
					.send_window
					.get_mut(i)
					.map(|s| s.atom.kind())
					.unwrap();
				let mut run_len = 1;
				while i + run_len < end
					&& run_len < header::MAX_RUN_LENGTH
					&& self.send_window.get_mut(i + run_len).map(|s| s.atom.kind()) == Some(kind)
				{
					run_len += 1;
				}
				p.write_u8(header::run_header(kind, run_len));
				for j in i..i + run_len {
					let slot = self.send_window.get_mut(j).unwrap();
					atom::write(&slot.atom, &self.interface, &mut p);
					if slot.send_time.is_some() {
						slot.resent = true;
						if j == 0 {
							resent_run = true;
						}
					}
					slot.send_time = Some(now);
				}
				i += run_len;
			}
		}

		if resent_run {
			self.backoff = (self.backoff * 2).min(64);
			self.ssthresh = self.cwnd / 2;
			self.cwnd = self.config.packet_threshold;
		}

		let _ = socket.send_packet(&self.remote_addr, &p);
		self.need_ack = false;
	}

	fn send_bare_ack(&self, socket: &impl Socket<Addr = A>) {
		let mut p = Packet::new();
		p.write_u16(FLAG_ACK);
		p.write_u16(self.recv_window.start_seq as u16);
		let _ = socket.send_packet(&self.remote_addr, &p);
	}
}

/// Applies a single received atom to `world`, using `seq` for the Change
/// atom's stale-write check.
fn apply_atom(atom: &Atom, world: &mut World, seq: u32) {
	match atom {
		Atom::Null | Atom::SendWindow { .. } | Atom::SyncPoint => {}
		Atom::NewObject { object_id, class_id } => {
			if let Err(err) = world.new_object_with_id(*object_id, *class_id) {
				warn!(%err, "failed to apply NewObject atom");
			}
		}
		Atom::Change { object_id, values, .. } => {
			for (var, value) in values {
				if let Err(err) = world.apply_remote_set(*object_id, *var, value.clone(), seq) {
					warn!(%err, "failed to apply Change atom");
				}
			}
		}
		Atom::Destroy { object_id } => {
			if let Err(err) = world.destroy_internal(*object_id) {
				warn!(%err, "failed to apply Destroy atom");
			}
		}
		Atom::Method { method_id, source, args } => {
			world.invoke_from(*method_id, *source, args);
		}
	}
}

trait QueuedAtomExt {
	fn object_id(&self) -> Option<ObjectId>;
	fn kind(&self) -> AtomKind;
}

impl QueuedAtomExt for Atom {
	fn object_id(&self) -> Option<ObjectId> {
		Atom::object_id(self)
	}

	fn kind(&self) -> AtomKind {
		Atom::kind(self)
	}
}

#[allow(dead_code)]
fn trace_hook() {
	trace!("peer module loaded");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::net::{LoopbackAddress, LoopbackModule, NetModule};
	use crate::value::ValueType;

	use super::super::clock::TestClock;

	fn sample_interface() -> Arc<Interface> {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_variable("Player", "health", ValueType::Int8).unwrap();
		iface.new_method("Ping").unwrap();
		Arc::new(iface)
	}

	fn new_peer(
		interface: &Arc<Interface>,
		clock: &Rc<TestClock>,
		config: &Rc<ProtocolConfig>,
		addr: LoopbackAddress,
	) -> Peer<LoopbackAddress> {
		Peer::new(config.clone(), clock.clone(), interface.clone(), addr)
	}

	#[test]
	fn handshake_completes_both_sides() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let net = LoopbackModule::new();
		let client_sock = net.open_client_sock().unwrap();
		let server_sock = net.open_server_sock(9000).unwrap();
		let server_addr = net.resolve_address("server", 9000).unwrap();

		let mut client = new_peer(&iface, &clock, &config, server_addr.clone());
		client.start_connecting("client-host".to_owned(), &client_sock);

		let (mut syn, from) = server_sock.recv_packet().unwrap().expect("syn delivered");
		let mut server = new_peer(&iface, &clock, &config, from);
		let hash = iface.hash();
		assert!(server.accept_syn(&mut syn, &server_sock, hash, hash));
		assert_eq!(server.state(), ConnState::Connected);
		assert_eq!(server.drain_events(), vec![PeerEvent::Connected]);

		let (mut syn_ack, _) = client_sock.recv_packet().unwrap().expect("syn-ack delivered");
		client.handle_packet(&mut syn_ack, None, &client_sock);
		assert_eq!(client.state(), ConnState::Connected);
		assert_eq!(client.drain_events(), vec![PeerEvent::Connected]);
	}

	#[test]
	fn handshake_refused_on_hash_mismatch() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let net = LoopbackModule::new();
		let client_sock = net.open_client_sock().unwrap();
		let server_sock = net.open_server_sock(9001).unwrap();
		let server_addr = net.resolve_address("server", 9001).unwrap();

		let mut client = new_peer(&iface, &clock, &config, server_addr);
		client.start_connecting("client-host".to_owned(), &client_sock);

		let (mut syn, from) = server_sock.recv_packet().unwrap().expect("syn delivered");
		let mut server = new_peer(&iface, &clock, &config, from);
		assert!(!server.accept_syn(&mut syn, &server_sock, iface.hash().wrapping_add(1), iface.hash()));
		assert_eq!(server.state(), ConnState::Disconnected);
		assert_eq!(
			server.disconnect_reason(),
			Some(&DisconnectReason::Refused("interface hash mismatch".to_owned()))
		);
		assert_eq!(server.drain_events(), vec![PeerEvent::Disconnected]);
	}

	#[test]
	fn connecting_peer_retries_syn_then_gives_up() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(
			ProtocolConfig::new()
				.with_handshake_retry_count(2)
				.with_handshake_retry_interval_ms(1000)
				.with_retry_saturation_ms(5000),
		);
		let net = LoopbackModule::new();
		let client_sock = net.open_client_sock().unwrap();
		let server_sock = net.open_server_sock(9002).unwrap();
		let server_addr = net.resolve_address("server", 9002).unwrap();

		let mut client = new_peer(&iface, &clock, &config, server_addr);
		client.start_connecting("host".to_owned(), &client_sock);
		assert!(server_sock.recv_packet().unwrap().is_some(), "initial syn sent");
		assert!(server_sock.recv_packet().unwrap().is_none());

		clock.advance(1000);
		client.pump_timers(&client_sock);
		assert_eq!(client.state(), ConnState::Connecting);
		assert!(server_sock.recv_packet().unwrap().is_some(), "second syn retransmitted");

		clock.advance(1000);
		client.pump_timers(&client_sock);
		assert_eq!(client.state(), ConnState::Disconnected);
		assert_eq!(client.disconnect_reason(), Some(&DisconnectReason::DeadPeer));
		assert_eq!(client.drain_events(), vec![PeerEvent::Disconnected]);
	}

	#[test]
	fn change_atoms_for_the_same_variable_coalesce() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let addr = LoopbackModule::new().resolve_address("x", 1).unwrap();
		let mut peer = new_peer(&iface, &clock, &config, addr);

		peer.enqueue_change(0, 1, 0, IrmoValue::Int(1));
		peer.enqueue_change(0, 1, 0, IrmoValue::Int(2));

		assert_eq!(peer.send_queue.len(), 1);
		match &peer.send_queue[0] {
			Atom::Change { values, .. } => {
				assert_eq!(values, &vec![(0u8, IrmoValue::Int(2))]);
			}
			other => panic!("expected a coalesced Change atom, got {other:?}"),
		}
	}

	#[test]
	fn destroy_atom_drops_pending_change_for_the_same_object() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let addr = LoopbackModule::new().resolve_address("x", 1).unwrap();
		let mut peer = new_peer(&iface, &clock, &config, addr);

		peer.enqueue_change(0, 1, 0, IrmoValue::Int(1));
		peer.enqueue_destroy(1);

		assert_eq!(peer.send_queue.len(), 2);
		assert_eq!(peer.send_queue[0], Atom::Null);
		assert_eq!(peer.send_queue[1], Atom::Destroy { object_id: 1 });
	}

	#[test]
	fn atoms_delivered_end_to_end_and_applied_in_order() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let net = LoopbackModule::new();
		let client_sock = net.open_client_sock().unwrap();
		let server_sock = net.open_server_sock(9003).unwrap();
		let server_addr = net.resolve_address("server", 9003).unwrap();

		let mut client = new_peer(&iface, &clock, &config, server_addr);
		client.start_connecting("host".to_owned(), &client_sock);
		let (mut syn, from) = server_sock.recv_packet().unwrap().unwrap();
		let mut server = new_peer(&iface, &clock, &config, from);
		let hash = iface.hash();
		assert!(server.accept_syn(&mut syn, &server_sock, hash, hash));
		let (mut syn_ack, _) = client_sock.recv_packet().unwrap().unwrap();
		client.handle_packet(&mut syn_ack, None, &client_sock);

		client.enqueue_new_object(1, 0);
		client.enqueue_change(0, 1, 0, IrmoValue::Int(42));
		client.pump_and_send(&client_sock);

		let mut remote_world = World::new_remote(iface.clone());
		let mut delivered = 0;
		while let Some((mut packet, _)) = server_sock.recv_packet().unwrap() {
			server.handle_packet(&mut packet, Some(&mut remote_world), &server_sock);
			delivered += 1;
		}
		assert!(delivered > 0);

		let object = remote_world.object(1).expect("object replicated");
		assert_eq!(object.get(0), Some(&IrmoValue::Int(42)));
	}

	#[test]
	fn graceful_disconnect_completes_on_both_sides() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let config = Rc::new(ProtocolConfig::new());
		let net = LoopbackModule::new();
		let client_sock = net.open_client_sock().unwrap();
		let server_sock = net.open_server_sock(9004).unwrap();
		let server_addr = net.resolve_address("server", 9004).unwrap();

		let mut client = new_peer(&iface, &clock, &config, server_addr);
		client.start_connecting("host".to_owned(), &client_sock);
		let (mut syn, from) = server_sock.recv_packet().unwrap().unwrap();
		let mut server = new_peer(&iface, &clock, &config, from);
		let hash = iface.hash();
		server.accept_syn(&mut syn, &server_sock, hash, hash);
		let (mut syn_ack, _) = client_sock.recv_packet().unwrap().unwrap();
		client.handle_packet(&mut syn_ack, None, &client_sock);

		client.disconnect();
		client.pump_timers(&client_sock);
		assert_eq!(client.state(), ConnState::Disconnecting);

		let (mut fin, _) = server_sock.recv_packet().unwrap().expect("fin delivered");
		server.handle_packet(&mut fin, None, &server_sock);
		assert_eq!(server.state(), ConnState::Disconnected);
		assert_eq!(server.disconnect_reason(), Some(&DisconnectReason::RemoteRequest));

		let (mut fin_ack, _) = client_sock.recv_packet().unwrap().expect("fin-ack delivered");
		client.handle_packet(&mut fin_ack, None, &client_sock);
		assert_eq!(client.state(), ConnState::Disconnected);
		assert_eq!(client.disconnect_reason(), Some(&DisconnectReason::LocalRequest));
	}
}
