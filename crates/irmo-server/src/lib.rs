#![warn(clippy::unwrap_used)]

//! The per-socket hub: owns a world, accepts or initiates peer
//! connections, and replicates world mutations out to every connected peer
//! (SPEC_FULL.md §4.6).
//!
//! `internal_server` mirrors the original's trick for representing a
//! client-side connection as a server with a single peer that can only be
//! dialed out to, never dialed into: such a server silently drops any
//! unsolicited SYN instead of accepting it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

use irmo_common::net::{Address, Socket};
use irmo_common::protocol::{Clock, DisconnectReason, Peer, PeerEvent, ProtocolConfig};
use irmo_common::world::{ClassId, MethodId, ObjectId, VarId};
use irmo_common::{Interface, IrmoValue, World, WorldObserver};
use tracing::{debug, info, instrument, warn};

/// Forwards every mutation applied to a [`World`] into the send queue of
/// every currently-connected peer. Registered on the server's world at
/// construction time; the `Rc<RefCell<_>>` indirection is what lets the
/// observer (owned by `World`) and `Server::tick` (which also needs mutable
/// access to the same peer map) coexist without an overlapping borrow.
struct Fanout<A: Address> {
	peers: Rc<RefCell<HashMap<A, Peer<A>>>>,
}

impl<A: Address> WorldObserver for Fanout<A> {
	fn object_created(&mut self, object_id: ObjectId, class_id: ClassId) {
		for peer in self.peers.borrow_mut().values_mut() {
			if peer.is_synchronized() || peer.state() == irmo_common::protocol::ConnState::Connected
			{
				peer.enqueue_new_object(object_id, class_id);
			}
		}
	}

	fn variable_changed(
		&mut self,
		class_id: ClassId,
		object_id: ObjectId,
		var: VarId,
		value: &IrmoValue,
	) {
		for peer in self.peers.borrow_mut().values_mut() {
			if peer.state() == irmo_common::protocol::ConnState::Connected {
				peer.enqueue_change(class_id, object_id, var, value.clone());
			}
		}
	}

	fn object_destroyed(&mut self, object_id: ObjectId, _class_id: ClassId) {
		for peer in self.peers.borrow_mut().values_mut() {
			if peer.state() == irmo_common::protocol::ConnState::Connected {
				peer.enqueue_destroy(object_id);
			}
		}
	}

	fn method_invoked(&mut self, method: MethodId, object_id: ObjectId, args: &[IrmoValue]) {
		for peer in self.peers.borrow_mut().values_mut() {
			if peer.state() == irmo_common::protocol::ConnState::Connected {
				peer.enqueue_method(method, object_id, args.to_vec());
			}
		}
	}
}

/// A running instance: one transport endpoint, the world it serves, and
/// every peer currently connected to it.
pub struct Server<A: Address, S: Socket<Addr = A>> {
	config: Rc<ProtocolConfig>,
	clock: Rc<dyn Clock>,
	interface: Arc<Interface>,
	sock: S,
	world: World,
	peers: Rc<RefCell<HashMap<A, Peer<A>>>>,
	/// A client-side connection modelled as a server with one peer; such a
	/// server never accepts an incoming SYN (SPEC_FULL.md §4.6).
	pub internal_server: bool,
	on_connect: Vec<Box<dyn FnMut(&A)>>,
	on_disconnect: Vec<Box<dyn FnMut(&A, &DisconnectReason)>>,
}

impl<A: Address + 'static, S: Socket<Addr = A>> Server<A, S> {
	pub fn new(
		config: Rc<ProtocolConfig>,
		clock: Rc<dyn Clock>,
		interface: Arc<Interface>,
		sock: S,
	) -> Self {
		let mut world = World::new(interface.clone());
		let peers: Rc<RefCell<HashMap<A, Peer<A>>>> = Rc::new(RefCell::new(HashMap::new()));
		world.add_observer(Box::new(Fanout { peers: peers.clone() }));
		Self {
			config,
			clock,
			interface,
			sock,
			world,
			peers,
			internal_server: false,
			on_connect: Vec::new(),
			on_disconnect: Vec::new(),
		}
	}

	pub fn world(&self) -> &World {
		&self.world
	}

	pub fn world_mut(&mut self) -> &mut World {
		&mut self.world
	}

	pub fn on_connect(&mut self, callback: impl FnMut(&A) + 'static) {
		self.on_connect.push(Box::new(callback));
	}

	pub fn on_disconnect(&mut self, callback: impl FnMut(&A, &DisconnectReason) + 'static) {
		self.on_disconnect.push(Box::new(callback));
	}

	/// Dials out to `addr`, used by an `internal_server` (the client side
	/// of a connection) to initiate the handshake.
	pub fn connect(&mut self, addr: A, hostname: String) {
		let mut peer = Peer::new(self.config.clone(), self.clock.clone(), self.interface.clone(), addr.clone());
		peer.start_connecting(hostname, &self.sock);
		self.peers.borrow_mut().insert(addr, peer);
	}

	pub fn peer(&self, addr: &A) -> Option<std::cell::Ref<'_, Peer<A>>> {
		let peers = self.peers.borrow();
		std::cell::Ref::filter_map(peers, |p| p.get(addr)).ok()
	}

	pub fn num_peers(&self) -> usize {
		self.peers.borrow().len()
	}

	/// Drains pending datagrams, applies inbound atoms, drives every peer's
	/// connection state machine, and transmits any ripe packets
	/// (SPEC_FULL.md §5).
	#[instrument(skip(self))]
	pub fn tick(&mut self) -> io::Result<()> {
		while let Some((mut packet, addr)) = self.sock.recv_packet()? {
			let is_new = !self.peers.borrow().contains_key(&addr);
			if is_new {
				if self.internal_server {
					debug!(%addr, "internal server ignoring unsolicited datagram");
					continue;
				}
				let peer = Peer::new(
					self.config.clone(),
					self.clock.clone(),
					self.interface.clone(),
					addr.clone(),
				);
				self.peers.borrow_mut().insert(addr.clone(), peer);
			}

			// The peer is pulled out of the shared map (rather than borrowed
			// in place) before touching `self.world`: applying an inbound
			// atom can run through `World`'s observers, and the fan-out
			// observer borrows this same `RefCell` to reach every peer. A
			// live `borrow_mut()` held across that call would make the
			// observer's own `borrow_mut()` panic.
			let mut peer = self.peers.borrow_mut().remove(&addr);
			if let Some(peer) = peer.as_mut() {
				if is_new {
					let local_hash = self.interface.hash();
					if !peer.accept_syn(&mut packet, &self.sock, local_hash, local_hash) {
						warn!(%addr, "handshake refused");
					}
				} else {
					peer.handle_packet(&mut packet, Some(&mut self.world), &self.sock);
				}
			}
			if let Some(peer) = peer {
				self.peers.borrow_mut().insert(addr.clone(), peer);
			}
		}

		let addrs: Vec<A> = self.peers.borrow().keys().cloned().collect();
		for addr in &addrs {
			let events = {
				let mut peers = self.peers.borrow_mut();
				let Some(peer) = peers.get_mut(addr) else {
					continue;
				};
				peer.pump_timers(&self.sock);
				peer.pump_and_send(&self.sock);
				peer.drain_events()
			};
			for event in events {
				match event {
					PeerEvent::Connected => {
						info!(%addr, "peer connected");
						let mut peers = self.peers.borrow_mut();
						if let Some(peer) = peers.get_mut(addr) {
							peer.enqueue_world_snapshot(&self.world);
						}
						for cb in &mut self.on_connect {
							cb(addr);
						}
					}
					PeerEvent::Disconnected => {
						let reason = self
							.peers
							.borrow()
							.get(addr)
							.and_then(|p| p.disconnect_reason().cloned());
						info!(%addr, ?reason, "peer disconnected");
						if let Some(reason) = reason {
							for cb in &mut self.on_disconnect {
								cb(addr, &reason);
							}
						}
					}
				}
			}
		}

		self.peers.borrow_mut().retain(|_, peer| !peer.ready_to_reap());
		Ok(())
	}

	pub fn block(&self, timeout_ms: Option<u32>) -> io::Result<()> {
		self.sock.block(timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]
	use super::*;
	use irmo_common::net::{LoopbackModule, NetModule};
	use irmo_common::protocol::TestClock;
	use irmo_common::value::ValueType;

	fn sample_interface() -> Arc<Interface> {
		let mut iface = Interface::new();
		iface.new_class("Player", None).unwrap();
		iface.new_variable("Player", "health", ValueType::Int8).unwrap();
		Arc::new(iface)
	}

	#[test]
	fn connecting_peer_replicates_world_to_the_other_side() {
		let iface = sample_interface();
		let clock: Rc<TestClock> = Rc::new(TestClock::new());
		let net = LoopbackModule::new();

		let mut a = Server::new(
			Rc::new(ProtocolConfig::new()),
			clock.clone(),
			iface.clone(),
			net.open_server_sock(9200).unwrap(),
		);
		let mut b = Server::new(
			Rc::new(ProtocolConfig::new()),
			clock.clone(),
			iface.clone(),
			net.open_client_sock().unwrap(),
		);
		b.internal_server = true;

		let addr_a = net.resolve_address("a", 9200).unwrap();
		b.connect(addr_a, "b".to_owned());

		for _ in 0..4 {
			a.tick().unwrap();
			b.tick().unwrap();
		}

		let object_id = a.world_mut().new_object(0).unwrap();
		a.world_mut().set(object_id, 0, IrmoValue::Int(7)).unwrap();

		for _ in 0..4 {
			a.tick().unwrap();
			b.tick().unwrap();
		}

		assert_eq!(b.num_peers(), 1);
		let mirrored = b.world().object(object_id).expect("object replicated to b");
		assert_eq!(mirrored.get(0), Some(&IrmoValue::Int(7)));
	}
}
