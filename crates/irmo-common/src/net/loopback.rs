//! An in-process network module used by tests: packets are queued on
//! per-port FIFOs instead of touching a real socket (SPEC_FULL.md §6,
//! "Network module contract").

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::{Address, NetModule, Socket};
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopbackAddress {
	port: u16,
}

impl fmt::Display for LoopbackAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "loopback:{}", self.port)
	}
}

impl Address for LoopbackAddress {
	fn port(&self) -> u16 {
		self.port
	}
}

type Queue = VecDeque<(Vec<u8>, u16)>;

#[derive(Default)]
struct Registry {
	queues: HashMap<u16, Queue>,
	next_ephemeral: u16,
}

/// A shared virtual network. Clone to hand the same network to multiple
/// "endpoints" within one process (e.g. a client and server in a test).
#[derive(Clone)]
pub struct LoopbackModule {
	registry: Arc<Mutex<Registry>>,
}

impl Default for LoopbackModule {
	fn default() -> Self {
		Self {
			registry: Arc::new(Mutex::new(Registry {
				queues: HashMap::new(),
				next_ephemeral: 49152,
			})),
		}
	}
}

impl LoopbackModule {
	pub fn new() -> Self {
		Self::default()
	}

	fn bind(&self, requested: u16) -> std::io::Result<u16> {
		let mut reg = self.registry.lock().unwrap();
		let port = if requested == 0 {
			loop {
				let candidate = reg.next_ephemeral;
				reg.next_ephemeral = reg.next_ephemeral.wrapping_add(1).max(49152);
				if !reg.queues.contains_key(&candidate) {
					break candidate;
				}
			}
		} else {
			requested
		};
		reg.queues.entry(port).or_default();
		Ok(port)
	}
}

pub struct LoopbackSocket {
	registry: Arc<Mutex<Registry>>,
	port: u16,
}

impl Socket for LoopbackSocket {
	type Addr = LoopbackAddress;

	fn send_packet(&self, addr: &LoopbackAddress, packet: &Packet) -> std::io::Result<()> {
		let mut reg = self.registry.lock().unwrap();
		reg.queues
			.entry(addr.port)
			.or_default()
			.push_back((packet.as_bytes().to_vec(), self.port));
		Ok(())
	}

	fn recv_packet(&self) -> std::io::Result<Option<(Packet, LoopbackAddress)>> {
		let mut reg = self.registry.lock().unwrap();
		let Some(queue) = reg.queues.get_mut(&self.port) else {
			return Ok(None);
		};
		Ok(queue
			.pop_front()
			.map(|(bytes, src_port)| (Packet::from_bytes(&bytes), LoopbackAddress { port: src_port })))
	}

	fn block(&self, _timeout_ms: Option<u32>) -> std::io::Result<()> {
		// Loopback delivery is synchronous and immediate; there is nothing
		// to wait for that a second call to recv_packet wouldn't already
		// see.
		Ok(())
	}
}

impl NetModule for LoopbackModule {
	type Addr = LoopbackAddress;
	type Sock = LoopbackSocket;

	fn open_client_sock(&self) -> std::io::Result<LoopbackSocket> {
		let port = self.bind(0)?;
		Ok(LoopbackSocket { registry: self.registry.clone(), port })
	}

	fn open_server_sock(&self, port: u16) -> std::io::Result<LoopbackSocket> {
		let port = self.bind(port)?;
		Ok(LoopbackSocket { registry: self.registry.clone(), port })
	}

	fn resolve_address(&self, _host: &str, port: u16) -> std::io::Result<LoopbackAddress> {
		Ok(LoopbackAddress { port })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn packets_travel_between_two_endpoints() {
		let net = LoopbackModule::new();
		let server = net.open_server_sock(9000).unwrap();
		let client = net.open_client_sock().unwrap();

		let server_addr = net.resolve_address("server", 9000).unwrap();
		let mut p = Packet::new();
		p.write_u8(42);
		client.send_packet(&server_addr, &p).unwrap();

		let (received, from) = server.recv_packet().unwrap().unwrap();
		assert_eq!(received.as_bytes(), p.as_bytes());
		assert_ne!(from.port(), 9000);
	}

	#[test]
	fn recv_on_empty_queue_returns_none() {
		let net = LoopbackModule::new();
		let sock = net.open_server_sock(9001).unwrap();
		assert!(sock.recv_packet().unwrap().is_none());
	}
}
