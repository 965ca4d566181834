//! The pluggable transport abstraction (SPEC_FULL.md §6, "Network module
//! contract"). The protocol engine in `crate::protocol` is written entirely
//! against this trait, never against a concrete socket type, so the same
//! connection state machine drives real UDP and an in-process loopback used
//! by tests.

mod loopback;
mod udp;

pub use loopback::{LoopbackAddress, LoopbackModule};
pub use udp::UdpModule;

use std::fmt;

use crate::packet::Packet;

/// An endpoint address, reference-counted by the network module so that
/// resolving the same `(host, port)` twice returns equal, cheaply-cloned
/// handles.
pub trait Address: fmt::Debug + fmt::Display + Clone + PartialEq + Eq + std::hash::Hash {
	fn port(&self) -> u16;
}

/// A non-blocking datagram socket.
pub trait Socket {
	type Addr: Address;

	fn send_packet(&self, addr: &Self::Addr, packet: &Packet) -> std::io::Result<()>;

	/// Returns the next received packet and its source address, or `None`
	/// if nothing is waiting. Never blocks.
	fn recv_packet(&self) -> std::io::Result<Option<(Packet, Self::Addr)>>;

	/// Blocks up to `timeout_ms` (or indefinitely if `None`) until this
	/// socket is readable or the timeout expires.
	fn block(&self, timeout_ms: Option<u32>) -> std::io::Result<()>;
}

/// A network backend: opens client/server sockets and resolves addresses.
/// Implementations: [`LoopbackModule`] (FIFO-queue, test-only) and
/// [`UdpModule`] (real UDP/IPv4 or IPv6, depending on the bind address
/// passed to `open_server_sock`).
pub trait NetModule {
	type Addr: Address;
	type Sock: Socket<Addr = Self::Addr>;

	fn open_client_sock(&self) -> std::io::Result<Self::Sock>;
	fn open_server_sock(&self, port: u16) -> std::io::Result<Self::Sock>;
	fn resolve_address(&self, host: &str, port: u16) -> std::io::Result<Self::Addr>;
}
