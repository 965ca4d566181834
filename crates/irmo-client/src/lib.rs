#![warn(clippy::unwrap_used)]

//! A thin wrapper around [`irmo_common::protocol::Peer`] for the connecting
//! side of a handshake (SPEC_FULL.md §2.1): one peer, one mirror world, no
//! fan-out to other connections.
//!
//! `irmo-server`'s `Server` could, in principle, also be used to dial out (it
//! has `connect`), but it carries a whole peer map and a world-observer
//! fan-out built for serving many connections at once. A single outbound
//! connection doesn't need either, so this crate gives it its own small
//! type instead of asking callers to stand up a one-peer `Server`.

use std::io;
use std::rc::Rc;
use std::sync::Arc;

use irmo_common::net::{Address, Socket};
use irmo_common::protocol::{Clock, ConnState, DisconnectReason, Peer, PeerEvent, ProtocolConfig};
use irmo_common::world::{MethodId, ObjectId};
use irmo_common::{Interface, IrmoValue, World};
use tracing::instrument;

/// One outbound connection to a remote `irmo-server` (or another peer's
/// internal server), plus the mirror world it feeds.
pub struct Connection<A: Address, S: Socket<Addr = A>> {
    sock: S,
    peer: Peer<A>,
    world: World,
}

impl<A: Address, S: Socket<Addr = A>> Connection<A, S> {
    /// Starts a handshake against `server_addr`; the connection is not
    /// usable until `tick` reports a `PeerEvent::Connected` and, beyond
    /// that, the remote world dump has been applied (`is_synchronized`).
    #[instrument(skip(config, clock, interface, sock))]
    pub fn connect(
        config: Rc<ProtocolConfig>,
        clock: Rc<dyn Clock>,
        interface: Arc<Interface>,
        sock: S,
        server_addr: A,
        hostname: String,
    ) -> Self {
        let mut peer = Peer::new(config, clock, interface.clone(), server_addr);
        peer.start_connecting(hostname, &sock);
        Self { sock, peer, world: World::new_remote(interface) }
    }

    pub fn state(&self) -> ConnState {
        self.peer.state()
    }

    pub fn is_synchronized(&self) -> bool {
        self.peer.is_synchronized()
    }

    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.peer.disconnect_reason()
    }

    /// The mirror world fed by this connection. Read-only via the public
    /// world API, since it only ever changes in response to atoms the
    /// server sends (SPEC_FULL.md §3, "Invariants").
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Access for registering callbacks against the mirror world
    /// (`on_new_object`, `on_object_variable`, ...) -- permitted even
    /// though direct mutation through `World::set`/`new_object`/`destroy`
    /// is rejected for a remote world.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Requests a graceful disconnect; call `tick` until the state becomes
    /// `Disconnected`.
    pub fn disconnect(&mut self) {
        self.peer.disconnect();
    }

    /// Invokes a method on `source`'s class, to be executed by every other
    /// peer watching that object once the server re-fans it out.
    pub fn invoke(&mut self, method: MethodId, source: ObjectId, args: Vec<IrmoValue>) {
        self.peer.enqueue_method(method, source, args);
    }

    /// Drains received datagrams, applies them to the mirror world, and
    /// pumps the send queue -- the client-side half of SPEC_FULL.md §5's
    /// tick contract. Returns the state-transition events recorded since
    /// the last call.
    #[instrument(skip(self))]
    pub fn tick(&mut self) -> io::Result<Vec<PeerEvent>> {
        while let Some((mut packet, from)) = self.sock.recv_packet()? {
            if from != self.peer.remote_addr {
                continue;
            }
            self.peer.handle_packet(&mut packet, Some(&mut self.world), &self.sock);
        }
        self.peer.pump_timers(&self.sock);
        self.peer.pump_and_send(&self.sock);
        Ok(self.peer.drain_events())
    }

    pub fn block(&self, timeout_ms: Option<u32>) -> io::Result<()> {
        self.sock.block(timeout_ms)
    }

    pub fn ready_to_reap(&self) -> bool {
        self.peer.ready_to_reap()
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
    fn connect_synchronizes_against_a_bare_peer_responder() {
        let iface = sample_interface();
        let clock: Rc<TestClock> = Rc::new(TestClock::new());
        let config = Rc::new(ProtocolConfig::new());
        let net = LoopbackModule::new();
        let server_sock = net.open_server_sock(9300).unwrap();
        let server_addr = net.resolve_address("server", 9300).unwrap();
        let client_sock = net.open_client_sock().unwrap();

        let mut conn = Connection::connect(
            config.clone(),
            clock.clone(),
            iface.clone(),
            client_sock,
            server_addr,
            "client".to_owned(),
        );

        let (mut syn, from) = server_sock.recv_packet().unwrap().expect("syn delivered");
        let mut server_peer =
            Peer::new(config, clock, iface.clone(), from);
        let hash = iface.hash();
        assert!(server_peer.accept_syn(&mut syn, &server_sock, hash, hash));

        let events = conn.tick().unwrap();
        assert_eq!(events, vec![PeerEvent::Connected]);
        assert_eq!(conn.state(), ConnState::Connected);
    }
}
