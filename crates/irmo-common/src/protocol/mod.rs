//! The reliable, schema-validated connection protocol that carries atoms
//! between two [`crate::world::World`]s (SPEC_FULL.md §4.5-§4.6).

mod clock;
mod config;
mod header;
mod peer;
mod window;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::{ProtocolConfig, PROTOCOL_VERSION};
pub use header::{FLAG_ACK, FLAG_DTA, FLAG_FIN, FLAG_SYN};
pub use peer::{ConnState, DisconnectReason, Peer, PeerEvent};
