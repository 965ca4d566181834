//! Shared schema, world and reliable-protocol engine for Irmo state
//! synchronization. `irmo-client` and `irmo-server` both build on this
//! crate; it has no opinion on which side of a connection it runs on.

pub mod atom;
pub mod error;
pub mod interface;
pub mod net;
pub mod packet;
pub mod protocol;
pub mod value;
pub mod world;

pub use error::{Error, ResourceError, Result, SchemaError, ValidationError};
pub use interface::Interface;
pub use packet::Packet;
pub use value::{IrmoValue, ValueType};
pub use world::{ClassId, MethodId, Object, ObjectId, VarId, World, WorldObserver};
