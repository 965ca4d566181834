//! The crate's single error type.
//!
//! The original C library reported failures through a process-global
//! "last error" buffer and a NULL return. Since this crate exposes no C ABI,
//! every fallible entry point instead returns a `Result<_, Error>` (see
//! SPEC_FULL.md §7.1). Protocol-level parsing of untrusted datagrams is the
//! one deliberate exception: malformed packets are dropped and logged, never
//! propagated as an `Error`, so a confused peer can't tear down a healthy
//! connection.

use thiserror::Error;

/// Everything that can go wrong building or running an Irmo world/connection.
#[derive(Debug, Error)]
pub enum Error {
	#[error("schema error: {0}")]
	Schema(#[from] SchemaError),

	#[error("validation error: {0}")]
	Validation(#[from] ValidationError),

	#[error("handshake refused by peer: {reason}")]
	HandshakeRefused { reason: String },

	#[error("peer appears to be dead (no ack within {timeout_ms}ms)")]
	DeadPeer { timeout_ms: u32 },

	#[error("resource exhausted: {0}")]
	ResourceExhausted(#[from] ResourceError),

	#[error("network module error: {0}")]
	Net(#[from] std::io::Error),
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum SchemaError {
	#[error("a class or method named {0:?} already exists")]
	DuplicateName(String),

	#[error("a variable or argument named {0:?} already exists")]
	DuplicateVariable(String),

	#[error("interface already has the maximum of 256 classes")]
	TooManyClasses,

	#[error("interface already has the maximum of 256 methods")]
	TooManyMethods,

	#[error("class {0:?} already has the maximum of 256 variables")]
	TooManyVariables(String),

	#[error("method {0:?} already has the maximum of 256 arguments")]
	TooManyArguments(String),

	#[error("unknown parent class {0:?}")]
	UnknownParent(String),

	#[error("unknown class {0:?}")]
	UnknownClass(String),

	#[error("unknown variable {0:?}")]
	UnknownVariable(String),

	#[error("unknown method {0:?}")]
	UnknownMethod(String),

	#[error("unknown type tag {0}")]
	UnknownType(u8),

	#[error("blob has bad signature")]
	BadSignature,

	#[error("blob has unsupported version {0}")]
	BadVersion(u32),

	#[error("blob truncated or malformed")]
	Truncated,

	#[error("blob structural hash did not match self-check")]
	HashMismatch,
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum ValidationError {
	#[error("variable does not belong to this object's class")]
	NotMyVariable,

	#[error("value {value} out of range for variable of this type (max {max})")]
	OutOfRange { value: u32, max: u32 },

	#[error("cannot mutate a remote (mirrored) world directly")]
	WorldIsRemote,

	#[error("object {0} not found in world")]
	NoSuchObject(u32),
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum ResourceError {
	#[error("world is full: no free object ids remain")]
	WorldFull,

	#[error("send window is full")]
	SendWindowFull,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
