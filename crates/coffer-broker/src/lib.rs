//! coffer-broker: exposes databases to external callers
//!
//! The broker maps caller identity (a connection address) to a per-client
//! session and dispatches method calls against path-addressed objects:
//! the service root, one object per registered database (collection), and
//! one per entry (item). Dispatch is a fixed pipeline — resolve path,
//! check the object's capability set, validate the argument shape against
//! a statically declared signature, invoke the typed handler — and every
//! rejection happens before invocation, never partway through.
//!
//! Two deliberate departures from the D-Bus-era shape this replaces:
//! the method table is declared once at startup instead of discovered by
//! runtime reflection, and the calling client travels in an explicit
//! [`CallCtx`] instead of ambient thread-local state.

pub mod broker;
pub mod dispatch;
pub mod paths;
pub mod wire;

pub use broker::{Broker, BrokerEvent, CallCtx, Client};
pub use paths::{parse_path, ParsedPath, PathKind};
pub use wire::WireType;
