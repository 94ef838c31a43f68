//! coffer-db: the credential database core
//!
//! A database is a tree of groups and entries sealed into a versioned
//! container. Locked means only the sealed container exists; unlocked
//! means the node tree is materialized for mutation. The transition in
//! either direction goes through the composite key and the KDF (see
//! coffer-crypto).
//!
//! One logical owner mutates an unlocked database at a time; callers
//! that share an instance across threads must serialize access
//! themselves (the broker wraps each database in a mutex).

pub mod container;
pub mod database;
pub mod entry;
pub mod group;
pub mod xml;

pub use database::Database;
pub use entry::{Attribute, Entry, HistorySnapshot};
pub use group::Group;
