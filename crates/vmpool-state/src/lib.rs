//! vmpool-state — the shared state store of the vmpool autoscaler.
//!
//! A string-keyed blob store plus three named sets indexing VM records by
//! lifecycle status. The production backend is Redis ([`RedisStore`], async
//! connection manager); [`MemoryStore`] is an in-process backend with the
//! same semantics for tests.
//!
//! # Consistency model
//!
//! The store offers per-key atomicity and pipelined batch execution
//! ([`Pipeline`] + [`StateStore::exec`]): one network round-trip, no
//! cross-key transaction. The control loops are written so that repeated
//! ticks converge the store instead of relying on transactions.

pub mod error;
pub mod keys;
pub mod memory;
pub mod pipeline;
mod redis_store;
pub mod store;

pub use error::{StateError, StateResult};
pub use keys::{
    parse_vm_id, record_key, AVAILABLE_SET, RECORD_KEY_PATTERN, RESERVED_SET, STATUS_SETS,
    UNAVAILABLE_SET,
};
pub use memory::MemoryStore;
pub use pipeline::{Command, Pipeline};
pub use redis_store::RedisStore;
pub use store::StateStore;
