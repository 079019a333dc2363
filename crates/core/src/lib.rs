//! # Keyfount Core
//!
//! This crate hands out globally unique, monotonically reserved integer
//! identifiers to any number of application processes sharing one relational
//! counter store. Ids are reserved in blocks: every logical table owns a
//! single counter row, and each refill advances that row by a whole block
//! inside one transaction, so concurrent allocators never receive
//! overlapping ranges. Reserved blocks are cached in memory and drained
//! without further storage round trips, while a background housekeeper task
//! keeps the caches warm before foreground callers block.
//!
//! The storage engine itself stays behind the narrow traits in [`store`];
//! the crate ships an in-memory reference backend behind the `store-mem`
//! feature.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod err;
pub mod options;
pub mod seq;
pub mod sql;
pub mod store;

pub use options::Options;
pub use seq::Allocator;
