//! The module defining the counter store seam.
//!
//! The allocator reaches its backing storage engine only through the narrow
//! traits in `api`: obtain a transaction, execute an update, run a query,
//! then commit or cancel. Any engine able to serialize a row-level write can
//! sit behind this seam. The crate ships one backend:
//! - `mem`: an in-memory store, used by the test-suite and by embedded
//!   callers that do not need durability

mod api;
mod mem;

pub use api::{Row, Store, StoreTx};

#[cfg(feature = "store-mem")]
pub use mem::MemStore;
