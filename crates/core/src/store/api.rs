//! This module defines the API for a transaction against the counter store.

use anyhow::Result;

use crate::sql::{Select, Update, Value};

/// One result row, carrying column values in the order the query requested.
pub type Row = Vec<Value>;

/// A handle on a counter store able to hand out transactions.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
	/// Whether the backing engine provides transactional guarantees.
	///
	/// A store answering `false` hands out auto-commit transactions whose
	/// [`commit`](StoreTx::commit) and [`cancel`](StoreTx::cancel) do
	/// nothing; every statement takes effect immediately and a partial
	/// failure cannot be rolled back. The allocator stays usable on such a
	/// store, with weaker cross-process guarantees, and warns once at
	/// construction.
	fn supports_transactions(&self) -> bool;

	/// Starts a new transaction.
	///
	/// When `write` is true the transaction may execute updates, and the
	/// store must serialize it against every other write transaction no
	/// later than its first row write.
	async fn transaction(&self, write: bool) -> Result<Box<dyn StoreTx>>;
}

/// This trait defines the API for a transaction against the counter store.
///
/// A transaction must be resolved by exactly one call to
/// [`commit`](Self::commit) or [`cancel`](Self::cancel); any further call
/// fails with [`Error::TxFinished`](crate::err::Error::TxFinished).
#[async_trait::async_trait]
pub trait StoreTx: Send {
	/// Executes an update, returning the number of affected rows.
	async fn execute(&mut self, stmt: &Update) -> Result<u64>;

	/// Runs a query, returning the matching rows.
	async fn query(&mut self, stmt: &Select) -> Result<Vec<Row>>;

	/// Commits the transaction.
	async fn commit(&mut self) -> Result<()>;

	/// Cancels the transaction.
	///
	/// This reverses all changes made within the transaction.
	async fn cancel(&mut self) -> Result<()>;
}
