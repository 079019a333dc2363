#![cfg(feature = "store-mem")]

//! In-memory counter store backend.
//!
//! This backend keeps its tables in process memory and is primarily used by
//! the test-suite and by embedded callers that do not need durability. Write
//! transactions buffer their changes against a snapshot and publish them on
//! commit, while being serialized on a store-wide writer lock from the
//! moment they are created. That is a coarser serialization point than the
//! row write lock a relational engine takes on the locking update, but it
//! provides the same guarantee: no two write transactions ever interleave.
//!
//! Opened with [`MemStore::new_auto_commit`], the store instead applies
//! every statement immediately and reports itself as non-transactional
//! through the capability probe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::api::{Row, Store, StoreTx};
use crate::cnf;
use crate::err::Error;
use crate::sql::{Select, Update, Value};

/// One stored row, keyed by column name.
type MemRow = HashMap<String, Value>;

/// All stored tables, keyed by table name.
type Tables = HashMap<String, Vec<MemRow>>;

/// An in-memory counter store.
pub struct MemStore {
	/// The committed table data
	tables: Arc<Mutex<Tables>>,
	/// Serializes write transactions against each other
	writer: Arc<Mutex<()>>,
	/// Whether transactions buffer and publish atomically
	transactional: bool,
	/// Source of primary keys for provisioned counter rows
	next_pk: AtomicI64,
	/// Number of update statements executed
	writes: Arc<AtomicU64>,
	/// Number of query statements executed
	reads: Arc<AtomicU64>,
}

impl MemStore {
	/// Creates a new transactional in-memory store.
	pub fn new() -> Self {
		Self {
			tables: Arc::new(Mutex::new(Tables::new())),
			writer: Arc::new(Mutex::new(())),
			transactional: true,
			next_pk: AtomicI64::new(1),
			writes: Arc::new(AtomicU64::new(0)),
			reads: Arc::new(AtomicU64::new(0)),
		}
	}

	/// Creates a store without transactional guarantees.
	///
	/// Statements take effect immediately and cannot be rolled back, which
	/// mirrors engines that lack transactions. The allocator detects this
	/// through the capability probe and warns once at construction.
	pub fn new_auto_commit() -> Self {
		Self {
			transactional: false,
			..Self::new()
		}
	}

	/// Seeds a counter row for a logical table.
	///
	/// Counter rows are provisioned out-of-band before first use; an
	/// allocator that finds no row for a table fails with
	/// [`Error::CounterRowMissing`].
	pub async fn provision(&self, table_name: &str, next_id: i64, quantity: i64) {
		let mut row = MemRow::new();
		row.insert(
			cnf::COUNTER_TABLE_ID.to_owned(),
			Value::Int(self.next_pk.fetch_add(1, Ordering::Relaxed)),
		);
		row.insert(cnf::COLUMN_TABLE_NAME.to_owned(), Value::Text(table_name.to_owned()));
		row.insert(cnf::COLUMN_NEXT_ID.to_owned(), Value::Int(next_id));
		row.insert(cnf::COLUMN_QUANTITY.to_owned(), Value::Int(quantity));
		self.tables.lock().await.entry(cnf::COUNTER_TABLE.clone()).or_default().push(row);
	}

	/// Returns the committed `(next_id, quantity)` of a counter row.
	pub async fn counter_row(&self, table_name: &str) -> Option<(i64, i64)> {
		let tables = self.tables.lock().await;
		let rows = tables.get(&*cnf::COUNTER_TABLE)?;
		let row = rows.iter().find(|r| {
			r.get(cnf::COLUMN_TABLE_NAME).and_then(|v| v.as_text()) == Some(table_name)
		})?;
		let next_id = row.get(cnf::COLUMN_NEXT_ID)?.as_int()?;
		let quantity = row.get(cnf::COLUMN_QUANTITY)?.as_int()?;
		Some((next_id, quantity))
	}

	/// The total number of statements this store has executed.
	pub fn operations(&self) -> u64 {
		self.reads.load(Ordering::Relaxed) + self.writes.load(Ordering::Relaxed)
	}
}

impl Default for MemStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl Store for MemStore {
	fn supports_transactions(&self) -> bool {
		self.transactional
	}

	async fn transaction(&self, write: bool) -> Result<Box<dyn StoreTx>> {
		// Writers queue on the store-wide lock before seeing any data
		let guard = if self.transactional && write {
			Some(self.writer.clone().lock_owned().await)
		} else {
			None
		};
		// Snapshot the committed state once any earlier writer has published
		let snapshot = if self.transactional {
			Some(self.tables.lock().await.clone())
		} else {
			None
		};
		Ok(Box::new(MemTx {
			write,
			done: false,
			tables: self.tables.clone(),
			snapshot,
			_guard: guard,
			writes: self.writes.clone(),
			reads: self.reads.clone(),
		}))
	}
}

/// A transaction over the in-memory store.
struct MemTx {
	/// Is the transaction writeable?
	write: bool,
	/// Is the transaction complete?
	done: bool,
	/// The committed table data
	tables: Arc<Mutex<Tables>>,
	/// The buffered view this transaction reads and writes
	snapshot: Option<Tables>,
	/// Held until the transaction resolves, serializing writers
	_guard: Option<OwnedMutexGuard<()>>,
	/// Number of update statements executed
	writes: Arc<AtomicU64>,
	/// Number of query statements executed
	reads: Arc<AtomicU64>,
}

impl Drop for MemTx {
	fn drop(&mut self) {
		if !self.done && self.write {
			warn!("A transaction was dropped without being committed or cancelled");
		}
	}
}

#[async_trait::async_trait]
impl StoreTx for MemTx {
	async fn execute(&mut self, stmt: &Update) -> Result<u64> {
		// Check to see if transaction is closed
		if self.done {
			bail!(Error::TxFinished);
		}
		// Check to see if transaction is writable
		if !self.write {
			bail!(Error::TxReadonly);
		}
		// Count the statement as one storage operation
		self.writes.fetch_add(1, Ordering::Relaxed);
		// Apply the update to the buffered view, or directly when auto-commit
		let affected = match self.snapshot.as_mut() {
			Some(tables) => apply_update(tables, stmt),
			None => apply_update(&mut *self.tables.lock().await, stmt),
		};
		Ok(affected)
	}

	async fn query(&mut self, stmt: &Select) -> Result<Vec<Row>> {
		// Check to see if transaction is closed
		if self.done {
			bail!(Error::TxFinished);
		}
		// Count the statement as one storage operation
		self.reads.fetch_add(1, Ordering::Relaxed);
		// Evaluate against the buffered view, or the live data when auto-commit
		match self.snapshot.as_ref() {
			Some(tables) => run_select(tables, stmt),
			None => run_select(&*self.tables.lock().await, stmt),
		}
	}

	async fn commit(&mut self) -> Result<()> {
		// Check to see if transaction is closed
		if self.done {
			bail!(Error::TxFinished);
		}
		// Check to see if transaction is writable
		if !self.write {
			bail!(Error::TxReadonly);
		}
		// Mark the transaction as done
		self.done = true;
		// Publish the buffered view; auto-commit stores have nothing pending
		if let Some(snapshot) = self.snapshot.take() {
			*self.tables.lock().await = snapshot;
		}
		// Release the writer lock
		self._guard = None;
		Ok(())
	}

	async fn cancel(&mut self) -> Result<()> {
		// Check to see if transaction is closed
		if self.done {
			bail!(Error::TxFinished);
		}
		// Mark the transaction as done
		self.done = true;
		// Discard the buffered view; auto-commit stores cannot roll back
		self.snapshot = None;
		// Release the writer lock
		self._guard = None;
		Ok(())
	}
}

/// Whether a row satisfies every equality condition.
fn row_matches(row: &MemRow, cond: &[(String, Value)]) -> bool {
	cond.iter().all(|(column, value)| row.get(column) == Some(value))
}

/// Applies an update, returning the number of affected rows.
fn apply_update(tables: &mut Tables, stmt: &Update) -> u64 {
	let Some(rows) = tables.get_mut(&stmt.table) else {
		return 0;
	};
	let mut affected = 0;
	for row in rows.iter_mut() {
		if row_matches(row, &stmt.cond) {
			for (column, value) in &stmt.set {
				row.insert(column.clone(), value.clone());
			}
			affected += 1;
		}
	}
	affected
}

/// Runs a query, projecting the requested columns of every matching row.
fn run_select(tables: &Tables, stmt: &Select) -> Result<Vec<Row>> {
	let Some(rows) = tables.get(&stmt.table) else {
		return Ok(Vec::new());
	};
	let mut out = Vec::new();
	for row in rows {
		if row_matches(row, &stmt.cond) {
			let mut projected = Row::with_capacity(stmt.fields.len());
			for column in &stmt.fields {
				match row.get(column) {
					Some(value) => projected.push(value.clone()),
					None => bail!(Error::Ds(format!(
						"Unknown column {column} in table {}",
						stmt.table
					))),
				}
			}
			out.push(projected);
		}
	}
	Ok(out)
}
