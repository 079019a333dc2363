//! Distributed primary-key allocation.
//!
//! This module hands out globally unique integer identifiers for any number
//! of logical tables, backed by one counter row per table in a shared
//! counter store. Ids are reserved in blocks: a refill advances the counter
//! row by a whole block inside one transaction, caches the reserved range in
//! memory, and subsequent allocations drain the cache without touching
//! storage. Because every process reserves through the same transactional
//! row update, concurrent allocators never receive overlapping ranges; ids
//! left in a cache when a process dies are wasted, never reissued.
//!
//! # Key Components
//!
//! - **Allocator**: the public entry point serving id requests
//! - **Block cache**: per-table queue of reserved but unissued ids
//! - **Quantity store**: per-table block size, seeded from the counter row
//!   and grown adaptively under sustained demand
//! - **Housekeeper**: background task refilling drained caches before
//!   foreground callers block on storage

mod tasks;

#[cfg(all(test, feature = "store-mem"))]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Result};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cnf;
use crate::err::Error;
use crate::options::Options;
use crate::sql::{Select, Update, Value};
use crate::store::Store;

/// A primary-key allocator over a shared counter store.
///
/// One allocator instance is expected per process. All allocation calls
/// funnel through a single critical section, so cache bookkeeping is always
/// consistent; serialization across processes is delegated to the counter
/// store's row-level transactional update.
pub struct Allocator {
	/// The shared allocation state and storage handle
	inner: Arc<Inner>,
	/// Cancels the housekeeper task
	canceller: CancellationToken,
}

/// The per-table allocation state, guarded by the allocation-wide lock.
#[derive(Default)]
struct State {
	/// Reserved but unissued ids, consumed from the front
	caches: HashMap<String, VecDeque<i64>>,
	/// The last known block quantity per table
	quantities: HashMap<String, i64>,
	/// When each table last went through a forced refill
	last_forced: HashMap<String, Instant>,
}

/// The shared internals behind an [`Allocator`].
pub(super) struct Inner {
	/// The backing counter store
	store: Arc<dyn Store>,
	/// The allocator behaviour options
	opts: Options,
	/// The allocation-wide critical section
	state: Mutex<State>,
}

impl Allocator {
	/// Creates a new allocator over the specified counter store.
	///
	/// When prefetching is enabled the housekeeper task is started
	/// immediately; it is stopped by [`stop`](Self::stop) or when the
	/// allocator is dropped.
	pub fn new(store: Arc<dyn Store>, opts: Options) -> Self {
		// Reduce a non-transactional store to a one-time warning
		if !store.supports_transactions() {
			warn!(
				"The counter store does not support transactions; processes sharing it risk duplicate id reservations"
			);
		}
		let inner = Arc::new(Inner {
			store,
			opts,
			state: Mutex::new(State::default()),
		});
		let canceller = CancellationToken::new();
		// Keep the caches warm in the background
		if opts.prefetch {
			tasks::spawn_task_cache_refresh(inner.clone(), canceller.clone());
		}
		Self {
			inner,
			canceller,
		}
	}

	/// Returns `count` unique, previously unissued ids for a table.
	///
	/// The request is served from the in-memory block cache when possible;
	/// otherwise a forced refill reserves a fresh block first. Requests
	/// larger than the table's block quantity fail with
	/// [`Error::QuantityExceeded`] rather than growing the reservation ad
	/// hoc, and a table without a provisioned counter row fails with
	/// [`Error::CounterRowMissing`].
	pub async fn get_next_ids(&self, table: &str, count: u32) -> Result<Vec<i64>> {
		self.inner.get_next_ids(table, count).await
	}

	/// Allocates a single id, returned as an `i32`.
	///
	/// Fails with [`Error::IdOutOfRange`] once the counter has outgrown the
	/// requested width.
	pub async fn get_id_as_int(&self, table: &str) -> Result<i32> {
		let id = self.get_id_as_long(table).await?;
		match i32::try_from(id) {
			Ok(id) => Ok(id),
			Err(_) => bail!(Error::IdOutOfRange {
				id,
			}),
		}
	}

	/// Allocates a single id, returned as an `i64`.
	pub async fn get_id_as_long(&self, table: &str) -> Result<i64> {
		let ids = self.inner.get_next_ids(table, 1).await?;
		match ids.first() {
			Some(id) => Ok(*id),
			None => fail!("A single-id allocation returned an empty block"),
		}
	}

	/// Allocates a single id, returned as a [`Decimal`].
	pub async fn get_id_as_decimal(&self, table: &str) -> Result<Decimal> {
		Ok(Decimal::from(self.get_id_as_long(table).await?))
	}

	/// Allocates a single id, returned in decimal string form.
	pub async fn get_id_as_string(&self, table: &str) -> Result<String> {
		Ok(self.get_id_as_long(table).await?.to_string())
	}

	/// Stops the housekeeper task.
	///
	/// Stopping is idempotent and does not invalidate the allocator itself:
	/// allocation keeps working, it just blocks on storage whenever a cache
	/// drains.
	pub fn stop(&self) {
		self.canceller.cancel();
	}
}

impl Drop for Allocator {
	fn drop(&mut self) {
		self.canceller.cancel();
	}
}

impl Inner {
	/// Serves an allocation request under the allocation-wide lock.
	pub(super) async fn get_next_ids(&self, table: &str, count: u32) -> Result<Vec<i64>> {
		// Nothing to allocate
		if count == 0 {
			return Ok(Vec::new());
		}
		// Enter the allocation-wide critical section
		let mut state = self.state.lock().await;
		// Resolve the block quantity for this table
		let quantity = self.quantity(&mut state, table).await?;
		// Refuse requests larger than one reserved block
		ensure!(
			i64::from(count) <= quantity,
			Error::QuantityExceeded {
				table: table.to_owned(),
				requested: count,
				quantity,
			}
		);
		// Reserve a fresh block when the cache cannot cover the request
		let depleted = match state.caches.get(table) {
			Some(cache) => cache.len() < count as usize,
			None => true,
		};
		if depleted {
			self.refill(&mut state, table, true).await?;
		}
		// Issue the ids from the front of the cache
		let Some(cache) = state.caches.get_mut(table) else {
			fail!("The block cache vanished after a refill for table {table}");
		};
		let mut ids = Vec::with_capacity(count as usize);
		for _ in 0..count {
			match cache.pop_front() {
				Some(id) => ids.push(id),
				None => fail!("The block cache drained below the requested count for table {table}"),
			}
		}
		Ok(ids)
	}

	/// Returns the block quantity for a table, seeding it from the counter
	/// row on first touch.
	async fn quantity(&self, state: &mut State, table: &str) -> Result<i64> {
		// Serve the cached quantity when present
		if let Some(quantity) = state.quantities.get(table) {
			return Ok(*quantity);
		}
		// Read the counter row outside of any write lock
		let mut tx = self.store.transaction(false).await?;
		let stmt = Select::new(cnf::COUNTER_TABLE.clone())
			.field(cnf::COLUMN_QUANTITY)
			.cond(cnf::COLUMN_TABLE_NAME, table);
		let rows = match tx.query(&stmt).await {
			Ok(rows) => {
				tx.cancel().await?;
				rows
			}
			Err(e) => {
				let _ = tx.cancel().await;
				return Err(e);
			}
		};
		// A table without a counter row is a configuration error
		let Some(row) = rows.into_iter().next() else {
			bail!(Error::CounterRowMissing {
				table: table.to_owned(),
			});
		};
		let quantity = column_int(&row, 0, table, cnf::COLUMN_QUANTITY)?;
		ensure!(
			quantity > 0,
			Error::CorruptCounterRow {
				table: table.to_owned(),
				message: format!("the block quantity must be positive, found {quantity}"),
			}
		);
		state.quantities.insert(table.to_owned(), quantity);
		Ok(quantity)
	}

	/// Durably reserves a new block of ids and extends the block cache.
	///
	/// The reservation happens in one transaction: write the in-memory
	/// quantity back to the counter row (taking the row write lock and
	/// proving the row exists), read the row, then advance its `NEXT_ID` by
	/// the quantity. Only after the commit is the cache extended, so a
	/// failed reservation leaves no trace in memory.
	#[instrument(level = "trace", target = "keyfount::core::seq", skip(self, state))]
	async fn refill(&self, state: &mut State, table: &str, forced: bool) -> Result<()> {
		// A forced refill is a sign of demand, so consider growing the block
		if forced && self.opts.adaptive_quantity {
			self.check_timing(state, table);
		}
		let Some(quantity) = state.quantities.get(table).copied() else {
			fail!("No block quantity has been resolved for table {table}");
		};
		// Reserve the block against the counter row
		let mut tx = self.store.transaction(true).await?;
		let result = async {
			// Write the quantity back unchanged unless grown; the update
			// takes the row write lock, serializing refills across processes
			let lock = Update::new(cnf::COUNTER_TABLE.clone())
				.set(cnf::COLUMN_QUANTITY, quantity)
				.cond(cnf::COLUMN_TABLE_NAME, table);
			let affected = tx.execute(&lock).await?;
			ensure!(
				affected > 0,
				Error::CounterRowMissing {
					table: table.to_owned(),
				}
			);
			// Read the now-locked row
			let stmt = Select::new(cnf::COUNTER_TABLE.clone())
				.field(cnf::COLUMN_NEXT_ID)
				.field(cnf::COLUMN_QUANTITY)
				.cond(cnf::COLUMN_TABLE_NAME, table);
			let rows = tx.query(&stmt).await?;
			let Some(row) = rows.into_iter().next() else {
				bail!(Error::CounterRowMissing {
					table: table.to_owned(),
				});
			};
			let next_id = column_int(&row, 0, table, cnf::COLUMN_NEXT_ID)?;
			ensure!(
				next_id >= 0,
				Error::CorruptCounterRow {
					table: table.to_owned(),
					message: format!("the next id must not be negative, found {next_id}"),
				}
			);
			// On a transactional store the read-back always matches the value
			// written above; a mismatch means another process slipped between
			// our statements on a store without transactions
			let stored = column_int(&row, 1, table, cnf::COLUMN_QUANTITY)?;
			if stored != quantity {
				debug!(
					"The counter row for table {table} reports quantity {stored} where {quantity} was written"
				);
			}
			// Advance the counter past the reserved block
			let advance = Update::new(cnf::COUNTER_TABLE.clone())
				.set(cnf::COLUMN_NEXT_ID, next_id + quantity)
				.cond(cnf::COLUMN_TABLE_NAME, table);
			tx.execute(&advance).await?;
			Ok::<i64, anyhow::Error>(next_id)
		}
		.await;
		// Resolve the transaction on every exit path
		let start = match result {
			Ok(start) => {
				tx.commit().await?;
				start
			}
			Err(e) => {
				if let Err(ce) = tx.cancel().await {
					debug!("Error cancelling a failed refill transaction: {ce}");
				}
				return Err(e);
			}
		};
		// Materialize the reserved block into the cache
		let cache = state.caches.entry(table.to_owned()).or_default();
		cache.extend(start..start + quantity);
		trace!("Reserved {quantity} ids for table {table} starting at {start}");
		Ok(())
	}

	/// Grows the block quantity when forced refills outpace the housekeeper.
	///
	/// If the previous forced refill happened less than one housekeeper
	/// interval ago, the cache is draining faster than the background task
	/// can replenish it, so the next block is sized to outlast the interval
	/// at the observed consumption rate, with some headroom.
	fn check_timing(&self, state: &mut State, table: &str) {
		let now = Instant::now();
		let interval = self.opts.housekeeper_interval;
		if let Some(prev) = state.last_forced.insert(table.to_owned(), now) {
			let elapsed = now.duration_since(prev);
			if !elapsed.is_zero() && elapsed < interval {
				if let Some(&quantity) = state.quantities.get(table) {
					let rate = quantity as f64 / elapsed.as_secs_f64();
					let grown =
						(interval.as_secs_f64() * rate * cnf::QUANTITY_SAFETY_MARGIN).ceil() as i64;
					if grown > quantity {
						debug!("Growing the block quantity for table {table} from {quantity} to {grown}");
						state.quantities.insert(table.to_owned(), grown);
					}
				}
			}
		}
	}

	/// Refills every drained cache, never failing the housekeeper loop.
	pub(super) async fn refresh_caches(&self) {
		// Share the allocation-wide critical section with foreground callers
		let mut state = self.state.lock().await;
		// Find the tables whose cache has drained below the quantity target
		let stale: Vec<String> = state
			.caches
			.iter()
			.filter(|(table, cache)| {
				if cache.is_empty() {
					return false;
				}
				let target = state.quantities.get(*table).copied().unwrap_or(0);
				(cache.len() as i64) < target
			})
			.map(|(table, _)| table.clone())
			.collect();
		// Top the tables up one by one; one failure must not starve the rest
		for table in stale {
			if let Err(e) = self.refill(&mut state, &table, false).await {
				error!("Error refilling the id block cache for table {table}: {e}");
			}
		}
	}
}

/// Reads an integer column out of a result row.
fn column_int(row: &[Value], index: usize, table: &str, column: &str) -> Result<i64> {
	match row.get(index).and_then(Value::as_int) {
		Some(value) => Ok(value),
		None => bail!(Error::CorruptCounterRow {
			table: table.to_owned(),
			message: format!("the {column} column did not decode as an integer"),
		}),
	}
}
