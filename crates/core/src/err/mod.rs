use std::fmt::Display;

use thiserror::Error;

/// An error raised by the id allocator or its counter store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The allocator encountered unreachable logic
	#[error("The allocator encountered unreachable logic: {0}")]
	Unreachable(String),

	/// There was a problem with the underlying counter store
	#[error("There was a problem with the underlying counter store: {0}")]
	Ds(String),

	/// There was a problem with a counter store transaction
	#[error("There was a problem with a counter store transaction: {0}")]
	Tx(String),

	/// The transaction was already cancelled or committed
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// The current transaction was created as read-only
	#[error("Couldn't write to a read only transaction")]
	TxReadonly,

	/// No counter row has been provisioned for the requested table
	#[error("No counter row has been provisioned for table '{table}'")]
	CounterRowMissing {
		table: String,
	},

	/// A request asked for more ids than one reserved block holds
	#[error(
		"Requested {requested} ids for table '{table}', but the configured block quantity is {quantity}"
	)]
	QuantityExceeded {
		table: String,
		requested: u32,
		quantity: i64,
	},

	/// An allocated id does not fit in the requested integer type
	#[error("The id {id} does not fit in the requested integer type")]
	IdOutOfRange {
		id: i64,
	},

	/// A counter row holds values the allocator cannot work with
	#[error("The counter row for table '{table}' is malformed: {message}")]
	CorruptCounterRow {
		table: String,
		message: String,
	},
}

impl Error {
	/// Creates a new unreachable-logic error.
	pub fn unreachable(message: impl Display) -> Self {
		Error::Unreachable(message.to_string())
	}
}
