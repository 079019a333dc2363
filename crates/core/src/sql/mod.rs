//! Structured forms of the statements issued against the counter store.
//!
//! The allocator only ever issues two statement shapes: an `UPDATE` of one
//! counter-row column and a `SELECT` of counter-row columns, both filtered by
//! equality conditions. Keeping the statements structured rather than as SQL
//! text lets a SQL backend render them with [`Display`] and bind
//! [`params`](Update::params) positionally, while the in-memory backend
//! evaluates them directly without a SQL parser.

use std::fmt::{self, Display};

/// A value bound to a statement parameter or stored in a row column.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Value {
	/// An integer column value
	Int(i64),
	/// A text column value
	Text(String),
}

impl Value {
	/// Returns the integer form of this value, if it is one.
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			Value::Text(_) => None,
		}
	}
	/// Returns the text form of this value, if it is one.
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Value::Int(_) => None,
			Value::Text(v) => Some(v),
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Value::Int(v) => write!(f, "{v}"),
			Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
		}
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_owned())
	}
}

/// An `UPDATE` statement assigning columns on the rows matching every
/// equality condition.
#[derive(Clone, Debug)]
pub struct Update {
	pub table: String,
	pub set: Vec<(String, Value)>,
	pub cond: Vec<(String, Value)>,
}

impl Update {
	/// Starts a new update of the specified table.
	pub fn new(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			set: Vec::new(),
			cond: Vec::new(),
		}
	}
	/// Assigns a value to a column.
	pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
		self.set.push((column.into(), value.into()));
		self
	}
	/// Restricts the update to rows where the column equals the value.
	pub fn cond(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
		self.cond.push((column.into(), value.into()));
		self
	}
	/// The parameter values in placeholder order: assignments, then conditions.
	pub fn params(&self) -> Vec<&Value> {
		self.set.iter().chain(self.cond.iter()).map(|(_, v)| v).collect()
	}
}

impl Display for Update {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "UPDATE {} SET ", self.table)?;
		for (i, (column, _)) in self.set.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{column} = ?")?;
		}
		for (i, (column, _)) in self.cond.iter().enumerate() {
			f.write_str(if i == 0 {
				" WHERE "
			} else {
				" AND "
			})?;
			write!(f, "{column} = ?")?;
		}
		Ok(())
	}
}

/// A `SELECT` statement fetching columns from the rows matching every
/// equality condition.
#[derive(Clone, Debug)]
pub struct Select {
	pub table: String,
	pub fields: Vec<String>,
	pub cond: Vec<(String, Value)>,
}

impl Select {
	/// Starts a new query against the specified table.
	pub fn new(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			fields: Vec::new(),
			cond: Vec::new(),
		}
	}
	/// Adds a column to the projection.
	pub fn field(mut self, column: impl Into<String>) -> Self {
		self.fields.push(column.into());
		self
	}
	/// Restricts the query to rows where the column equals the value.
	pub fn cond(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
		self.cond.push((column.into(), value.into()));
		self
	}
	/// The parameter values in placeholder order.
	pub fn params(&self) -> Vec<&Value> {
		self.cond.iter().map(|(_, v)| v).collect()
	}
}

impl Display for Select {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("SELECT ")?;
		for (i, column) in self.fields.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			f.write_str(column)?;
		}
		write!(f, " FROM {}", self.table)?;
		for (i, (column, _)) in self.cond.iter().enumerate() {
			f.write_str(if i == 0 {
				" WHERE "
			} else {
				" AND "
			})?;
			write!(f, "{column} = ?")?;
		}
		Ok(())
	}
}
