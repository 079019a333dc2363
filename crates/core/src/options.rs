use std::time::Duration;

use crate::cnf;

/// Configuration for the allocator behaviour
///
/// The defaults are read from the environment-tunable values in [`crate::cnf`],
/// so please only modify these if you know deliberately why you are modifying them.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Options {
	/// Whether the background housekeeper task is started at construction.
	pub prefetch: bool,
	/// Whether block quantities grow automatically under sustained demand.
	pub adaptive_quantity: bool,
	/// How long the housekeeper sleeps between cache scans.
	pub housekeeper_interval: Duration,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			prefetch: *cnf::PREFETCH_ENABLED,
			adaptive_quantity: *cnf::ADAPTIVE_QUANTITY_ENABLED,
			housekeeper_interval: Duration::from_secs(*cnf::HOUSEKEEPER_INTERVAL),
		}
	}
}

impl Options {
	pub fn with_prefetch(mut self, prefetch: bool) -> Self {
		self.prefetch = prefetch;
		self
	}
	pub fn with_adaptive_quantity(mut self, adaptive: bool) -> Self {
		self.adaptive_quantity = adaptive;
		self
	}
	pub fn with_housekeeper_interval(mut self, interval: Duration) -> Self {
		self.housekeeper_interval = interval;
		self
	}
}
