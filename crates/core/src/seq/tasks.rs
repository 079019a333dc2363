//! The background housekeeper task.
//!
//! Foreground callers only block on storage when a block cache runs dry.
//! The housekeeper moves that latency off the request path: on a fixed
//! cadence it scans every table with a non-empty cache and tops up the ones
//! that have drained below their quantity target. A failed refill is logged
//! and retried on the next cycle; it never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Inner;

/// Spawns the task which refills drained block caches in the background.
pub(super) fn spawn_task_cache_refresh(
	inner: Arc<Inner>,
	canceller: CancellationToken,
) -> JoinHandle<()> {
	// Get the delay interval from the options
	let delay = inner.opts.housekeeper_interval;
	// Spawn a future
	tokio::spawn(async move {
		// Log the interval frequency
		trace!("Refreshing drained id block caches every {delay:?}");
		// Create a new time-based interval ticker
		let mut ticker = interval_ticker(delay).await;
		// Loop continuously until the task is cancelled
		loop {
			tokio::select! {
				biased;
				// Check if this has shutdown
				_ = canceller.cancelled() => break,
				// Wait out the configured interval
				_ = ticker.tick() => inner.refresh_caches().await,
			}
		}
		trace!("Background task exited: Refreshing drained id block caches");
	})
}

async fn interval_ticker(interval: Duration) -> time::Interval {
	// Create a new interval timer
	let mut ticker = time::interval(interval);
	// Don't bombard the storage engine if we miss some ticks
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// Swallow the immediate first tick, so the first scan waits a full interval
	ticker.tick().await;
	ticker
}
