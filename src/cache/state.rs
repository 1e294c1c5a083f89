//! Cache state machine modelling key set freshness and error tolerance.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Freshness bounds shared by every state decision of a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessWindow {
	/// Age after which keys are stale and a refresh is due.
	pub ttl: Duration,
	/// Grace period past `ttl` during which stale keys survive failed refreshes.
	pub error_tolerance: Duration,
}
impl FreshnessWindow {
	/// Create a window from resolved durations.
	pub fn new(ttl: Duration, error_tolerance: Duration) -> Self {
		Self { ttl, error_tolerance }
	}

	/// Total lifetime of a successful fetch, TTL plus tolerance.
	pub fn max_age(&self) -> Duration {
		self.ttl.saturating_add(self.error_tolerance)
	}

	/// Whether keys fetched at `last_success_at` may still be served at `now`.
	pub fn within_tolerance(&self, last_success_at: Instant, now: Instant) -> bool {
		now.saturating_duration_since(last_success_at) < self.max_age()
	}
}

/// Cache lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CacheState {
	/// No fetch has completed yet.
	Uninitialized,
	/// Keys are younger than the TTL.
	Fresh,
	/// Keys reached the TTL and the last attempt did not fail.
	Stale,
	/// The last refresh failed but keys are still inside the tolerance window.
	Degraded,
	/// The last refresh failed and no keys may be served.
	Failed,
}
impl CacheState {
	/// Classify a cache from its bookkeeping.
	///
	/// `last_attempt_failed` must only be true when the latest completed attempt failed.
	pub fn classify(
		window: &FreshnessWindow,
		last_success_at: Option<Instant>,
		last_attempt_failed: bool,
		now: Instant,
	) -> Self {
		let Some(last_success_at) = last_success_at else {
			return if last_attempt_failed { Self::Failed } else { Self::Uninitialized };
		};
		let age = now.saturating_duration_since(last_success_at);

		if age < window.ttl {
			Self::Fresh
		} else if !last_attempt_failed {
			Self::Stale
		} else if window.within_tolerance(last_success_at, now) {
			Self::Degraded
		} else {
			Self::Failed
		}
	}
}
