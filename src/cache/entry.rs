//! Per-issuer cache entry bookkeeping.

// self
use crate::{
	_prelude::*,
	cache::state::{CacheState, FreshnessWindow},
	keys::KeySet,
};

/// Outcome of a settled fetch, shared by every caller coalesced onto it.
pub type FetchOutcome = std::result::Result<KeySet, Arc<Error>>;

/// Key material and fetch history for a single issuer.
#[derive(Clone, Debug, Default)]
pub struct CacheEntry {
	keys: Option<KeySet>,
	last_success_at: Option<Instant>,
	last_success_wallclock: Option<DateTime<Utc>>,
	last_attempt_at: Option<Instant>,
	last_error: Option<Arc<Error>>,
	error_count: u32,
	generation: u64,
}
impl CacheEntry {
	/// Create an entry that has never been fetched.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current key snapshot, kept across failed refreshes.
	pub fn keys(&self) -> Option<&KeySet> {
		self.keys.as_ref()
	}

	/// Monotonic time of the last successful fetch.
	pub fn last_success_at(&self) -> Option<Instant> {
		self.last_success_at
	}

	/// Wall-clock time of the last successful fetch.
	pub fn last_success_wallclock(&self) -> Option<DateTime<Utc>> {
		self.last_success_wallclock
	}

	/// Monotonic time the last fetch attempt completed, successful or not.
	pub fn last_attempt_at(&self) -> Option<Instant> {
		self.last_attempt_at
	}

	/// Failure of the latest attempt; cleared on success.
	pub fn last_error(&self) -> Option<&Arc<Error>> {
		self.last_error.as_ref()
	}

	/// Consecutive failed attempts.
	pub fn error_count(&self) -> u32 {
		self.error_count
	}

	/// Number of settled attempts; changes on every commit.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Classify the entry at `now`.
	pub fn state(&self, window: &FreshnessWindow, now: Instant) -> CacheState {
		CacheState::classify(window, self.last_success_at, self.last_error.is_some(), now)
	}

	/// Whether `cooldown` has passed since the last attempt.
	pub fn cooldown_elapsed(&self, cooldown: Duration, now: Instant) -> bool {
		self.last_attempt_at.is_none_or(|at| now.saturating_duration_since(at) >= cooldown)
	}

	/// Replace the key snapshot after a successful fetch.
	pub fn record_success(&mut self, keys: KeySet, now: Instant, wallclock: DateTime<Utc>) {
		self.keys = Some(keys);
		self.last_success_at = Some(now);
		self.last_success_wallclock = Some(wallclock);
		self.last_attempt_at = Some(now);
		self.last_error = None;
		self.error_count = 0;
		self.generation = self.generation.wrapping_add(1);
	}

	/// Record a failed fetch; previously fetched keys are kept.
	pub fn record_failure(&mut self, error: Arc<Error>, now: Instant) {
		self.last_attempt_at = Some(now);
		self.last_error = Some(error);
		self.error_count = self.error_count.saturating_add(1);
		self.generation = self.generation.wrapping_add(1);
	}

	/// Outcome of the latest settled attempt, if any attempt settled.
	pub fn outcome(&self) -> Option<FetchOutcome> {
		match (&self.last_error, &self.keys) {
			(Some(error), _) => Some(Err(error.clone())),
			(None, Some(keys)) => Some(Ok(keys.clone())),
			(None, None) => None,
		}
	}
}
