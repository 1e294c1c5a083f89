//! Verification cache coordinating key refresh, coalescing, and error tolerance.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use jsonwebtoken::{TokenData, jwk::JwkSet};
use serde::de::DeserializeOwned;
use tokio::{
	sync::{Mutex, RwLock, watch},
	time,
};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, FetchOutcome},
		state::{CacheState, FreshnessWindow},
	},
	config::RetryPolicy,
	http::{
		client::HttpKeySource,
		retry::{AttemptBudget, RetryExecutor},
	},
	keys::KeySet,
	metrics::{self, IssuerMetrics},
	source::KeySource,
};

type InFlight = watch::Receiver<Option<FetchOutcome>>;

/// Key cache for a single issuer.
///
/// Clones share the same state. At most one fetch runs per cache; callers that need its result
/// wait on a broadcast of the outcome instead of issuing their own request.
pub struct VerificationCache<S = HttpKeySource> {
	inner: Arc<Inner<S>>,
}
impl<S> VerificationCache<S>
where
	S: KeySource,
{
	/// Create an uninitialized cache for `issuer`, routed and labelled by `domain_key`.
	pub fn new(
		issuer: Url,
		domain_key: impl Into<String>,
		source: S,
		window: FreshnessWindow,
		retry_policy: RetryPolicy,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				issuer,
				domain_key: domain_key.into(),
				source,
				window,
				retry_policy,
				entry: RwLock::new(CacheEntry::new()),
				single_flight: Mutex::new(None),
				metrics: IssuerMetrics::new(),
			}),
		}
	}

	/// Issuer endpoint the keys are fetched from.
	pub fn issuer(&self) -> &Url {
		&self.inner.issuer
	}

	/// Issuer identifier expected in the `iss` claim of tokens.
	pub fn issuer_id(&self) -> &str {
		self.inner.issuer.as_str().trim_end_matches('/')
	}

	/// `scheme://host` routing key the issuer is registered under.
	pub fn domain_key(&self) -> &str {
		&self.inner.domain_key
	}

	/// Freshness window applied to fetched keys.
	pub fn window(&self) -> FreshnessWindow {
		self.inner.window
	}

	/// Per-issuer metrics accumulator.
	pub fn metrics(&self) -> Arc<IssuerMetrics> {
		self.inner.metrics.clone()
	}

	/// Whether both handles refer to the same cache.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Current lifecycle state.
	pub async fn state(&self) -> CacheState {
		self.inner.entry.read().await.state(&self.inner.window, Instant::now())
	}

	/// Capture the cache entry for status reporting.
	pub async fn snapshot(&self) -> CacheSnapshot {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let entry = { self.inner.entry.read().await.clone() };
		let state = entry.state(&self.inner.window, captured_at);

		CacheSnapshot { captured_at, captured_at_wallclock, state, entry }
	}

	/// Current verification keys of the issuer.
	///
	/// Fresh keys are returned directly. Stale keys are returned while a single background
	/// refresh runs, and keep being returned after failed refreshes until the error tolerance
	/// window is exhausted. Past that point, or before the first successful fetch, callers wait
	/// for a fetch and receive [`Error::VerificationUnavailable`] when it fails.
	///
	/// Keys left idle beyond TTL plus tolerance are not served, so the first lookup after a long
	/// idle period waits for a fetch and fails closed if the issuer is unreachable.
	#[tracing::instrument(skip(self), fields(issuer = %self.inner.domain_key))]
	pub async fn get_verification_capability(&self) -> Result<KeySet> {
		let now = Instant::now();
		let observed = {
			let entry = self.inner.entry.read().await;

			Observation::capture(&entry, &self.inner, now)
		};

		match (observed.state, observed.keys) {
			(CacheState::Fresh, Some(keys)) => {
				self.observe_hit(false);

				Ok(keys)
			},
			(CacheState::Stale, Some(keys)) if observed.within_tolerance => {
				tracing::debug!("keys are stale; serving them while revalidating");

				self.refresh_in_background(observed.generation).await;
				self.observe_hit(true);

				Ok(keys)
			},
			(CacheState::Degraded, Some(keys)) => {
				if observed.cooldown_elapsed {
					tracing::debug!(
						error_count = observed.error_count,
						"keys degraded; retrying refresh in background"
					);

					self.refresh_in_background(observed.generation).await;
				}

				self.observe_hit(true);

				Ok(keys)
			},
			(CacheState::Failed, _) if !observed.cooldown_elapsed => {
				let source = observed.last_error.unwrap_or_else(|| {
					Arc::new(Error::Cache("Issuer failed without a recorded error.".into()))
				});

				self.observe_unavailable();

				Err(self.unavailable(source))
			},
			_ => self.await_refresh(observed.generation).await,
		}
	}

	/// Verify a compact JWT against the current keys of this issuer.
	pub async fn verify<C>(&self, token: &str, audience: &[&str]) -> Result<TokenData<C>>
	where
		C: DeserializeOwned,
	{
		let keys = self.get_verification_capability().await?;

		keys.verify(token, self.issuer_id(), audience)
	}

	/// Force a refresh and wait for its outcome, joining one that is already running.
	#[tracing::instrument(skip(self), fields(issuer = %self.inner.domain_key))]
	pub async fn refresh(&self) -> Result<KeySet> {
		self.settle(None).await.map_err(|source| Error::Refresh {
			issuer: self.inner.issuer.to_string(),
			source,
		})
	}

	async fn await_refresh(&self, generation: u64) -> Result<KeySet> {
		match self.settle(Some(generation)).await {
			Ok(keys) => {
				self.observe_miss();

				Ok(keys)
			},
			Err(source) => {
				self.observe_unavailable();

				Err(self.unavailable(source))
			},
		}
	}

	async fn refresh_in_background(&self, generation: u64) {
		// Dropping the receiver leaves the spawned refresh running.
		let _ = self.join_refresh(Some(generation)).await;
	}

	async fn settle(&self, seen_generation: Option<u64>) -> FetchOutcome {
		match self.join_refresh(seen_generation).await {
			Join::Settled(outcome) => outcome,
			Join::Pending(in_flight) => wait_outcome(in_flight).await,
		}
	}

	/// Join the in-flight refresh or start one.
	///
	/// When `seen_generation` is given and an attempt settled since the caller read the entry,
	/// that outcome is returned instead of starting another fetch.
	async fn join_refresh(&self, seen_generation: Option<u64>) -> Join {
		let mut slot = self.inner.single_flight.lock().await;

		if let Some(in_flight) = slot.as_ref()
			&& in_flight.has_changed().is_ok()
		{
			return Join::Pending(in_flight.clone());
		}
		if let Some(seen) = seen_generation {
			let entry = self.inner.entry.read().await;

			if entry.generation() != seen
				&& let Some(outcome) = entry.outcome()
			{
				return Join::Settled(outcome);
			}
		}

		let (publisher, in_flight) = watch::channel(None);

		*slot = Some(in_flight.clone());

		drop(slot);

		let cache = self.clone();

		tokio::spawn(async move { cache.run_refresh(publisher).await });

		Join::Pending(in_flight)
	}

	#[tracing::instrument(skip_all, fields(issuer = %self.inner.domain_key))]
	async fn run_refresh(self, publisher: watch::Sender<Option<FetchOutcome>>) {
		let started = Instant::now();
		let fetched = self.fetch_with_retry().await;
		let now = Instant::now();
		let outcome = {
			let mut entry = self.inner.entry.write().await;

			match fetched {
				Ok(jwks) => {
					let keys = KeySet::new(jwks);

					entry.record_success(keys.clone(), now, Utc::now());

					Ok(keys)
				},
				Err(err) => {
					let err = Arc::new(err);

					entry.record_failure(err.clone(), now);

					Err(err)
				},
			}
		};

		match &outcome {
			Ok(keys) => {
				tracing::info!(keys = keys.len(), "issuer keys refreshed");

				self.observe_refresh_success(started.elapsed());
			},
			Err(err) => {
				tracing::warn!(error = %err, "issuer key refresh failed");

				self.observe_refresh_error();
			},
		}

		// Vacate the slot before publishing so late callers see the committed generation.
		*self.inner.single_flight.lock().await = None;

		publisher.send_replace(Some(outcome));
	}

	async fn fetch_with_retry(&self) -> Result<JwkSet> {
		let mut executor = RetryExecutor::new(&self.inner.retry_policy);
		let mut last_error = None;

		while let AttemptBudget::Granted { timeout } = executor.attempt_budget() {
			let attempt = self.inner.source.fetch_keys(&self.inner.issuer, timeout);

			match time::timeout(timeout, attempt).await {
				Ok(Ok(jwks)) => return Ok(jwks),
				Ok(Err(err)) => {
					tracing::debug!(error = %err, "key fetch attempt failed");

					last_error = Some(err);
				},
				Err(_) => {
					tracing::debug!(?timeout, "key fetch attempt timed out");

					last_error = Some(Error::Timeout { url: self.inner.issuer.clone(), timeout });
				},
			}

			match executor.next_backoff() {
				Some(delay) if !delay.is_zero() => time::sleep(delay).await,
				Some(_) => {},
				None => break,
			}
		}

		Err(last_error.unwrap_or_else(|| Error::Cache("Refresh attempts exhausted.".into())))
	}

	fn unavailable(&self, source: Arc<Error>) -> Error {
		Error::VerificationUnavailable { issuer: self.inner.issuer.to_string(), source }
	}

	fn observe_hit(&self, stale: bool) {
		metrics::record_resolve_hit(&self.inner.domain_key, stale);

		self.inner.metrics.record_hit(stale);
	}

	fn observe_miss(&self) {
		metrics::record_resolve_miss(&self.inner.domain_key);

		self.inner.metrics.record_miss();
	}

	fn observe_unavailable(&self) {
		metrics::record_unavailable(&self.inner.domain_key);

		self.inner.metrics.record_unavailable();
	}

	fn observe_refresh_success(&self, duration: Duration) {
		metrics::record_refresh_success(&self.inner.domain_key, duration);

		self.inner.metrics.record_refresh_success(duration);
	}

	fn observe_refresh_error(&self) {
		metrics::record_refresh_error(&self.inner.domain_key);

		self.inner.metrics.record_refresh_error();
	}
}
impl<S> Clone for VerificationCache<S> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<S> Debug for VerificationCache<S> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("VerificationCache")
			.field("issuer", &self.inner.issuer.as_str())
			.field("domain_key", &self.inner.domain_key)
			.field("window", &self.inner.window)
			.finish_non_exhaustive()
	}
}

/// Snapshot of cache state captured for status reporting.
#[derive(Clone, Debug)]
pub struct CacheSnapshot {
	/// Monotonic instant when the snapshot was taken.
	pub captured_at: Instant,
	/// Wall-clock timestamp that aligns with `captured_at`.
	pub captured_at_wallclock: DateTime<Utc>,
	/// State classified at capture time.
	pub state: CacheState,
	/// Entry contents at capture time.
	pub entry: CacheEntry,
}
impl CacheSnapshot {
	/// Convert a monotonic instant recorded by the cache into UTC.
	pub fn to_datetime(&self, instant: Instant) -> Option<DateTime<Utc>> {
		if let Some(delta) = instant.checked_duration_since(self.captured_at) {
			let chrono = TimeDelta::from_std(delta).ok()?;

			self.captured_at_wallclock.checked_add_signed(chrono)
		} else if let Some(delta) = self.captured_at.checked_duration_since(instant) {
			let chrono = TimeDelta::from_std(delta).ok()?;

			self.captured_at_wallclock.checked_sub_signed(chrono)
		} else {
			None
		}
	}
}

struct Inner<S> {
	issuer: Url,
	domain_key: String,
	source: S,
	window: FreshnessWindow,
	retry_policy: RetryPolicy,
	entry: RwLock<CacheEntry>,
	single_flight: Mutex<Option<InFlight>>,
	metrics: Arc<IssuerMetrics>,
}

struct Observation {
	state: CacheState,
	keys: Option<KeySet>,
	generation: u64,
	error_count: u32,
	within_tolerance: bool,
	cooldown_elapsed: bool,
	last_error: Option<Arc<Error>>,
}
impl Observation {
	fn capture<S>(entry: &CacheEntry, inner: &Inner<S>, now: Instant) -> Self {
		Self {
			state: entry.state(&inner.window, now),
			keys: entry.keys().cloned(),
			generation: entry.generation(),
			error_count: entry.error_count(),
			within_tolerance: entry
				.last_success_at()
				.is_some_and(|at| inner.window.within_tolerance(at, now)),
			cooldown_elapsed: entry.cooldown_elapsed(inner.retry_policy.failure_cooldown, now),
			last_error: entry.last_error().cloned(),
		}
	}
}

enum Join {
	Settled(FetchOutcome),
	Pending(InFlight),
}

async fn wait_outcome(mut in_flight: InFlight) -> FetchOutcome {
	match in_flight.wait_for(Option::is_some).await {
		Ok(settled) => (*settled).clone().unwrap_or_else(refresh_lost),
		Err(_) => refresh_lost(),
	}
}

fn refresh_lost() -> FetchOutcome {
	Err(Arc::new(Error::Cache("Refresh task ended without publishing an outcome.".into())))
}
