//! Issuer registry built from configuration and request-time resolution.
//!
//! The manager is built once, before request handling starts, and is read-only afterwards. Every
//! configured issuer owns one [`VerificationCache`] keyed by its `scheme://host` domain key.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		manager::{CacheSnapshot, VerificationCache},
		state::{CacheState, FreshnessWindow},
	},
	config::IssuerConfig,
	context::IssuerContext,
	domain,
	http::client::HttpKeySource,
	metrics::IssuerMetricsSnapshot,
	security,
	source::KeySource,
};

/// Routes requests to the verification cache of their issuer.
#[derive(Debug)]
pub struct IssuerManager<S = HttpKeySource> {
	registry: HashMap<String, VerificationCache<S>>,
	default_cache: Option<VerificationCache<S>>,
}
impl IssuerManager<HttpKeySource> {
	/// Build a manager fetching keys over HTTP with OpenID Connect discovery.
	pub fn build(config: &IssuerConfig) -> Result<Self> {
		Self::build_with_source(config, HttpKeySource::new(config)?)
	}
}
impl<S> IssuerManager<S>
where
	S: KeySource,
{
	/// Build a manager using `source` for every configured issuer.
	///
	/// The first issuer in configuration order becomes the default. Any malformed issuer URL
	/// aborts construction.
	pub fn build_with_source(config: &IssuerConfig, source: S) -> Result<Self> {
		config.validate()?;

		let window =
			FreshnessWindow::new(config.resolved_cache_ttl(), config.resolved_error_tolerance());
		let mut registry = HashMap::new();
		let mut default_cache = None;

		for token in config.issuer_tokens() {
			let issuer = Url::parse(token)
				.map_err(|source| Error::Configuration { url: token.to_owned(), source })?;

			if config.require_https {
				security::enforce_https(&issuer)?;
			}

			let domain_key = domain::extract_domain_key(token);
			let cache = VerificationCache::new(
				issuer,
				domain_key.clone(),
				source.clone(),
				window,
				config.retry_policy.clone(),
			);

			if default_cache.is_none() {
				tracing::debug!(domain_key = %domain_key, "default issuer selected");

				default_cache = Some(cache.clone());
			}
			if let Some(replaced) = registry.insert(domain_key.clone(), cache) {
				tracing::warn!(
					domain_key = %domain_key,
					replaced = %replaced.issuer(),
					"duplicate issuer domain key; the later issuer wins"
				);
			}
		}

		tracing::info!(
			issuers = registry.len(),
			ttl = ?window.ttl,
			error_tolerance = ?window.error_tolerance,
			"issuer manager built"
		);

		Ok(Self { registry, default_cache })
	}

	/// Resolve the cache for the issuer hinted by `ctx`, falling back to the default issuer.
	pub fn resolve<C>(&self, ctx: &C) -> Result<&VerificationCache<S>>
	where
		C: IssuerContext + ?Sized,
	{
		self.resolve_domain(ctx.issuer_domain())
	}

	/// Resolve the cache for an optional issuer domain hint.
	pub fn resolve_domain(&self, hint: Option<&str>) -> Result<&VerificationCache<S>> {
		if let Some(cache) = hint.and_then(|hint| self.issuer(hint)) {
			return Ok(cache);
		}

		tracing::trace!(?hint, "issuer hint unmatched; using default issuer");

		self.default_cache
			.as_ref()
			.ok_or_else(|| Error::NoIssuerConfigured { domain: hint.map(str::to_owned) })
	}

	/// Cache registered for `domain`, normalized to its domain key first.
	pub fn issuer(&self, domain: &str) -> Option<&VerificationCache<S>> {
		self.registry.get(&domain::extract_domain_key(domain))
	}

	/// Cache of the first configured issuer.
	pub fn default_issuer(&self) -> Option<&VerificationCache<S>> {
		self.default_cache.as_ref()
	}

	/// Number of distinct domain keys.
	pub fn len(&self) -> usize {
		self.registry.len()
	}

	/// Whether no issuer is configured.
	pub fn is_empty(&self) -> bool {
		self.registry.is_empty()
	}

	/// Registered domain keys in sorted order.
	pub fn domain_keys(&self) -> Vec<&str> {
		let mut keys: Vec<_> = self.registry.keys().map(String::as_str).collect();

		keys.sort_unstable();

		keys
	}

	/// Fetch the keys of every issuer concurrently, returning how many succeeded.
	///
	/// Failures are logged and leave the affected cache to retry on demand.
	pub async fn warm(&self) -> usize {
		let mut tasks = JoinSet::new();

		for cache in self.caches() {
			let cache = cache.clone();

			tasks.spawn(async move {
				let result = cache.get_verification_capability().await;

				(cache, result)
			});
		}

		let mut warmed = 0;

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((_, Ok(_))) => warmed += 1,
				Ok((cache, Err(err))) => {
					tracing::warn!(issuer = %cache.issuer(), error = %err, "issuer warm-up failed");
				},
				Err(err) => tracing::error!(error = %err, "issuer warm-up task panicked"),
			}
		}

		warmed
	}

	/// Status of every issuer, ordered by domain key.
	pub async fn statuses(&self) -> Vec<IssuerStatus> {
		let mut statuses = Vec::new();

		for cache in self.caches() {
			let snapshot = cache.snapshot().await;

			statuses.push(IssuerStatus::from_components(
				cache,
				snapshot,
				cache.metrics().snapshot(),
			));
		}

		statuses.sort_by(|a, b| a.domain_key.cmp(&b.domain_key).then(a.issuer.cmp(&b.issuer)));

		statuses
	}

	// Registered caches plus the default when a duplicate key displaced it from the map.
	fn caches(&self) -> Vec<&VerificationCache<S>> {
		let mut caches: Vec<_> = self.registry.values().collect();

		if let Some(default_cache) = &self.default_cache
			&& !caches.iter().any(|cache| cache.ptr_eq(default_cache))
		{
			caches.push(default_cache);
		}

		caches
	}
}

/// Point-in-time status of one issuer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuerStatus {
	/// Configured issuer URL.
	pub issuer: String,
	/// Routing key derived from the issuer.
	pub domain_key: String,
	/// Lifecycle state at capture time.
	pub state: CacheState,
	/// Timestamp of the most recent successful fetch.
	pub last_success: Option<DateTime<Utc>>,
	/// Timestamp the most recent attempt completed.
	pub last_attempt: Option<DateTime<Utc>>,
	/// Message of the latest failed attempt, cleared on success.
	pub last_error: Option<String>,
	/// Consecutive failed attempts.
	pub error_count: u32,
	/// Number of keys currently served.
	pub key_count: usize,
	/// Ratio of lookups served from cached keys.
	pub hit_rate: f64,
	/// Ratio of lookups served from stale keys.
	pub stale_serve_ratio: f64,
}
impl IssuerStatus {
	fn from_components<S>(
		cache: &VerificationCache<S>,
		snapshot: CacheSnapshot,
		metrics: IssuerMetricsSnapshot,
	) -> Self
	where
		S: KeySource,
	{
		let entry = &snapshot.entry;

		Self {
			issuer: cache.issuer().to_string(),
			domain_key: cache.domain_key().to_owned(),
			state: snapshot.state,
			last_success: entry.last_success_wallclock(),
			last_attempt: entry.last_attempt_at().and_then(|at| snapshot.to_datetime(at)),
			last_error: entry.last_error().map(ToString::to_string),
			error_count: entry.error_count(),
			key_count: entry.keys().map_or(0, |keys| keys.len()),
			hit_rate: metrics.hit_rate(),
			stale_serve_ratio: metrics.stale_ratio(),
		}
	}
}
