//! Issuer configuration, retry policy, and validation.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Cache TTL applied when the configured value is zero.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
/// Error tolerance window applied when the configured value is zero.
pub const DEFAULT_ERROR_TOLERANCE: Duration = Duration::from_secs(60);
/// Default size guard (1 MiB) for discovery and key set documents.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 80% and 100% of the current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry configuration for key fetch operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual fetch attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Minimum spacing between refresh attempts once a refresh has failed.
	pub failure_cooldown: Duration,
	/// Strategy used to randomize the computed backoff.
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Exponential backoff for a retry attempt with the selected jitter applied.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, attempt)
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(3),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(8),
			failure_cooldown: Duration::from_secs(1),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Configuration describing the issuers served by an [`IssuerManager`](crate::IssuerManager).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuerConfig {
	/// Whitespace-separated issuer base URLs; the first one is the default issuer.
	pub addr_token_provider: String,
	/// Age after which cached key material is refreshed; zero selects [`DEFAULT_CACHE_TTL`].
	#[serde(default)]
	pub cache_ttl: Duration,
	/// Grace period past the TTL during which stale keys survive failed refreshes; zero selects
	/// [`DEFAULT_ERROR_TOLERANCE`].
	#[serde(default)]
	pub error_tolerance: Duration,
	/// Reject issuer URLs that do not use HTTPS.
	#[serde(default)]
	pub require_https: bool,
	/// Maximum size allowed for discovery and key set documents in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Retry policy applied to every key fetch.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl IssuerConfig {
	/// Construct a configuration for the given issuer URLs with default cache settings.
	pub fn new(addr_token_provider: impl Into<String>) -> Self {
		Self {
			addr_token_provider: addr_token_provider.into(),
			cache_ttl: Duration::ZERO,
			error_tolerance: Duration::ZERO,
			require_https: false,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			retry_policy: RetryPolicy::default(),
		}
	}

	/// Set the cache TTL.
	pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
		self.cache_ttl = cache_ttl;

		self
	}

	/// Set the error tolerance window.
	pub fn with_error_tolerance(mut self, error_tolerance: Duration) -> Self {
		self.error_tolerance = error_tolerance;

		self
	}

	/// Set the HTTPS requirement.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the retry policy.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;

		self
	}

	/// Effective cache TTL after default substitution.
	pub fn resolved_cache_ttl(&self) -> Duration {
		if self.cache_ttl.is_zero() { DEFAULT_CACHE_TTL } else { self.cache_ttl }
	}

	/// Effective error tolerance after default substitution.
	pub fn resolved_error_tolerance(&self) -> Duration {
		if self.error_tolerance.is_zero() { DEFAULT_ERROR_TOLERANCE } else { self.error_tolerance }
	}

	/// Issuer URL tokens in configuration order.
	pub fn issuer_tokens(&self) -> impl Iterator<Item = &str> {
		self.addr_token_provider.split_whitespace()
	}

	/// Validate the non-URL settings.
	pub fn validate(&self) -> Result<()> {
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.retry_policy.validate()
	}
}
impl Default for IssuerConfig {
	fn default() -> Self {
		Self::new(String::new())
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
