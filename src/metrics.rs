//! Metrics helpers and per-issuer telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "issuer_cache_requests_total";
const METRIC_HITS_TOTAL: &str = "issuer_cache_hits_total";
const METRIC_STALE_TOTAL: &str = "issuer_cache_stale_total";
const METRIC_MISSES_TOTAL: &str = "issuer_cache_misses_total";
const METRIC_UNAVAILABLE_TOTAL: &str = "issuer_cache_unavailable_total";
const METRIC_REFRESH_TOTAL: &str = "issuer_cache_refresh_total";
const METRIC_REFRESH_DURATION: &str = "issuer_cache_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "issuer_cache_refresh_errors_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe metrics accumulator for a single issuer.
#[derive(Debug, Default)]
pub struct IssuerMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	stale_serves: AtomicU64,
	unavailable: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl IssuerMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a request served from cached keys.
	pub fn record_hit(&self, stale: bool) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);

		if stale {
			self.stale_serves.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record a request that had to wait for a fetch.
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a request rejected because the issuer is unavailable.
	pub fn record_unavailable(&self) {
		self.unavailable.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful refresh and latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record refresh failure.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> IssuerMetricsSnapshot {
		IssuerMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			unavailable: self.unavailable.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-issuer telemetry counters.
#[derive(Clone, Debug)]
pub struct IssuerMetricsSnapshot {
	/// Total number of key lookups observed.
	pub total_requests: u64,
	/// Count of lookups served from cached keys.
	pub cache_hits: u64,
	/// Count of lookups served from stale keys.
	pub stale_serves: u64,
	/// Count of lookups rejected as unavailable.
	pub unavailable: u64,
	/// Count of successful refresh operations.
	pub refresh_successes: u64,
	/// Count of refresh operations that failed.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}
impl IssuerMetricsSnapshot {
	/// Ratio of cache hits to total requests.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_requests as f64
		}
	}

	/// Ratio of stale serves to total requests.
	pub fn stale_ratio(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.stale_serves as f64 / self.total_requests as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics` and return its handle.
///
/// Multiple invocations are safe; later calls return the handle installed by the first one.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<&'static PrometheusHandle> {
	if let Some(handle) = PROMETHEUS_HANDLE.get() {
		return Ok(handle);
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;

	Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Record a lookup served from cached keys, tagging whether they were stale.
pub fn record_resolve_hit(issuer: &str, stale: bool) {
	let labels = base_labels(issuer);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

	if stale {
		metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
	}
}

/// Record a lookup that waited for an upstream fetch.
pub fn record_resolve_miss(issuer: &str) {
	let labels = base_labels(issuer);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
}

/// Record a lookup rejected because the issuer has no servable keys.
pub fn record_unavailable(issuer: &str) {
	metrics::counter!(METRIC_UNAVAILABLE_TOTAL, base_labels(issuer).iter()).increment(1);
}

/// Record a successful refresh along with its latency.
pub fn record_refresh_success(issuer: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(issuer, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(issuer).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed refresh.
pub fn record_refresh_error(issuer: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(issuer, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(issuer).iter()).increment(1);
}

fn base_labels(issuer: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("issuer", issuer.to_owned()));

	labels
}

fn status_labels(issuer: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(issuer);

	labels.push(Label::new("status", status));

	labels
}
