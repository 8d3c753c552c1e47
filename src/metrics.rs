//! Metrics helpers and JWKS cache telemetry bookkeeping.
//!
//! Everything is emitted through the `metrics` facade; enable the `prometheus` feature and call
//! `install_default_exporter` to expose the samples without wiring a recorder yourself.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "cognito_jwks_requests_total";
const METRIC_HITS_TOTAL: &str = "cognito_jwks_hits_total";
const METRIC_STALE_TOTAL: &str = "cognito_jwks_stale_total";
const METRIC_REFRESH_ERRORS: &str = "cognito_jwks_refresh_errors_total";
const METRIC_MISSES_TOTAL: &str = "cognito_jwks_misses_total";
const METRIC_REFRESH_TOTAL: &str = "cognito_jwks_refresh_total";
const METRIC_REFRESH_DURATION: &str = "cognito_jwks_refresh_duration_seconds";
const METRIC_GUARD_DECISIONS: &str = "cognito_guard_decisions_total";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Outcome of a single guard invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
	/// The request carried a verified token.
	Allowed,
	/// No token, or the verifier produced no claims.
	Unauthorized,
	/// The verifier rejected the token.
	Rejected,
	/// Verification could not complete.
	Failed,
}
impl GuardDecision {
	fn as_label(self) -> &'static str {
		match self {
			Self::Allowed => "allowed",
			Self::Unauthorized => "unauthorized",
			Self::Rejected => "rejected",
			Self::Failed => "failed",
		}
	}
}

/// In-process lookup counters for one key cache, read back by the status report.
#[derive(Debug, Default)]
pub struct JwksMetrics {
	lookups: AtomicU64,
	hits: AtomicU64,
	stale: AtomicU64,
	refresh_errors: AtomicU64,
}
impl JwksMetrics {
	/// Zeroed counters.
	pub fn new() -> Arc<Self> {
		Arc::default()
	}

	/// Count a lookup answered from memory.
	pub fn record_hit(&self, stale: bool) {
		for counter in [&self.lookups, &self.hits] {
			counter.fetch_add(1, Ordering::Relaxed);
		}
		if stale {
			self.stale.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Count a lookup that had to go upstream.
	pub fn record_miss(&self) {
		self.lookups.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a refresh that ended without usable keys.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Current counter values.
	pub fn snapshot(&self) -> JwksMetricsSnapshot {
		let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

		JwksMetricsSnapshot {
			total_requests: load(&self.lookups),
			cache_hits: load(&self.hits),
			stale_serves: load(&self.stale),
			refresh_errors: load(&self.refresh_errors),
		}
	}
}

/// Counter values captured by [`JwksMetrics::snapshot`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JwksMetricsSnapshot {
	/// Key lookups.
	pub total_requests: u64,
	/// Lookups answered from memory, stale ones included.
	pub cache_hits: u64,
	/// Lookups answered with expired keys.
	pub stale_serves: u64,
	/// Refreshes that failed.
	pub refresh_errors: u64,
}
impl JwksMetricsSnapshot {
	/// Share of lookups answered from memory; zero before the first lookup.
	pub fn hit_rate(&self) -> f64 {
		share(self.cache_hits, self.total_requests)
	}

	/// Share of lookups answered with expired keys.
	pub fn stale_ratio(&self) -> f64 {
		share(self.stale_serves, self.total_requests)
	}
}

fn share(part: u64, whole: u64) -> f64 {
	if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a cache hit, tagging whether it was served stale.
pub fn record_resolve_hit(user_pool: &str, stale: bool) {
	let labels = pool_labels(user_pool);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

	if stale {
		metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
	}
}

/// Record a cache miss that required an upstream fetch.
pub fn record_resolve_miss(user_pool: &str) {
	let labels = pool_labels(user_pool);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
}

/// Record a successful refresh attempt along with its latency.
pub fn record_refresh_success(user_pool: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(user_pool, "success").iter())
		.increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, pool_labels(user_pool).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed refresh attempt.
pub fn record_refresh_error(user_pool: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(user_pool, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, pool_labels(user_pool).iter()).increment(1);
}

/// Record the outcome of a guard invocation.
pub fn record_guard_decision(decision: GuardDecision) {
	metrics::counter!(METRIC_GUARD_DECISIONS, "outcome" => decision.as_label()).increment(1);
}

fn pool_labels(user_pool: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("user_pool", user_pool.to_owned()));

	labels
}

fn status_labels(user_pool: &str, status: &'static str) -> LabelSet {
	let mut labels = pool_labels(user_pool);

	labels.push(Label::new("status", status));

	labels
}
