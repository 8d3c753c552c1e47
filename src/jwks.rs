//! JWKS source configuration, retry policy, and cache status reporting.
//!
//! A [`JwksSource`] binds one Cognito user pool to the location of its signing keys and to the
//! cache tuning applied when fetching them.

// std
use std::mem;
// crates.io
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheState, manager::CacheSnapshot},
	config::VerifierAdditionalProperties,
	metrics::JwksMetricsSnapshot,
	security,
};

/// Shortest TTL accepted for a fetched key set.
pub const MIN_TTL_FLOOR: Duration = Duration::from_secs(30);
/// Redirect hops allowed at most.
pub const MAX_REDIRECTS: u8 = 10;
/// Domain suffix hosting every Cognito issuer.
pub const COGNITO_DOMAIN: &str = "amazonaws.com";

/// How retry delays are randomized.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// Exact exponential schedule.
	None,
	/// Anywhere between the initial backoff and the exponential delay.
	#[default]
	Full,
}

/// Public view of the key cache lifecycle.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JwksState {
	/// Nothing cached yet.
	Empty,
	/// First fetch running.
	Loading,
	/// Keys cached.
	Ready,
	/// Keys cached, refresh running.
	Refreshing,
}

/// Retries of a single JWKS fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
	/// Retries after the first attempt.
	pub max_retries: u32,
	/// Timeout of each HTTP attempt.
	pub attempt_timeout: Duration,
	/// Delay before the first retry; doubled for each further one.
	pub initial_backoff: Duration,
	/// Cap on the doubled delay.
	pub max_backoff: Duration,
	/// Wall-clock budget for all attempts together.
	pub deadline: Duration,
	/// Randomization of the delay.
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Check that the timings are consistent with each other.
	pub fn validate(&self) -> Result<()> {
		ensure(
			self.attempt_timeout >= Duration::from_millis(100),
			"retry_policy.attempt_timeout",
			"Must be at least 100 ms.",
		)?;
		ensure(
			!self.initial_backoff.is_zero(),
			"retry_policy.initial_backoff",
			"Must be greater than zero.",
		)?;
		ensure(
			self.max_backoff >= self.initial_backoff,
			"retry_policy.max_backoff",
			"Must not be below initial_backoff.",
		)?;
		ensure(
			self.deadline >= self.attempt_timeout,
			"retry_policy.deadline",
			"Must not be below attempt_timeout.",
		)
	}

	/// Delay before retry number `retry` (zero-based).
	pub fn compute_backoff(&self, retry: u32) -> Duration {
		let doubled = self.initial_backoff.saturating_mul(1 << retry.min(16));
		let delay = doubled.min(self.max_backoff).max(self.initial_backoff);

		match self.jitter {
			JitterStrategy::None => delay,
			JitterStrategy::Full if delay > self.initial_backoff =>
				rand::rng().random_range(self.initial_backoff..=delay),
			JitterStrategy::Full => delay,
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
			jitter: JitterStrategy::Full,
		}
	}
}

/// Tuning for how the verifier fetches and retains signing keys.
///
/// Every field is optional when deserializing; missing ones take the [`Default`] value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JwksCacheConfig {
	/// Refuse plain HTTP key URLs.
	pub require_https: bool,
	/// Hosts (and their subdomains) keys may be fetched from; empty allows any host.
	#[serde(deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_domains: Vec<String>,
	/// How long before expiry a background refresh starts.
	pub refresh_early: Duration,
	/// How long past expiry keys may still be used while refreshes fail.
	pub stale_while_error: Duration,
	/// Lower clamp for the TTL taken from response headers.
	pub min_ttl: Duration,
	/// Upper clamp for the TTL taken from response headers.
	pub max_ttl: Duration,
	/// Largest accepted JWKS body.
	pub max_response_bytes: u64,
	/// Redirect hops followed per fetch.
	pub max_redirects: u8,
	/// Upper bound of the random offset that spreads out scheduled refreshes.
	pub prefetch_jitter: Duration,
	/// Minimum spacing between refreshes triggered by tokens signed with an unknown key.
	pub kid_miss_cooldown: Duration,
	/// Retries of each fetch.
	pub retry_policy: RetryPolicy,
}
impl JwksCacheConfig {
	/// Check the settings, including the retry policy and allowlist entries.
	pub fn validate(&self) -> Result<()> {
		ensure(
			self.refresh_early >= Duration::from_secs(1),
			"refresh_early",
			"Must be at least 1 second.",
		)?;
		ensure(
			self.min_ttl >= MIN_TTL_FLOOR,
			"min_ttl",
			&format!("Must be at least {MIN_TTL_FLOOR:?}."),
		)?;
		ensure(self.max_ttl >= self.min_ttl, "max_ttl", "Must not be below min_ttl.")?;
		ensure(self.refresh_early < self.max_ttl, "refresh_early", "Must be below max_ttl.")?;
		ensure(self.max_response_bytes > 0, "max_response_bytes", "Must be greater than zero.")?;
		ensure(
			self.max_redirects <= MAX_REDIRECTS,
			"max_redirects",
			&format!("Must not exceed {MAX_REDIRECTS}."),
		)?;
		self.retry_policy.validate()?;

		for domain in &self.allowed_domains {
			let canonical = security::canonicalize_dns_name(domain);

			ensure(canonical.is_some(), "allowed_domains", "Entries must be non-empty hostnames.")?;
			ensure(
				canonical.as_deref() == Some(domain.as_str()),
				"allowed_domains",
				"Entries must be lowercase hostnames without a trailing dot.",
			)?;
		}

		Ok(())
	}
}
impl Default for JwksCacheConfig {
	fn default() -> Self {
		Self {
			require_https: true,
			allowed_domains: Vec::new(),
			refresh_early: Duration::from_secs(30),
			stale_while_error: Duration::from_secs(60),
			min_ttl: MIN_TTL_FLOOR,
			max_ttl: Duration::from_secs(60 * 60 * 24),
			max_response_bytes: 1024 * 1024,
			max_redirects: 3,
			prefetch_jitter: Duration::from_secs(5),
			kid_miss_cooldown: Duration::from_secs(60),
			retry_policy: RetryPolicy::default(),
		}
	}
}

/// Where a user pool publishes its signing keys, plus the cache tuning for fetching them.
#[derive(Clone, Debug)]
pub struct JwksSource {
	/// User pool the keys belong to; used as the metrics and log label.
	pub user_pool_id: String,
	/// URL of the JWKS document.
	pub jwks_url: Url,
	/// Cache tuning.
	pub cache: JwksCacheConfig,
}
impl JwksSource {
	/// Construct a source from an explicit URL with default cache settings.
	pub fn new(user_pool_id: impl Into<String>, jwks_url: impl AsRef<str>) -> Result<Self> {
		Ok(Self {
			user_pool_id: user_pool_id.into(),
			jwks_url: Url::parse(jwks_url.as_ref())?,
			cache: JwksCacheConfig::default(),
		})
	}

	/// Derive the source for a Cognito user pool, honouring any override in `additional`.
	///
	/// Without an override, the JWKS host is restricted to the pool's regional Cognito endpoint.
	pub fn for_user_pool(
		user_pool_id: &str,
		additional: Option<&VerifierAdditionalProperties>,
	) -> Result<Self> {
		let mut cache = additional.map(|props| props.jwks_cache.clone()).unwrap_or_default();
		let jwks_url = match additional.and_then(|props| props.jwks_uri.clone()) {
			Some(url) => url,
			None => {
				if cache.allowed_domains.is_empty() {
					cache.allowed_domains.push(cognito_host(user_pool_id)?);
				}

				Url::parse(&format!("{}/.well-known/jwks.json", cognito_issuer(user_pool_id)?))?
			},
		};

		Ok(Self { user_pool_id: user_pool_id.to_owned(), jwks_url, cache })
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.cache.require_https = require_https;

		self
	}

	/// Canonicalise the domain allowlist in-place.
	pub fn normalize_allowed_domains(&mut self) {
		let domains = mem::take(&mut self.cache.allowed_domains);

		self.cache.allowed_domains = security::normalize_allowlist(domains);
	}

	/// Validate the URL against the cache settings, then the settings themselves.
	pub fn validate(&self) -> Result<()> {
		if self.cache.require_https {
			security::enforce_https(&self.jwks_url)?;
		}

		let Some(host) = self.jwks_url.host_str() else {
			return Err(Error::Validation {
				field: "jwks_url",
				reason: "Must include a host component.".into(),
			});
		};

		if !security::host_is_allowed(host, &self.cache.allowed_domains) {
			return Err(Error::Security(format!("Host '{host}' is not in the JWKS allowlist.")));
		}

		self.cache.validate()
	}
}

/// Point-in-time report on a verifier's key cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwksStatus {
	/// User pool the keys belong to.
	pub user_pool_id: String,
	/// Cache lifecycle state.
	pub state: JwksState,
	/// Last successful fetch or revalidation.
	pub last_refresh: Option<DateTime<Utc>>,
	/// When the next refresh is due.
	pub next_refresh: Option<DateTime<Utc>>,
	/// When the cached keys expire.
	pub expires_at: Option<DateTime<Utc>>,
	/// Failed refreshes since the last successful one.
	pub error_count: u32,
	/// Share of lookups answered from memory.
	pub hit_rate: f64,
	/// Share of lookups answered with expired keys.
	pub stale_serve_ratio: f64,
	/// Failed refreshes over the cache's lifetime.
	pub refresh_errors: u64,
}
impl JwksStatus {
	pub(crate) fn from_components(
		source: &JwksSource,
		snapshot: CacheSnapshot,
		metrics: JwksMetricsSnapshot,
	) -> Self {
		let state = match &snapshot.state {
			CacheState::Empty => JwksState::Empty,
			CacheState::Loading => JwksState::Loading,
			CacheState::Ready(_) => JwksState::Ready,
			CacheState::Refreshing(_) => JwksState::Refreshing,
		};
		let payload = snapshot.state.payload();

		Self {
			user_pool_id: source.user_pool_id.clone(),
			state,
			last_refresh: payload.map(|p| p.last_refresh_at),
			next_refresh: payload.and_then(|p| snapshot.to_datetime(p.next_refresh_at)),
			expires_at: payload.and_then(|p| snapshot.to_datetime(p.expires_at)),
			error_count: payload.map_or(0, |p| p.error_count),
			hit_rate: metrics.hit_rate(),
			stale_serve_ratio: metrics.stale_ratio(),
			refresh_errors: metrics.refresh_errors,
		}
	}
}

/// Region encoded in a user pool identifier (`<region>_<suffix>`).
pub fn user_pool_region(user_pool_id: &str) -> Result<&str> {
	let invalid = |reason: &str| Error::Validation { field: "user_pool_id", reason: reason.into() };
	let (region, suffix) =
		user_pool_id.split_once('_').ok_or_else(|| invalid("Expected '<region>_<id>'."))?;

	if region.is_empty()
		|| !region.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
	{
		return Err(invalid("Region prefix may only contain lowercase letters, digits, and '-'."));
	}
	if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_alphanumeric()) {
		return Err(invalid("Pool suffix must be non-empty and alphanumeric."));
	}

	Ok(region)
}

/// Regional Cognito endpoint serving the given user pool.
pub fn cognito_host(user_pool_id: &str) -> Result<String> {
	Ok(format!("cognito-idp.{}.{COGNITO_DOMAIN}", user_pool_region(user_pool_id)?))
}

/// Issuer claim Cognito stamps on tokens minted by the given user pool.
pub fn cognito_issuer(user_pool_id: &str) -> Result<String> {
	Ok(format!("https://{}/{user_pool_id}", cognito_host(user_pool_id)?))
}

fn ensure(ok: bool, field: &'static str, reason: &str) -> Result<()> {
	if ok { Ok(()) } else { Err(Error::Validation { field, reason: reason.into() }) }
}
