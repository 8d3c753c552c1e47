//! Key retrieval, caching, and background refresh for one user pool.

// crates.io
use http::{
	HeaderValue, Request, Response,
	header::{ETAG, IF_NONE_MATCH, LAST_MODIFIED},
};
use http_cache_semantics::BeforeRequest;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use rand::Rng;
use reqwest::Client;
use tokio::{
	sync::{Mutex, RwLock},
	time,
};
// self
use crate::{
	_prelude::*,
	cache::entry::{CacheEntry, CachePayload, CacheState},
	http::{
		client::{HttpFetch, fetch_jwks, header_string},
		retry::FetchAttempts,
		semantics::{
			Freshness, base_request, evaluate_freshness, evaluate_revalidation,
			preloaded_freshness,
		},
	},
	jwks::{JwksSource, JwksStatus},
	metrics::{self, JwksMetrics},
	security,
};

/// Coordinates fetching, caching, and background refresh of a user pool's signing keys.
///
/// Clones share the same cache; refreshes are serialised by a single-flight lock.
#[derive(Clone, Debug)]
pub struct JwksCache {
	source: Arc<JwksSource>,
	client: Client,
	entry: Arc<RwLock<CacheEntry>>,
	single_flight: Arc<Mutex<()>>,
	last_forced_refresh: Arc<Mutex<Option<Instant>>>,
	metrics: Arc<JwksMetrics>,
}
impl JwksCache {
	/// Validate `source` and build a cache with a client that screens redirects.
	pub fn new(mut source: JwksSource) -> Result<Self> {
		source.normalize_allowed_domains();
		source.validate()?;

		let client = Client::builder()
			.redirect(security::redirect_policy(&source.cache))
			.user_agent(format!("cognito-guard/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(source, client))
	}

	/// Build a cache around the supplied HTTP client without validating the source.
	pub fn with_client(source: JwksSource, client: Client) -> Self {
		let entry = CacheEntry::new(source.user_pool_id.as_str());

		Self {
			source: Arc::new(source),
			client,
			entry: Arc::new(RwLock::new(entry)),
			single_flight: Arc::new(Mutex::new(())),
			last_forced_refresh: Arc::new(Mutex::new(None)),
			metrics: JwksMetrics::new(),
		}
	}

	/// Where keys are fetched from.
	pub fn source(&self) -> &JwksSource {
		&self.source
	}

	/// Access the cache's metrics accumulator.
	pub fn metrics(&self) -> Arc<JwksMetrics> {
		self.metrics.clone()
	}

	/// Capture the current cache state.
	pub async fn snapshot(&self) -> CacheSnapshot {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let state = self.entry.read().await.state().clone();

		CacheSnapshot { captured_at, captured_at_wallclock, state }
	}

	/// Project the cache state and counters into a status report.
	pub async fn status(&self) -> JwksStatus {
		JwksStatus::from_components(&self.source, self.snapshot().await, self.metrics.snapshot())
	}

	/// Seed the cache with a key set obtained out of band, fresh for `ttl` (clamped to the
	/// source's TTL bounds).
	pub async fn preload(&self, jwks: JwkSet, ttl: Duration) -> Result<()> {
		let freshness = preloaded_freshness(&self.source, ttl)?;
		let payload = self.build_payload(Arc::new(jwks), freshness, None, None);

		self.entry.write().await.store(payload);

		tracing::debug!(user_pool = %self.source.user_pool_id, "preloaded key set");

		Ok(())
	}

	/// Find the key with the given `kid`.
	///
	/// An unknown `kid` forces one refresh, at most once per `kid_miss_cooldown`, so that
	/// rotated keys are picked up before the cached set expires.
	pub async fn find_key(&self, kid: &str) -> Result<Jwk> {
		let jwks = self.resolve().await?;

		if let Some(key) = jwks.find(kid) {
			return Ok(key.clone());
		}
		if !self.claim_forced_refresh().await {
			tracing::debug!(kid, "unknown kid within refresh cooldown");

			return Err(Error::KeyNotFound { kid: kid.into() });
		}

		tracing::info!(user_pool = %self.source.user_pool_id, kid, "unknown kid; refreshing key set");

		let jwks = match self.refresh_blocking(true).await? {
			RefreshOutcome::Updated { jwks, .. } | RefreshOutcome::Stale(jwks) => jwks,
		};

		jwks.find(kid).cloned().ok_or_else(|| Error::KeyNotFound { kid: kid.into() })
	}

	/// Resolve the key set, fetching upstream when necessary.
	#[tracing::instrument(skip(self), fields(user_pool = %self.source.user_pool_id))]
	pub async fn resolve(&self) -> Result<Arc<JwkSet>> {
		loop {
			let snapshot = self.entry.read().await.snapshot();
			let now = Instant::now();
			let Some(payload) = snapshot else {
				tracing::debug!("cache empty; performing initial fetch");

				let outcome = self.refresh_blocking(false).await?;

				return Ok(self.observe_outcome(outcome));
			};

			if !payload.is_expired(now) {
				self.observe_hit(false);

				if now >= payload.next_refresh_at {
					self.schedule_background_refresh(now).await;
				}

				return Ok(payload.jwks);
			}
			if payload.can_serve_stale(now) {
				match self.refresh_blocking(false).await {
					Ok(outcome) => return Ok(self.observe_outcome(outcome)),
					Err(err) if payload.can_serve_stale(Instant::now()) => {
						tracing::warn!(error = %err, "refresh failed, serving stale keys");

						self.observe_hit(true);

						return Ok(payload.jwks);
					},
					Err(err) => return Err(err),
				}
			}
			if let RefreshOutcome::Updated { jwks, from_cache } = self.refresh_blocking(true).await?
			{
				return Ok(self.observe_outcome(RefreshOutcome::Updated { jwks, from_cache }));
			}
		}
	}

	/// Trigger a refresh: blocking when nothing is cached, in the background otherwise.
	#[tracing::instrument(skip(self), fields(user_pool = %self.source.user_pool_id))]
	pub async fn trigger_refresh(&self) -> Result<()> {
		let spawned = {
			let mut entry = self.entry.write().await;
			let due = match entry.state() {
				CacheState::Empty => None,
				CacheState::Ready(payload) => Some(payload.next_refresh_at.max(Instant::now())),
				CacheState::Loading | CacheState::Refreshing(_) => return Ok(()),
			};

			due.map(|due| entry.begin_refresh(due))
		};

		match spawned {
			None => self.refresh_blocking(true).await.map(drop),
			Some(true) => {
				self.spawn_refresh("manual refresh failed");

				Ok(())
			},
			Some(false) => Ok(()),
		}
	}

	async fn claim_forced_refresh(&self) -> bool {
		let mut last = self.last_forced_refresh.lock().await;
		let now = Instant::now();

		match *last {
			Some(at) if now.duration_since(at) < self.source.cache.kid_miss_cooldown => false,
			_ => {
				*last = Some(now);

				true
			},
		}
	}

	async fn schedule_background_refresh(&self, now: Instant) {
		let should_spawn = self.entry.write().await.begin_refresh(now);

		if should_spawn {
			self.spawn_refresh("background refresh failed");
		}
	}

	fn spawn_refresh(&self, failure: &'static str) {
		let cache = self.clone();

		tokio::spawn(async move {
			if let Err(err) = cache.refresh_blocking(true).await {
				tracing::warn!(error = %err, "{failure}");
			}
		});
	}

	async fn refresh_blocking(&self, force_revalidation: bool) -> Result<RefreshOutcome> {
		let _flight = self.single_flight.lock().await;
		let existing = {
			let mut entry = self.entry.write().await;
			let cached = entry.snapshot();

			if cached.is_none() {
				entry.begin_load();
			}

			cached
		};
		let request = match &existing {
			None => base_request(&self.source)?,
			Some(cached) => match self.conditional_request(cached, force_revalidation)? {
				Some(request) => request,
				None =>
					return Ok(RefreshOutcome::Updated { jwks: cached.jwks.clone(), from_cache: true }),
			},
		};

		self.fetch_with_retries(request, existing, force_revalidation).await
	}

	/// Request revalidating `cached`, or `None` while its cache policy still allows reuse.
	fn conditional_request(
		&self,
		cached: &CachePayload,
		force_revalidation: bool,
	) -> Result<Option<Request<()>>> {
		let base = base_request(&self.source)?;
		let (mut request, conditional) =
			match cached.policy.before_request(&base, SystemTime::now()) {
				BeforeRequest::Fresh(_) if !force_revalidation && !cached.is_expired(Instant::now()) =>
					return Ok(None),
				BeforeRequest::Stale { request, matches: true } =>
					(Request::from_parts(request, ()), true),
				_ => (base, force_revalidation),
			};

		if conditional
			&& let Some(tag) = cached.etag.as_deref().and_then(|etag| HeaderValue::from_str(etag).ok())
		{
			request.headers_mut().insert(IF_NONE_MATCH, tag);
		}

		Ok(Some(request))
	}

	async fn fetch_with_retries(
		&self,
		request: Request<()>,
		existing: Option<CachePayload>,
		force_revalidation: bool,
	) -> Result<RefreshOutcome> {
		let mut attempts = FetchAttempts::new(&self.source.cache.retry_policy);
		let mut last_error = None;
		let mut backoff = None;

		while let Some(timeout) = attempts.next_timeout() {
			let started = Instant::now();
			let fetched = fetch_jwks(&self.client, &self.source, &request, timeout)
				.await
				.and_then(|fetch| self.payload_from_fetch(fetch, existing.as_ref()));

			match fetched {
				Ok(payload) => {
					let jwks = payload.jwks.clone();

					self.entry.write().await.store(payload);
					self.observe_refresh_success(started.elapsed());

					return Ok(RefreshOutcome::Updated { jwks, from_cache: false });
				},
				Err(err) => {
					tracing::debug!(error = %err, "jwks fetch attempt failed");

					last_error = Some(err);
				},
			}

			let Some(delay) = attempts.backoff() else {
				break;
			};

			backoff = Some(delay);
			time::sleep(delay).await;
		}

		let now = Instant::now();

		self.entry.write().await.refresh_failure(now, backoff);
		self.observe_refresh_error();

		match existing {
			Some(cached) if !force_revalidation && cached.can_serve_stale(now) =>
				Ok(RefreshOutcome::Stale(cached.jwks)),
			_ => Err(last_error.unwrap_or_else(|| Error::Cache("JWKS fetch deadline elapsed.".into()))),
		}
	}

	fn payload_from_fetch(
		&self,
		fetch: HttpFetch,
		existing: Option<&CachePayload>,
	) -> Result<CachePayload> {
		let payload = match (fetch.jwks, existing) {
			(Some(jwks), _) => self.build_payload(
				jwks,
				evaluate_freshness(&self.source, &fetch.exchange),
				fetch.etag,
				fetch.last_modified,
			),
			(None, Some(previous)) => {
				let revalidated = evaluate_revalidation(
					&self.source,
					&previous.policy,
					&fetch.exchange.request,
					&fetch.exchange.response,
				);
				let etag = header_string(revalidated.response.headers(), &ETAG)
					.or_else(|| previous.etag.clone());
				let modified = last_modified(&revalidated.response).or(previous.last_modified);

				self.build_payload(previous.jwks.clone(), revalidated.freshness, etag, modified)
			},
			(None, None) =>
				return Err(Error::Cache("Got 304 Not Modified with no cached key set.".into())),
		};

		Ok(payload)
	}

	fn build_payload(
		&self,
		jwks: Arc<JwkSet>,
		freshness: Freshness,
		etag: Option<String>,
		last_modified: Option<DateTime<Utc>>,
	) -> CachePayload {
		let cache = &self.source.cache;
		let now = Instant::now();
		let expires_at = now + freshness.ttl;
		let scheduled =
			if cache.refresh_early < freshness.ttl { expires_at - cache.refresh_early } else { now };
		let jitter = random_jitter(cache.prefetch_jitter);

		CachePayload {
			jwks,
			policy: freshness.policy,
			etag,
			last_modified,
			last_refresh_at: Utc::now(),
			expires_at,
			next_refresh_at: if scheduled > now + jitter { scheduled - jitter } else { scheduled },
			stale_deadline: (!cache.stale_while_error.is_zero())
				.then(|| expires_at + cache.stale_while_error),
			error_count: 0,
		}
	}

	fn observe_outcome(&self, outcome: RefreshOutcome) -> Arc<JwkSet> {
		match outcome {
			RefreshOutcome::Updated { jwks, from_cache: true } => {
				self.observe_hit(false);

				jwks
			},
			RefreshOutcome::Updated { jwks, from_cache: false } => {
				self.observe_miss();

				jwks
			},
			RefreshOutcome::Stale(jwks) => {
				self.observe_hit(true);

				jwks
			},
		}
	}

	fn observe_hit(&self, stale: bool) {
		metrics::record_resolve_hit(&self.source.user_pool_id, stale);

		self.metrics.record_hit(stale);
	}

	fn observe_miss(&self) {
		metrics::record_resolve_miss(&self.source.user_pool_id);

		self.metrics.record_miss();
	}

	fn observe_refresh_success(&self, duration: Duration) {
		metrics::record_refresh_success(&self.source.user_pool_id, duration);
	}

	fn observe_refresh_error(&self) {
		metrics::record_refresh_error(&self.source.user_pool_id);

		self.metrics.record_refresh_error();
	}
}

/// Snapshot of cache state captured for status reporting.
#[derive(Clone, Debug)]
pub struct CacheSnapshot {
	/// Monotonic instant when the snapshot was taken.
	pub captured_at: Instant,
	/// Wall-clock timestamp that aligns with `captured_at`.
	pub captured_at_wallclock: DateTime<Utc>,
	/// Cache state recorded at capture time.
	pub state: CacheState,
}
impl CacheSnapshot {
	/// Convert a monotonic instant drawn from the cached payload into UTC.
	pub fn to_datetime(&self, instant: Instant) -> Option<DateTime<Utc>> {
		if let Some(delta) = instant.checked_duration_since(self.captured_at) {
			self.captured_at_wallclock.checked_add_signed(TimeDelta::from_std(delta).ok()?)
		} else {
			let delta = self.captured_at.checked_duration_since(instant)?;

			self.captured_at_wallclock.checked_sub_signed(TimeDelta::from_std(delta).ok()?)
		}
	}
}

#[derive(Debug)]
enum RefreshOutcome {
	Updated { jwks: Arc<JwkSet>, from_cache: bool },
	Stale(Arc<JwkSet>),
}

fn random_jitter(max: Duration) -> Duration {
	if max.is_zero() {
		return Duration::ZERO;
	}

	Duration::from_secs_f64(rand::rng().random_range(0.0..=max.as_secs_f64()))
}

fn last_modified(response: &Response<()>) -> Option<DateTime<Utc>> {
	header_string(response.headers(), &LAST_MODIFIED)
		.and_then(|raw| httpdate::parse_http_date(&raw).ok())
		.map(DateTime::<Utc>::from)
}
