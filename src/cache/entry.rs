//! The single cache entry owned by a verifier and the payload it carries.

// crates.io
use http_cache_semantics::CachePolicy;
use jsonwebtoken::jwk::JwkSet;
// self
use crate::_prelude::*;

/// Key set of a user pool plus the HTTP metadata used to schedule its next refresh.
#[derive(Clone, Debug)]
pub struct CachePayload {
	/// Published signing keys.
	pub jwks: Arc<JwkSet>,
	/// Cache policy of the response the keys came from.
	pub policy: CachePolicy,
	/// `ETag` of that response, replayed as `If-None-Match`.
	pub etag: Option<String>,
	/// `Last-Modified` of that response.
	pub last_modified: Option<DateTime<Utc>>,
	/// When the keys were last fetched or revalidated.
	pub last_refresh_at: DateTime<Utc>,
	/// Keys must not be used for verification past this point unless stale serving applies.
	pub expires_at: Instant,
	/// Earliest time for the next refresh; pushed back after failures.
	pub next_refresh_at: Instant,
	/// Expired keys remain usable until this point while refreshes keep failing.
	pub stale_deadline: Option<Instant>,
	/// Failed refreshes since the last successful one.
	pub error_count: u32,
}
impl CachePayload {
	/// Whether `now` is past [`Self::expires_at`].
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	/// Whether `now` still falls inside the stale window.
	pub fn can_serve_stale(&self, now: Instant) -> bool {
		matches!(self.stale_deadline, Some(deadline) if now <= deadline)
	}
}

/// Where the entry is in its lifecycle.
#[derive(Clone, Debug)]
pub enum CacheState {
	/// Nothing cached.
	Empty,
	/// First fetch in flight.
	Loading,
	/// Keys cached.
	Ready(CachePayload),
	/// Keys cached; a background refresh is in flight.
	Refreshing(CachePayload),
}
impl CacheState {
	/// Cached payload, in the `Ready` and `Refreshing` states.
	pub fn payload(&self) -> Option<&CachePayload> {
		match self {
			Self::Ready(payload) | Self::Refreshing(payload) => Some(payload),
			_ => None,
		}
	}
}

/// The cached key set of one user pool and its lifecycle state.
#[derive(Clone, Debug)]
pub struct CacheEntry {
	user_pool_id: Arc<str>,
	state: CacheState,
}
impl CacheEntry {
	/// Create an empty entry.
	pub fn new(user_pool_id: impl Into<Arc<str>>) -> Self {
		Self { user_pool_id: user_pool_id.into(), state: CacheState::Empty }
	}

	/// User pool this entry caches keys for.
	pub fn user_pool_id(&self) -> &str {
		&self.user_pool_id
	}

	/// Inspect the current cache state.
	pub fn state(&self) -> &CacheState {
		&self.state
	}

	/// Move `Empty` to `Loading`; returns false in any other state.
	pub fn begin_load(&mut self) -> bool {
		if matches!(self.state, CacheState::Empty) {
			self.state = CacheState::Loading;

			true
		} else {
			false
		}
	}

	/// Move `Ready` to `Refreshing` once the scheduled refresh is due.
	pub fn begin_refresh(&mut self, now: Instant) -> bool {
		match &self.state {
			CacheState::Ready(payload) if now >= payload.next_refresh_at => {
				self.state = CacheState::Refreshing(payload.clone());

				true
			},
			_ => false,
		}
	}

	/// Store a freshly fetched payload; valid from any state.
	pub fn store(&mut self, mut payload: CachePayload) {
		payload.error_count = 0;
		self.state = CacheState::Ready(payload);
	}

	/// Record a refresh failure.
	///
	/// The previous payload survives, with its next refresh pushed out by `next_backoff`, as long
	/// as it may still be served stale; otherwise the entry is cleared.
	pub fn refresh_failure(&mut self, now: Instant, next_backoff: Option<Duration>) {
		self.state = match std::mem::replace(&mut self.state, CacheState::Empty) {
			CacheState::Refreshing(mut payload) | CacheState::Ready(mut payload) => {
				payload.error_count = payload.error_count.saturating_add(1);

				if let Some(delay) = next_backoff {
					payload.next_refresh_at = now + delay;
				}

				if payload.can_serve_stale(now) || !payload.is_expired(now) {
					CacheState::Ready(payload)
				} else {
					CacheState::Empty
				}
			},
			CacheState::Loading | CacheState::Empty => CacheState::Empty,
		};
	}

	/// Retrieve a clone of the cached payload if present.
	pub fn snapshot(&self) -> Option<CachePayload> {
		self.state.payload().cloned()
	}
}
