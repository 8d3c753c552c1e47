//! HTTP cache semantics for JWKS responses.

// crates.io
use http::{Method, Request, Response, Uri, header::ACCEPT};
use http_cache_semantics::{AfterResponse, CachePolicy};
// self
use crate::{_prelude::*, http::client::HttpExchange, jwks::JwksSource};

/// Freshness evaluation derived from HTTP headers and the source's TTL bounds.
#[derive(Clone, Debug)]
pub struct Freshness {
	/// Effective time-to-live, clamped to `[min_ttl, max_ttl]`.
	pub ttl: Duration,
	/// HTTP cache policy describing future request handling.
	pub policy: CachePolicy,
}

/// Result of applying conditional revalidation.
#[derive(Debug)]
pub struct Revalidation {
	/// Freshness resulting from the revalidation exchange.
	pub freshness: Freshness,
	/// Response synthesized from the revalidation outcome.
	pub response: Response<()>,
}

/// Build a baseline GET request for the JWKS endpoint.
pub fn base_request(source: &JwksSource) -> Result<Request<()>> {
	let uri = source.jwks_url.as_str().parse::<Uri>().map_err(|err| Error::Validation {
		field: "jwks_url",
		reason: format!("Failed to convert URL to http::Uri: {err}."),
	})?;

	Request::builder()
		.method(Method::GET)
		.uri(uri)
		.header(ACCEPT, "application/json")
		.body(())
		.map_err(Error::from)
}

/// Evaluate the TTL of a freshly fetched key set.
///
/// Responses that are not storable fall back to `min_ttl`.
pub fn evaluate_freshness(source: &JwksSource, exchange: &HttpExchange) -> Freshness {
	let policy = CachePolicy::new(&exchange.request, &exchange.response);
	let storable = policy.is_storable();
	let ttl = if storable {
		clamp_ttl(policy.time_to_live(SystemTime::now()), source)
	} else {
		source.cache.min_ttl
	};

	tracing::debug!(?ttl, storable, "evaluated freshness");

	Freshness { ttl, policy }
}

/// Evaluate cache semantics for a conditional revalidation attempt.
pub fn evaluate_revalidation(
	source: &JwksSource,
	policy: &CachePolicy,
	request: &Request<()>,
	response: &Response<()>,
) -> Revalidation {
	let now = SystemTime::now();
	let (policy, parts) = match policy.after_response(request, response, now) {
		AfterResponse::NotModified(policy, parts) | AfterResponse::Modified(policy, parts) =>
			(policy, parts),
	};
	let ttl = clamp_ttl(policy.time_to_live(now), source);

	Revalidation { freshness: Freshness { ttl, policy }, response: Response::from_parts(parts, ()) }
}

/// Synthesize a policy for a key set supplied out of band, fresh for `ttl`.
pub fn preloaded_freshness(source: &JwksSource, ttl: Duration) -> Result<Freshness> {
	let ttl = clamp_ttl(ttl, source);
	let request = base_request(source)?;
	let response = Response::builder()
		.status(200)
		.header("cache-control", format!("public, max-age={}", ttl.as_secs()))
		.header("content-type", "application/json")
		.body(())
		.map_err(Error::from)?;

	Ok(Freshness { ttl, policy: CachePolicy::new(&request, &response) })
}

fn clamp_ttl(ttl: Duration, source: &JwksSource) -> Duration {
	if ttl < source.cache.min_ttl {
		source.cache.min_ttl
	} else if ttl > source.cache.max_ttl {
		source.cache.max_ttl
	} else {
		ttl
	}
}
