//! JWKS fetch over HTTP.

// crates.io
use http::{
	HeaderMap, HeaderName, Request, Response, StatusCode,
	header::{ETAG, LAST_MODIFIED},
};
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
// self
use crate::{_prelude::*, jwks::JwksSource, security};

/// Request and response heads of one fetch, as the cache policy needs them.
#[derive(Clone, Debug)]
pub struct HttpExchange {
	/// Request sent to the key endpoint.
	pub request: Request<()>,
	/// Status and headers of the reply.
	pub response: Response<()>,
}

/// What a single fetch attempt produced.
#[derive(Clone, Debug)]
pub struct HttpFetch {
	/// Heads of the exchange.
	pub exchange: HttpExchange,
	/// Key set from a `200` reply; `None` for `304 Not Modified`.
	pub jwks: Option<Arc<JwkSet>>,
	/// `ETag` of the reply.
	pub etag: Option<String>,
	/// `Last-Modified` of the reply.
	pub last_modified: Option<DateTime<Utc>>,
}

/// Send `request` to the source's key URL once, bounded by `attempt_timeout`.
///
/// Non-success statuses and bodies larger than `max_response_bytes` are errors.
pub async fn fetch_jwks(
	client: &Client,
	source: &JwksSource,
	request: &Request<()>,
	attempt_timeout: Duration,
) -> Result<HttpFetch> {
	if source.cache.require_https {
		security::enforce_https(&source.jwks_url)?;
	}

	let started = Instant::now();
	let reply = client
		.request(request.method().clone(), source.jwks_url.clone())
		.headers(request.headers().clone())
		.timeout(attempt_timeout)
		.send()
		.await?;
	let status = reply.status();
	let mut head = Response::new(());

	*head.status_mut() = status;
	*head.headers_mut() = reply.headers().clone();

	let etag = header_string(head.headers(), &ETAG);
	let last_modified = header_string(head.headers(), &LAST_MODIFIED)
		.and_then(|raw| httpdate::parse_http_date(&raw).ok())
		.map(DateTime::<Utc>::from);
	let exchange = HttpExchange { request: request.clone(), response: head };

	if status == StatusCode::NOT_MODIFIED {
		tracing::debug!(user_pool = %source.user_pool_id, "jwks not modified");

		return Ok(HttpFetch { exchange, jwks: None, etag, last_modified });
	}
	if !status.is_success() {
		return Err(Error::HttpStatus {
			status,
			url: source.jwks_url.clone(),
			body: reply.text().await.ok(),
		});
	}

	let body = reply.bytes().await?;
	let limit = source.cache.max_response_bytes;

	if body.len() as u64 > limit {
		return Err(Error::Validation {
			field: "max_response_bytes",
			reason: format!("JWKS body of {} bytes is larger than {limit} bytes.", body.len()),
		});
	}

	let jwks = serde_json::from_slice::<JwkSet>(&body)?;

	tracing::debug!(
		user_pool = %source.user_pool_id,
		keys = jwks.keys.len(),
		elapsed = ?started.elapsed(),
		"jwks fetched"
	);

	Ok(HttpFetch { exchange, jwks: Some(Arc::new(jwks)), etag, last_modified })
}

pub(crate) fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
	headers.get(name)?.to_str().ok().map(str::to_owned)
}
