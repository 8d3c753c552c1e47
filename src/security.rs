//! Transport checks for JWKS retrieval: HTTPS enforcement, domain allowlists, and redirect
//! screening.
//!
//! # Threat Model
//! These helpers assume upstream TLS validation has already succeeded and focus on keeping an
//! attacker from steering the verifier towards keys it controls, either by downgrading the fetch
//! through an HTTP redirect or by bouncing it to a host outside the allowlist.

// std
use std::collections::HashSet;
// crates.io
use reqwest::redirect::{Attempt, Policy};
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::{_prelude::*, jwks::JwksCacheConfig};

/// Canonicalise a DNS name by trimming whitespace, removing any trailing dot, and lowercasing.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let trimmed = value.trim().trim_end_matches('.');

	if trimmed.is_empty() {
		return None;
	}

	Some(trimmed.to_ascii_lowercase())
}

/// Normalise an allowlist by canonicalising entries and removing duplicates/empties.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();

	domains
		.into_iter()
		.filter_map(|domain| canonicalize_dns_name(&domain))
		.filter(|canonical| seen.insert(canonical.clone()))
		.collect()
}

/// `serde` helper to normalise allowlist domains during deserialisation.
pub fn deserialize_allowed_domains<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = Vec::<String>::deserialize(deserializer)?;

	Ok(normalize_allowlist(raw))
}

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Upstream URL {url} must use HTTPS.")))
	}
}

/// Evaluate whether the given hostname is allowed by the provided suffix allowlist.
///
/// When the list is empty, all hosts are considered valid.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains
		.iter()
		.filter_map(|domain| canonicalize_dns_name(domain))
		.any(|domain| matches_allowlist(&host, &domain))
}

/// Build a redirect policy that re-applies the HTTPS and allowlist checks on every hop.
pub fn redirect_policy(cache: &JwksCacheConfig) -> Policy {
	let require_https = cache.require_https;
	let allowed_domains = cache.allowed_domains.clone();
	let max_redirects = usize::from(cache.max_redirects);

	Policy::custom(move |attempt: Attempt| {
		if attempt.previous().len() > max_redirects {
			return attempt.error(format!("Exceeded {max_redirects} redirects."));
		}
		if require_https && attempt.url().scheme() != "https" {
			tracing::warn!(url = %attempt.url(), "refusing redirect to a non-HTTPS location");

			return attempt.error("Redirect target must use HTTPS.");
		}

		match attempt.url().host_str() {
			Some(host) if host_is_allowed(host, &allowed_domains) => attempt.follow(),
			_ => {
				tracing::warn!(url = %attempt.url(), "refusing redirect outside the JWKS allowlist");

				attempt.error("Redirect target is outside the JWKS allowlist.")
			},
		}
	})
}

#[inline]
fn matches_allowlist(host: &str, domain: &str) -> bool {
	if host == domain {
		return true;
	}

	host.strip_suffix(domain).and_then(|prefix| prefix.strip_suffix('.')).is_some()
}
