//! Request authentication.
//!
//! [`AuthenticationGuard`] decides whether a request may proceed and, when it may, attaches the
//! verified [`CognitoUser`] to the request extensions. [`require_authentication`] plugs the guard
//! into an axum router:
//!
//! ```ignore
//! let router = Router::new()
//! 	.route("/me", get(me))
//! 	.route_layer(middleware::from_fn_with_state(guard, require_authentication));
//! ```

// crates.io
use axum::{
	extract::{FromRequestParts, Request, State},
	middleware::Next,
	response::Response,
};
use http::{HeaderMap, header::AUTHORIZATION, request::Parts};
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	metrics::{self, GuardDecision},
	verifier::{CognitoClaims, TokenVerifier},
};

/// Principal attached to authenticated requests.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CognitoUser {
	/// Subject identifier.
	pub sub: String,
	/// Username, from either token kind.
	pub username: Option<String>,
	/// Email, when the token carries one.
	pub email: Option<String>,
	/// Group memberships.
	pub groups: Vec<String>,
	/// Kind of token that authenticated the request.
	pub token_use: Option<String>,
	/// Full claim set.
	pub claims: CognitoClaims,
}
impl From<CognitoClaims> for CognitoUser {
	fn from(claims: CognitoClaims) -> Self {
		Self {
			sub: claims.sub.clone(),
			username: claims.username().map(ToOwned::to_owned),
			email: claims.email.clone(),
			groups: claims.groups.clone(),
			token_use: claims.token_use.clone(),
			claims,
		}
	}
}
impl<S> FromRequestParts<S> for CognitoUser
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self> {
		parts.extensions.get::<CognitoUser>().cloned().ok_or(Error::Unauthorized)
	}
}

/// Gate that admits only requests carrying a verifiable token.
#[derive(Clone, Debug)]
pub struct AuthenticationGuard<V> {
	verifier: V,
}
impl<V> AuthenticationGuard<V>
where
	V: TokenVerifier,
{
	/// Guard backed by `verifier`.
	pub fn new(verifier: V) -> Self {
		Self { verifier }
	}

	/// Verifier backing the guard.
	pub fn verifier(&self) -> &V {
		&self.verifier
	}

	/// Admit or reject `request`.
	///
	/// Returns [`Error::Unauthorized`] when no token is present or the verifier yields no claims.
	/// Verifier errors are returned unchanged. On success the [`CognitoUser`] is inserted into the
	/// request extensions.
	#[tracing::instrument(skip_all, fields(path = %request.uri().path()))]
	pub async fn can_activate<B>(&self, request: &mut http::Request<B>) -> Result<()>
	where
		B: Send,
	{
		let Some(token) = bearer_token(request.headers()) else {
			tracing::debug!("request carries no bearer token");
			metrics::record_guard_decision(GuardDecision::Unauthorized);

			return Err(Error::Unauthorized);
		};

		match self.verifier.verify(token).await {
			Ok(Some(claims)) => {
				tracing::debug!(sub = %claims.sub, "request authenticated");
				metrics::record_guard_decision(GuardDecision::Allowed);
				request.extensions_mut().insert(CognitoUser::from(claims));

				Ok(())
			},
			Ok(None) => {
				tracing::debug!("verifier produced no claims");
				metrics::record_guard_decision(GuardDecision::Unauthorized);

				Err(Error::Unauthorized)
			},
			Err(e) => {
				if e.is_rejection() {
					tracing::debug!(error = %e, "token rejected");
					metrics::record_guard_decision(GuardDecision::Rejected);
				} else {
					tracing::warn!(error = %e, "token verification failed");
					metrics::record_guard_decision(GuardDecision::Failed);
				}

				Err(e)
			},
		}
	}
}

/// Token carried by the `Authorization` header.
///
/// A `Bearer` scheme prefix is stripped case-insensitively; any other value is passed on verbatim.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
	let token = match value.split_once(' ') {
		Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
		None if value.eq_ignore_ascii_case("bearer") => "",
		_ => value,
	};

	(!token.is_empty()).then_some(token)
}

/// axum middleware running [`AuthenticationGuard::can_activate`] before the inner service.
pub async fn require_authentication<V>(
	State(guard): State<AuthenticationGuard<V>>,
	mut request: Request,
	next: Next,
) -> Result<Response>
where
	V: TokenVerifier + Clone,
{
	guard.can_activate(&mut request).await?;

	Ok(next.run(request).await)
}
