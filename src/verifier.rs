//! Cognito JWT verification.
//!
//! [`CognitoJwtVerifier`] is bound to exactly one user pool. It resolves signing keys through a
//! [`JwksCache`], lets `jsonwebtoken` check the signature, expiry, and issuer, then applies the
//! Cognito-specific claim checks (`token_use`, app client, groups, scopes).

// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, Validation, jwk::JwkSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	cache::manager::JwksCache,
	config::{JwtVerifierConfig, ModuleOptions, TokenUse},
	jwks::{self, JwksSource, JwksStatus},
};

/// Freshness assumed for key sets handed to [`CognitoJwtVerifier::cache_jwks`].
pub const PRELOADED_JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Anything that can turn a bearer credential into verified claims.
///
/// `Ok(None)` means the credential produced no identity; errors are verification failures and are
/// passed through untouched.
pub trait TokenVerifier: Send + Sync {
	/// Verify `token` and return its claims.
	fn verify(&self, token: &str) -> impl Future<Output = Result<Option<CognitoClaims>>> + Send;
}
impl<V> TokenVerifier for Arc<V>
where
	V: TokenVerifier,
{
	fn verify(&self, token: &str) -> impl Future<Output = Result<Option<CognitoClaims>>> + Send {
		(**self).verify(token)
	}
}

/// Claims carried by Cognito ID and access tokens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CognitoClaims {
	/// Subject: the user's immutable identifier.
	pub sub: String,
	/// Issuer URL of the user pool.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// `id` or `access`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_use: Option<String>,
	/// App client of an ID token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aud: Option<String>,
	/// App client of an access token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// Expiry, seconds since the epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exp: Option<i64>,
	/// Issue time, seconds since the epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iat: Option<i64>,
	/// Username as carried by ID tokens.
	#[serde(rename = "cognito:username", default, skip_serializing_if = "Option::is_none")]
	pub cognito_username: Option<String>,
	/// Username as carried by access tokens.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	/// Groups the user belongs to.
	#[serde(rename = "cognito:groups", default, skip_serializing_if = "Vec::is_empty")]
	pub groups: Vec<String>,
	/// Space-separated OAuth scopes of an access token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	/// Email attribute of an ID token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Every other claim, including custom attributes.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
impl CognitoClaims {
	/// Username regardless of the token kind.
	pub fn username(&self) -> Option<&str> {
		self.cognito_username.as_deref().or(self.username.as_deref())
	}

	/// Individual scopes of an access token.
	pub fn scopes(&self) -> impl Iterator<Item = &str> {
		self.scope.as_deref().unwrap_or_default().split_whitespace()
	}

	/// App client the token was issued to.
	pub fn app_client(&self) -> Option<&str> {
		match self.token_use.as_deref() {
			Some("id") => self.aud.as_deref(),
			_ => self.client_id.as_deref(),
		}
	}
}

/// Verifier for tokens minted by one Cognito user pool.
#[derive(Clone, Debug)]
pub struct CognitoJwtVerifier {
	config: JwtVerifierConfig,
	binding: Option<PoolBinding>,
}
impl CognitoJwtVerifier {
	/// Bind a verifier to the configured user pool.
	///
	/// A missing user pool yields a verifier that rejects every token; a malformed one fails here.
	pub fn new(config: JwtVerifierConfig) -> Result<Self> {
		let binding = match config.user_pool_id.as_deref().filter(|id| !id.is_empty()) {
			Some(user_pool_id) => {
				let source =
					JwksSource::for_user_pool(user_pool_id, config.additional_properties.as_ref())?;

				Some(PoolBinding {
					issuer: jwks::cognito_issuer(user_pool_id)?,
					jwks: JwksCache::new(source)?,
				})
			},
			None => None,
		};

		Ok(Self { config, binding })
	}

	/// Settings the verifier was built from.
	pub fn config(&self) -> &JwtVerifierConfig {
		&self.config
	}

	/// Issuer expected in every token, when bound to a user pool.
	pub fn issuer(&self) -> Option<&str> {
		self.binding.as_ref().map(|binding| binding.issuer.as_str())
	}

	/// Verify a token and return its claims.
	#[tracing::instrument(skip_all, fields(issuer = self.issuer().unwrap_or_default()))]
	pub async fn verify(&self, token: &str) -> Result<CognitoClaims> {
		let binding = self.binding()?;
		let header = jsonwebtoken::decode_header(token)?;
		let kid = header.kid.ok_or_else(|| Error::Claim {
			claim: "kid",
			reason: "Token header carries no key id.".into(),
		})?;
		let jwk = binding.jwks.find_key(&kid).await?;
		let key = DecodingKey::from_jwk(&jwk)?;
		let mut validation = Validation::new(Algorithm::RS256);

		validation.set_issuer(&[binding.issuer.as_str()]);
		validation.set_required_spec_claims(&["exp", "iss", "sub"]);
		validation.validate_aud = false;
		validation.leeway = self.config.grace_seconds;

		let claims = jsonwebtoken::decode::<CognitoClaims>(token, &key, &validation)?.claims;

		self.check_claims(&claims)?;

		tracing::debug!(sub = %claims.sub, "token verified");

		Ok(claims)
	}

	/// Fetch the user pool's keys ahead of the first request.
	pub async fn hydrate(&self) -> Result<()> {
		self.binding()?.jwks.resolve().await.map(drop)
	}

	/// Seed the key cache with a known key set instead of fetching it.
	pub async fn cache_jwks(&self, jwks: JwkSet) -> Result<()> {
		self.binding()?.jwks.preload(jwks, PRELOADED_JWKS_TTL).await
	}

	/// Refresh the cached keys.
	pub async fn refresh(&self) -> Result<()> {
		self.binding()?.jwks.trigger_refresh().await
	}

	/// Key cache status, when bound to a user pool.
	pub async fn jwks_status(&self) -> Option<JwksStatus> {
		match &self.binding {
			Some(binding) => Some(binding.jwks.status().await),
			None => None,
		}
	}

	fn binding(&self) -> Result<&PoolBinding> {
		self.binding.as_ref().ok_or_else(|| Error::Validation {
			field: "user_pool_id",
			reason: "The verifier is not bound to a user pool.".into(),
		})
	}

	fn check_claims(&self, claims: &CognitoClaims) -> Result<()> {
		let token_use = claims.token_use.as_deref();

		match (self.config.token_use.as_claim(), token_use) {
			(Some(expected), Some(actual)) if expected == actual => {},
			(None, Some("id" | "access")) => {},
			(expected, actual) =>
				return Err(Error::Claim {
					claim: "token_use",
					reason: format!(
						"Expected {}, found {}.",
						expected.unwrap_or("id or access"),
						actual.unwrap_or("nothing")
					),
				}),
		}

		if !self.config.client_id.is_empty() {
			let client = claims.app_client().unwrap_or_default();

			if !self.config.client_id.iter().any(|allowed| allowed == client) {
				return Err(Error::Claim {
					claim: if token_use == Some("id") { "aud" } else { "client_id" },
					reason: format!("Client '{client}' is not accepted."),
				});
			}
		}
		if !self.config.groups.is_empty()
			&& !claims.groups.iter().any(|group| self.config.groups.contains(group))
		{
			return Err(Error::Claim {
				claim: "cognito:groups",
				reason: "None of the required groups is present.".into(),
			});
		}
		if !self.config.scope.is_empty()
			&& !claims.scopes().any(|scope| self.config.scope.iter().any(|s| s == scope))
		{
			return Err(Error::Claim {
				claim: "scope",
				reason: "None of the required scopes is present.".into(),
			});
		}

		Ok(())
	}
}
impl TokenVerifier for CognitoJwtVerifier {
	async fn verify(&self, token: &str) -> Result<Option<CognitoClaims>> {
		CognitoJwtVerifier::verify(self, token).await.map(Some)
	}
}

#[derive(Clone, Debug)]
struct PoolBinding {
	issuer: String,
	jwks: JwksCache,
}

/// Build the verifier described by `options`, or `None` when the section is absent.
///
/// Missing identifiers are logged and construction proceeds.
pub fn create_jwt_verifier(options: &ModuleOptions) -> Result<Option<CognitoJwtVerifier>> {
	let Some(config) = options.jwt_verifier.as_ref() else {
		return Ok(None);
	};

	if config.user_pool_id.as_deref().is_none_or(str::is_empty) {
		tracing::warn!("The userPoolId is missing in the CognitoJwtVerifier configuration");
	}
	if config.client_id.is_empty() {
		tracing::warn!("The clientId is missing in the CognitoJwtVerifier configuration");
	}
	if config.token_use == TokenUse::Any {
		tracing::debug!("verifier accepts both id and access tokens");
	}

	CognitoJwtVerifier::new(config.clone()).map(Some)
}
