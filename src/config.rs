//! Module options and the identity-provider configuration builder.
//!
//! Options deserialize from the same camelCase shape the host module is registered with, so a
//! JSON document such as `{"identityProvider": {"region": "us-east-1"}}` maps directly onto
//! [`ModuleOptions`].

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Serialize, de::Deserializer};
use url::Url;
// self
use crate::jwks::JwksCacheConfig;

/// Top-level options accepted by [`CognitoModule::register`](crate::CognitoModule::register).
///
/// Each section is optional; an absent section disables the matching feature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOptions {
	/// Cognito Identity Provider SDK client settings.
	#[serde(default)]
	pub identity_provider: Option<IdentityProviderConfig>,
	/// JWT verifier settings.
	#[serde(default)]
	pub jwt_verifier: Option<JwtVerifierConfig>,
}
impl ModuleOptions {
	/// Options enabling only the identity-provider clients.
	pub fn with_identity_provider(config: IdentityProviderConfig) -> Self {
		Self { identity_provider: Some(config), jwt_verifier: None }
	}

	/// Options enabling only the JWT verifier.
	pub fn with_jwt_verifier(config: JwtVerifierConfig) -> Self {
		Self { identity_provider: None, jwt_verifier: Some(config) }
	}
}

/// Caller-supplied identity-provider client settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProviderConfig {
	/// AWS region hosting the user pool.
	#[serde(default)]
	pub region: Option<String>,
	/// Endpoint override, mostly for local emulators.
	#[serde(default)]
	pub endpoint: Option<Url>,
	/// Static credentials; the default AWS provider chain is used when absent.
	#[serde(default)]
	pub credentials: Option<StaticCredentials>,
	/// Maximum attempts for the SDK's standard retry strategy.
	#[serde(default)]
	pub max_attempts: Option<u32>,
}
impl IdentityProviderConfig {
	/// Settings for the given region.
	pub fn new(region: impl Into<String>) -> Self {
		Self { region: Some(region.into()), ..Default::default() }
	}

	/// Attach static credentials.
	pub fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
		self.credentials = Some(credentials);

		self
	}

	/// Override the service endpoint.
	pub fn with_endpoint(mut self, endpoint: Url) -> Self {
		self.endpoint = Some(endpoint);

		self
	}
}

/// Long-lived or session credentials handed to the SDK as-is.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCredentials {
	/// Access key identifier.
	pub access_key_id: String,
	/// Secret access key.
	pub secret_access_key: String,
	/// Optional session token for temporary credentials.
	#[serde(default)]
	pub session_token: Option<String>,
}
impl StaticCredentials {
	/// Build credentials without a session token.
	pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
		Self {
			access_key_id: access_key_id.into(),
			secret_access_key: secret_access_key.into(),
			session_token: None,
		}
	}
}
impl Debug for StaticCredentials {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("StaticCredentials")
			.field("access_key_id", &self.access_key_id)
			.field("secret_access_key", &"** redacted **")
			.field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
			.finish()
	}
}

/// Identity-provider settings after defaults have been applied.
///
/// `region` is always present, although it may be empty when the caller never supplied one.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
	/// Region the client targets; empty when unset.
	pub region: String,
	/// Endpoint override.
	pub endpoint: Option<Url>,
	/// Static credentials.
	pub credentials: Option<StaticCredentials>,
	/// Maximum SDK retry attempts.
	pub max_attempts: Option<u32>,
}

/// Which kind of token the verifier accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
	/// ID tokens only.
	#[default]
	Id,
	/// Access tokens only.
	Access,
	/// Either kind.
	Any,
}
impl TokenUse {
	/// Claim value carried in the `token_use` claim, if the variant maps to one.
	pub fn as_claim(self) -> Option<&'static str> {
		match self {
			Self::Id => Some("id"),
			Self::Access => Some("access"),
			Self::Any => None,
		}
	}
}

/// JWT verifier settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtVerifierConfig {
	/// User pool identifier, e.g. `us-east-1_AbCdEfGhI`.
	#[serde(default)]
	pub user_pool_id: Option<String>,
	/// Accepted app client identifiers; empty accepts any client.
	#[serde(default, deserialize_with = "deserialize_one_or_many")]
	pub client_id: Vec<String>,
	/// Accepted token kind.
	///
	/// A missing key means ID tokens; an explicit `null` accepts either kind.
	#[serde(default, deserialize_with = "deserialize_token_use")]
	pub token_use: TokenUse,
	/// Clock skew tolerated on `exp`/`nbf`, in seconds.
	#[serde(default)]
	pub grace_seconds: u64,
	/// When non-empty, at least one of these groups must appear in `cognito:groups`.
	#[serde(default, deserialize_with = "deserialize_one_or_many")]
	pub groups: Vec<String>,
	/// When non-empty, at least one of these scopes must appear in `scope`.
	#[serde(default, deserialize_with = "deserialize_one_or_many")]
	pub scope: Vec<String>,
	/// Settings that do not describe the token itself.
	#[serde(default)]
	pub additional_properties: Option<VerifierAdditionalProperties>,
}
impl JwtVerifierConfig {
	/// Settings bound to a user pool.
	pub fn new(user_pool_id: impl Into<String>) -> Self {
		Self { user_pool_id: Some(user_pool_id.into()), ..Default::default() }
	}

	/// Add an accepted app client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id.push(client_id.into());

		self
	}

	/// Select the accepted token kind.
	pub fn with_token_use(mut self, token_use: TokenUse) -> Self {
		self.token_use = token_use;

		self
	}
}

/// Side-channel settings for the verifier's key retrieval.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierAdditionalProperties {
	/// Override for the pool's JWKS location.
	#[serde(default)]
	pub jwks_uri: Option<Url>,
	/// JWKS cache tuning.
	#[serde(default)]
	pub jwks_cache: JwksCacheConfig,
}

/// Fill in identity-provider defaults, warning about missing fields.
///
/// `from` names the client kind being configured and is used as the log target label.
pub fn build_configuration_from_options(config: &IdentityProviderConfig, from: &str) -> ClientConfig {
	let region = config.region.clone().unwrap_or_default();

	if region.is_empty() {
		tracing::warn!(client = from, "The region is missing in the {from} configuration");
	}

	ClientConfig {
		region,
		endpoint: config.endpoint.clone(),
		credentials: config.credentials.clone(),
		max_attempts: config.max_attempts,
	}
}

fn deserialize_one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum OneOrMany {
		One(String),
		Many(Vec<String>),
	}

	Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
		None => Vec::new(),
		Some(OneOrMany::One(value)) => vec![value],
		Some(OneOrMany::Many(values)) => values,
	})
}

fn deserialize_token_use<'de, D>(deserializer: D) -> std::result::Result<TokenUse, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(Option::<TokenUse>::deserialize(deserializer)?.unwrap_or(TokenUse::Any))
}
