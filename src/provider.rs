//! Cognito Identity Provider client factories.

// std
use std::collections::HashMap;
// crates.io
use aws_config::{
	BehaviorVersion, Region, SdkConfig, environment::EnvironmentVariableRegionProvider,
	meta::region::RegionProviderChain, profile::ProfileFileRegionProvider, retry::RetryConfig,
};
use aws_sdk_cognitoidentityprovider::{
	Client,
	config::Credentials,
	operation::{admin_get_user::AdminGetUserOutput, get_user::GetUserOutput},
	types::AttributeType,
};
// self
use crate::{
	_prelude::*,
	config::{self, ClientConfig, ModuleOptions},
};

const CREDENTIALS_PROVIDER_NAME: &str = "cognito-guard";

/// A client type that can be built from resolved identity-provider settings.
pub trait FromClientConfig: Sized {
	/// Name used in configuration warnings.
	const NAME: &'static str;

	/// Wrap a loaded SDK configuration.
	fn from_sdk_config(sdk_config: &SdkConfig) -> Self;
}
impl FromClientConfig for Client {
	const NAME: &'static str = "CognitoIdentityProviderClient";

	fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
		Client::new(sdk_config)
	}
}

/// High-level identity provider handle.
///
/// Wraps the raw SDK [`Client`] with the handful of user lookups the guard's callers need; the
/// client stays reachable for everything else.
#[derive(Clone, Debug)]
pub struct IdentityProvider {
	client: Client,
}
impl IdentityProvider {
	/// Wrap an existing SDK client.
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	/// Underlying SDK client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Region the client was configured with.
	pub fn region(&self) -> Option<&str> {
		self.client.config().region().map(|region| region.as_ref())
	}

	/// Fetch the user owning `access_token`.
	pub async fn get_user(&self, access_token: &str) -> Result<GetUserOutput> {
		let output = self
			.client
			.get_user()
			.access_token(access_token)
			.send()
			.await
			.map_err(aws_sdk_cognitoidentityprovider::Error::from)?;

		Ok(output)
	}

	/// Fetch a user by name with administrator privileges.
	pub async fn admin_get_user(
		&self,
		user_pool_id: &str,
		username: &str,
	) -> Result<AdminGetUserOutput> {
		let output = self
			.client
			.admin_get_user()
			.user_pool_id(user_pool_id)
			.username(username)
			.send()
			.await
			.map_err(aws_sdk_cognitoidentityprovider::Error::from)?;

		Ok(output)
	}
}
impl FromClientConfig for IdentityProvider {
	const NAME: &'static str = "CognitoIdentityProvider";

	fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
		Self::new(Client::new(sdk_config))
	}
}

/// Collect user attributes into a name-to-value map, skipping attributes without a value.
pub fn attribute_map(attributes: &[AttributeType]) -> HashMap<String, String> {
	attributes
		.iter()
		.filter_map(|attribute| {
			attribute.value().map(|value| (attribute.name().to_owned(), value.to_owned()))
		})
		.collect()
}

/// Load an SDK configuration from resolved settings.
///
/// An empty region is only looked up in the environment and the shared profile files, so loading
/// never reaches the instance metadata service.
pub async fn load_sdk_config(config: &ClientConfig) -> SdkConfig {
	let mut loader = aws_config::defaults(BehaviorVersion::latest());

	loader = if config.region.is_empty() {
		loader.region(
			RegionProviderChain::first_try(EnvironmentVariableRegionProvider::new())
				.or_else(ProfileFileRegionProvider::new()),
		)
	} else {
		loader.region(Region::new(config.region.clone()))
	};
	if let Some(endpoint) = &config.endpoint {
		loader = loader.endpoint_url(endpoint.as_str());
	}
	if let Some(credentials) = &config.credentials {
		loader = loader.credentials_provider(Credentials::new(
			&credentials.access_key_id,
			&credentials.secret_access_key,
			credentials.session_token.clone(),
			None,
			CREDENTIALS_PROVIDER_NAME,
		));
	}
	if let Some(max_attempts) = config.max_attempts {
		loader = loader.retry_config(RetryConfig::standard().with_max_attempts(max_attempts));
	}

	loader.load().await
}

/// Build a client of kind `T` from resolved settings.
pub async fn build_client<T>(config: &ClientConfig) -> T
where
	T: FromClientConfig,
{
	let sdk_config = load_sdk_config(config).await;

	tracing::debug!(client = T::NAME, region = %config.region, "identity provider client built");

	T::from_sdk_config(&sdk_config)
}

/// Identity provider handle, or `None` when the section is absent.
pub async fn create_identity_provider(options: &ModuleOptions) -> Option<IdentityProvider> {
	create(options).await
}

/// Raw SDK client, or `None` when the section is absent.
pub async fn create_identity_provider_client(options: &ModuleOptions) -> Option<Client> {
	create(options).await
}

async fn create<T>(options: &ModuleOptions) -> Option<T>
where
	T: FromClientConfig,
{
	let config = config::build_configuration_from_options(options.identity_provider.as_ref()?, T::NAME);

	Some(build_client(&config).await)
}
