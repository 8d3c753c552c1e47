//! Reconfigurable identity-provider clients.
//!
//! A [`MutableAdapter`] owns the current client and the settings it was built from. Replacing the
//! settings builds a fresh client; holders of the previous client keep using it until they drop
//! their handle. Updates are applied one at a time in the order they were issued.

// crates.io
use aws_sdk_cognitoidentityprovider::Client;
use tokio::sync::{Mutex, RwLock};
// self
use crate::{
	_prelude::*,
	config::{self, ClientConfig, IdentityProviderConfig, ModuleOptions},
	provider::{self, FromClientConfig, IdentityProvider},
};

/// Adapter over an [`IdentityProvider`].
pub type CognitoIdentityProviderAdapter = MutableAdapter<IdentityProvider>;
/// Adapter over a raw SDK [`Client`].
pub type CognitoIdentityProviderClientAdapter = MutableAdapter<Client>;

/// Holder of a client that can be rebuilt at runtime.
#[derive(Debug)]
pub struct MutableAdapter<T> {
	inner: RwLock<AdapterState<T>>,
	updates: Mutex<()>,
}
impl<T> MutableAdapter<T>
where
	T: FromClientConfig + Clone,
{
	/// Build the initial client.
	pub async fn new(config: ClientConfig) -> Self {
		let client = provider::build_client(&config).await;

		Self { inner: RwLock::new(AdapterState { config, client }), updates: Mutex::new(()) }
	}

	/// Current client.
	pub async fn client(&self) -> T {
		self.inner.read().await.client.clone()
	}

	/// Settings the current client was built from.
	pub async fn config(&self) -> ClientConfig {
		self.inner.read().await.config.clone()
	}

	/// Replace the settings and rebuild the client.
	///
	/// The new configuration goes through the same defaulting as the initial one. Concurrent
	/// updates queue behind each other, so the last caller's settings are the ones that stick.
	/// Readers keep getting the previous client while the new one is built.
	pub async fn update_config(&self, config: IdentityProviderConfig) {
		let _update = self.updates.lock().await;
		let config = config::build_configuration_from_options(&config, T::NAME);
		let client = provider::build_client(&config).await;
		let mut inner = self.inner.write().await;

		tracing::info!(
			client = T::NAME,
			from = %inner.config.region,
			to = %config.region,
			"identity provider client reconfigured"
		);

		*inner = AdapterState { config, client };
	}
}

#[derive(Debug)]
struct AdapterState<T> {
	config: ClientConfig,
	client: T,
}

/// Mutable [`IdentityProvider`] adapter, or `None` when the section is absent.
pub async fn create_mutable_identity_provider(
	options: &ModuleOptions,
) -> Option<Arc<CognitoIdentityProviderAdapter>> {
	create(options).await
}

/// Mutable SDK [`Client`] adapter, or `None` when the section is absent.
pub async fn create_mutable_identity_provider_client(
	options: &ModuleOptions,
) -> Option<Arc<CognitoIdentityProviderClientAdapter>> {
	create(options).await
}

async fn create<T>(options: &ModuleOptions) -> Option<Arc<MutableAdapter<T>>>
where
	T: FromClientConfig + Clone,
{
	let config = config::build_configuration_from_options(options.identity_provider.as_ref()?, T::NAME);

	Some(Arc::new(MutableAdapter::new(config).await))
}
