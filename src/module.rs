//! Start-up registration of the Cognito singletons.

// self
use crate::{
	_prelude::*,
	config::ModuleOptions,
	guard::AuthenticationGuard,
	provider::{self, IdentityProvider},
	verifier::{self, CognitoJwtVerifier},
};

/// Everything built from one set of [`ModuleOptions`].
///
/// Each component is `None` when its configuration section was omitted.
#[derive(Clone, Debug)]
pub struct CognitoModule {
	options: ModuleOptions,
	identity_provider: Option<IdentityProvider>,
	jwt_verifier: Option<Arc<CognitoJwtVerifier>>,
}
impl CognitoModule {
	/// Build the identity provider and the verifier described by `options`.
	pub async fn register(options: ModuleOptions) -> Result<Self> {
		let identity_provider = provider::create_identity_provider(&options).await;
		let jwt_verifier = verifier::create_jwt_verifier(&options)?.map(Arc::new);

		tracing::info!(
			identity_provider = identity_provider.is_some(),
			jwt_verifier = jwt_verifier.is_some(),
			"cognito module registered"
		);

		Ok(Self { options, identity_provider, jwt_verifier })
	}

	/// Options the module was registered with.
	pub fn options(&self) -> &ModuleOptions {
		&self.options
	}

	/// Identity provider handle.
	pub fn identity_provider(&self) -> Option<&IdentityProvider> {
		self.identity_provider.as_ref()
	}

	/// Shared verifier.
	pub fn jwt_verifier(&self) -> Option<&Arc<CognitoJwtVerifier>> {
		self.jwt_verifier.as_ref()
	}

	/// Guard backed by the shared verifier.
	pub fn authentication_guard(&self) -> Option<AuthenticationGuard<Arc<CognitoJwtVerifier>>> {
		self.jwt_verifier.clone().map(AuthenticationGuard::new)
	}
}
