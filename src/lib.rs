//! Amazon Cognito bindings for axum services: SDK client factories, a runtime-swappable client
//! adapter, a JWKS-backed JWT verifier, and an authentication guard.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod guard;
pub mod http;
pub mod jwks;
pub mod metrics;
pub mod provider;
pub mod security;
pub mod verifier;

mod error;
mod module;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	adapter::{
		CognitoIdentityProviderAdapter, CognitoIdentityProviderClientAdapter, MutableAdapter,
		create_mutable_identity_provider, create_mutable_identity_provider_client,
	},
	config::{
		ClientConfig, IdentityProviderConfig, JwtVerifierConfig, ModuleOptions, StaticCredentials,
		TokenUse, VerifierAdditionalProperties, build_configuration_from_options,
	},
	error::{Error, Result},
	guard::{AuthenticationGuard, CognitoUser, require_authentication},
	module::CognitoModule,
	provider::{IdentityProvider, create_identity_provider, create_identity_provider_client},
	verifier::{CognitoClaims, CognitoJwtVerifier, TokenVerifier, create_jwt_verifier},
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
