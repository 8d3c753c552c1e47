//! Crate-wide error types and `Result` alias.

// crates.io
use axum::{
	Json,
	response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the Cognito bindings.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	IdentityProvider(#[from] aws_sdk_cognitoidentityprovider::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Claim check failed for {claim}: {reason}")]
	Claim { claim: &'static str, reason: String },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: StatusCode, url: url::Url, body: Option<String> },
	#[error("No JWK found for kid '{kid}'.")]
	KeyNotFound { kid: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Unauthorized")]
	Unauthorized,
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the error means the presented credential was not accepted.
	///
	/// Everything else is an infrastructure or configuration failure.
	pub fn is_rejection(&self) -> bool {
		matches!(
			self,
			Self::Unauthorized
				| Self::Jsonwebtoken(_)
				| Self::Claim { .. }
				| Self::KeyNotFound { .. }
		)
	}
}
impl IntoResponse for Error {
	fn into_response(self) -> Response {
		if self.is_rejection() {
			tracing::debug!(error = %self, "request rejected");

			(StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthorized" }))).into_response()
		} else {
			tracing::error!(error = %self, "authentication pipeline failure");

			(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "Internal Server Error" })))
				.into_response()
		}
	}
}
