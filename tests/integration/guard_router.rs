//! The guard mounted as axum middleware.

// std
use std::sync::Arc;
// crates.io
use axum::{
	Json, Router,
	body::{self, Body},
	middleware,
	routing::get,
};
use cognito_guard::{
	AuthenticationGuard, CognitoJwtVerifier, CognitoModule, CognitoUser, JwtVerifierConfig,
	ModuleOptions, require_authentication,
};
use http::{Request, StatusCode, header::AUTHORIZATION};
use serde_json::{Value, json};
use tower::ServiceExt;
// self
use crate::support::{self, CLIENT_ID, KEY_A_PEM, KEY_B_PEM, KID_A, USER_POOL_ID};

async fn me(user: CognitoUser) -> Json<Value> {
	Json(json!({ "sub": user.sub, "username": user.username, "groups": user.groups }))
}

fn router(guard: AuthenticationGuard<Arc<CognitoJwtVerifier>>) -> Router {
	Router::new()
		.route("/me", get(me))
		.route_layer(middleware::from_fn_with_state(
			guard,
			require_authentication::<Arc<CognitoJwtVerifier>>,
		))
		.route("/health", get(|| async { "ok" }))
}

async fn call(router: Router, authorization: Option<String>) -> (StatusCode, Value) {
	let mut request = Request::builder().uri("/me");

	if let Some(value) = authorization {
		request = request.header(AUTHORIZATION, value);
	}

	let response =
		router.oneshot(request.body(Body::empty()).expect("request")).await.expect("response");
	let status = response.status();
	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

	(status, body)
}

async fn guard() -> AuthenticationGuard<Arc<CognitoJwtVerifier>> {
	AuthenticationGuard::new(Arc::new(support::preloaded_verifier().await))
}

#[tokio::test]
async fn valid_token_reaches_the_handler() {
	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let (status, body) = call(router(guard().await), Some(format!("Bearer {token}"))).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["username"], "alice");
	assert_eq!(body["groups"], json!(["admin"]));
}

#[tokio::test]
async fn raw_token_without_scheme_is_accepted() {
	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let (status, _) = call(router(guard().await), Some(token)).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_or_invalid_tokens_get_401() {
	let forged = support::sign(KID_A, KEY_B_PEM, &support::id_claims());

	for authorization in [None, Some("Bearer garbage".to_owned()), Some(format!("Bearer {forged}"))]
	{
		let (status, body) = call(router(guard().await), authorization).await;

		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body, json!({ "message": "Unauthorized" }));
	}
}

#[tokio::test]
async fn unbound_verifier_is_a_server_error() {
	let verifier = CognitoJwtVerifier::new(JwtVerifierConfig::default()).expect("verifier");
	let guard = AuthenticationGuard::new(Arc::new(verifier));
	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let (status, body) = call(router(guard), Some(format!("Bearer {token}"))).await;

	assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
	assert_eq!(body, json!({ "message": "Internal Server Error" }));
}

#[tokio::test]
async fn registered_module_guards_routes() {
	let options = ModuleOptions::with_jwt_verifier(
		JwtVerifierConfig::new(USER_POOL_ID).with_client_id(CLIENT_ID),
	);
	let module = CognitoModule::register(options).await.expect("module");
	let verifier = module.jwt_verifier().expect("verifier");

	verifier.cache_jwks(support::jwks(&[KID_A])).await.expect("preload");

	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let guard = module.authentication_guard().expect("guard");
	let (status, _) = call(router(guard), Some(format!("Bearer {token}"))).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unguarded_routes_stay_open() {
	let response = router(guard().await)
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("response");

	assert_eq!(response.status(), StatusCode::OK);
}
