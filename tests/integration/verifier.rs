//! Token verification against signed fixtures.

// crates.io
use cognito_guard::{
	CognitoJwtVerifier, Error, JwtVerifierConfig, ModuleOptions, Result, TokenUse,
	create_jwt_verifier, jwks::JwksState,
};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{
	self, CLIENT_ID, JWKS_PATH, KEY_A_PEM, KEY_B_PEM, KID_A, KID_B, USER_POOL_ID,
};

async fn serve_keys(kids: &[&str], expected_fetches: u64) -> MockServer {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(support::jwks_body(kids))
				.insert_header("cache-control", "public, max-age=600"),
		)
		.expect(expected_fetches)
		.mount(&server)
		.await;

	server
}

#[tokio::test]
async fn verifies_tokens_signed_by_the_pool() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = serve_keys(&[KID_A], 1).await;
	let verifier = support::verifier_for(&format!("{}{JWKS_PATH}", server.uri()));
	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let claims = verifier.verify(&token).await?;
	let again = verifier.verify(&token).await?;

	assert_eq!(claims.username(), Some("alice"));
	assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
	assert_eq!(claims.groups, vec!["admin".to_string()]);
	assert_eq!(claims, again);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn hydrate_fetches_before_the_first_request() -> Result<()> {
	let server = serve_keys(&[KID_A], 1).await;
	let verifier = support::verifier_for(&format!("{}{JWKS_PATH}", server.uri()));

	assert_eq!(verifier.jwks_status().await.map(|status| status.state), Some(JwksState::Empty));

	verifier.hydrate().await?;

	let status = verifier.jwks_status().await.expect("status");

	assert_eq!(status.state, JwksState::Ready);
	assert_eq!(status.user_pool_id, USER_POOL_ID);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn preloaded_keys_need_no_network() -> Result<()> {
	let verifier = support::preloaded_verifier().await;
	let token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());

	assert_eq!(verifier.verify(&token).await?.sub, "7d3c9a52-0000-4000-8000-000000000001");

	Ok(())
}

#[tokio::test]
async fn rejects_forged_expired_and_foreign_tokens() {
	let verifier = support::preloaded_verifier().await;
	let forged = support::sign(KID_A, KEY_B_PEM, &support::id_claims());
	let mut expired = support::id_claims();

	expired["exp"] = json!(support::now() - 600);

	let mut foreign_issuer = support::id_claims();

	foreign_issuer["iss"] = json!("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Other");

	let mut foreign_client = support::id_claims();

	foreign_client["aud"] = json!("another-client");

	for token in [
		forged,
		support::sign(KID_A, KEY_A_PEM, &expired),
		support::sign(KID_A, KEY_A_PEM, &foreign_issuer),
		support::sign(KID_A, KEY_A_PEM, &foreign_client),
		"not-a-jwt".to_owned(),
	] {
		let err = verifier.verify(&token).await.expect_err("token must be rejected");

		assert!(err.is_rejection(), "unexpected error kind: {err:?}");
	}
}

#[tokio::test]
async fn grace_period_tolerates_recent_expiry() -> Result<()> {
	let mut config = JwtVerifierConfig::new(USER_POOL_ID).with_client_id(CLIENT_ID);

	config.grace_seconds = 120;

	let verifier = CognitoJwtVerifier::new(config)?;
	let mut claims = support::id_claims();

	claims["exp"] = json!(support::now() - 30);
	verifier.cache_jwks(support::jwks(&[KID_A])).await?;

	assert!(verifier.verify(&support::sign(KID_A, KEY_A_PEM, &claims)).await.is_ok());

	Ok(())
}

#[tokio::test]
async fn token_use_selects_id_or_access_tokens() -> Result<()> {
	let id_token = support::sign(KID_A, KEY_A_PEM, &support::id_claims());
	let access_token = support::sign(KID_A, KEY_A_PEM, &support::access_claims());
	let access_only = CognitoJwtVerifier::new(
		JwtVerifierConfig::new(USER_POOL_ID)
			.with_client_id(CLIENT_ID)
			.with_token_use(TokenUse::Access),
	)?;

	access_only.cache_jwks(support::jwks(&[KID_A])).await?;

	assert!(access_only.verify(&access_token).await.is_ok());
	assert!(matches!(
		access_only.verify(&id_token).await,
		Err(Error::Claim { claim: "token_use", .. })
	));

	let default = support::preloaded_verifier().await;

	assert!(default.verify(&id_token).await.is_ok());
	assert!(default.verify(&access_token).await.is_err());

	Ok(())
}

#[tokio::test]
async fn rotated_keys_are_picked_up() -> Result<()> {
	let server = serve_keys(&[KID_A, KID_B], 1).await;
	let verifier = support::verifier_for(&format!("{}{JWKS_PATH}", server.uri()));

	verifier.cache_jwks(support::jwks(&[KID_A])).await?;

	let token = support::sign(KID_B, KEY_B_PEM, &support::id_claims());

	assert_eq!(verifier.verify(&token).await?.username(), Some("alice"));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn factory_builds_from_json_options() -> Result<()> {
	let options: ModuleOptions = serde_json::from_value(json!({
		"jwtVerifier": { "userPoolId": USER_POOL_ID, "clientId": CLIENT_ID }
	}))?;
	let verifier = create_jwt_verifier(&options)?.expect("verifier configured");

	assert_eq!(verifier.issuer(), Some(support::issuer().as_str()));

	verifier.cache_jwks(support::jwks(&[KID_A])).await?;

	assert!(verifier.verify(&support::sign(KID_A, KEY_A_PEM, &support::id_claims())).await.is_ok());

	Ok(())
}
