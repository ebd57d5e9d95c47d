#![cfg(feature = "test")]

// self
use directory_token_broker::{
	_preludet::*,
	auth::{ResourceId, Subject, TokenSecret},
	cache::{AccessTokenEntry, CacheQuery},
	config::ClientConfig,
	context::CorrelationContext,
	credential::ClientCredential,
	error::{ConfigError, ServiceErrorKind},
	flows::{ClientTokenRequest, TokenSource},
	oauth::GrantType,
};

const CLIENT_SECRET: &str = "secret-credentials";

fn confidential_client(config: ClientConfig) -> (ScriptedTokenClient, ScriptedHttpClient) {
	let (client, transport) = scripted_client(config);
	let credential =
		ClientCredential::secret(CLIENT_SECRET).expect("Secret fixture should be valid.");

	(client.with_credential(credential), transport)
}

fn request() -> ClientTokenRequest {
	ClientTokenRequest::new(ResourceId::new(TEST_RESOURCE).expect("Resource should be valid."))
}

#[tokio::test]
async fn client_credentials_caches_token_after_success() {
	let (client, transport) = confidential_client(test_config());

	transport.push_json(TOKEN_PATH, 200, token_body("app-token", None, None));

	let first = client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect("Initial client credentials request should succeed.");
	let second = client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect("Cached client credentials request should succeed.");

	assert_eq!(first.source, TokenSource::ClientCredentials);
	assert_eq!(second.source, TokenSource::Cache);
	assert_eq!(second.access_token.expose(), "app-token");
	assert!(first.user.is_none());
	assert_eq!(transport.calls(TOKEN_PATH), 1);

	let form = &transport.requests()[0].form;

	assert_eq!(form["grant_type"], "client_credentials");
	assert_eq!(form["client_id"], TEST_CLIENT_ID);
	assert_eq!(form["client_secret"], CLIENT_SECRET);
	assert_eq!(form["resource"], TEST_RESOURCE);
}

#[tokio::test]
async fn client_credentials_singleflight_requests_once() {
	let transport = ScriptedHttpClient::new().with_delay(std::time::Duration::from_millis(50));
	let (client, transport) = scripted_client_with(test_config(), transport);
	let client = client.with_credential(
		ClientCredential::secret(CLIENT_SECRET).expect("Secret fixture should be valid."),
	);

	transport.push_json(TOKEN_PATH, 200, token_body("guard-token", None, None));

	let (first_ctx, second_ctx) = (CorrelationContext::new(), CorrelationContext::new());
	let (first, second) = tokio::join!(
		client.acquire_token_for_client(request(), &first_ctx),
		client.acquire_token_for_client(request(), &second_ctx),
	);

	assert_eq!(first.expect("First call should succeed.").access_token.expose(), "guard-token");
	assert_eq!(second.expect("Second call should succeed.").access_token.expose(), "guard-token");
	assert_eq!(transport.calls(TOKEN_PATH), 1);
}

#[tokio::test]
async fn force_refresh_requests_a_new_token() {
	let (client, transport) = confidential_client(test_config());

	transport.push_json(TOKEN_PATH, 200, token_body("first", None, None));
	transport.push_json(TOKEN_PATH, 200, token_body("second", None, None));

	client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect("First call should succeed.");

	let forced = client
		.acquire_token_for_client(request().force_refresh(), &CorrelationContext::new())
		.await
		.expect("Forced call should succeed.");

	assert_eq!(forced.access_token.expose(), "second");
	assert_eq!(transport.calls(TOKEN_PATH), 2);
}

#[tokio::test]
async fn client_credentials_require_a_credential() {
	let (client, transport) = scripted_client(test_config());
	let err = client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect_err("Public clients cannot use the client credentials grant.");

	assert!(matches!(
		err,
		Error::Config(ConfigError::MissingClientCredential { grant: GrantType::ClientCredentials })
	));
	assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn client_credentials_map_invalid_client() {
	let (client, transport) = confidential_client(test_config());

	transport.push_json(TOKEN_PATH, 401, error_body("invalid_client", "AADSTS7000215."));

	let err = client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect_err("Bad secret should fail the call.");

	assert!(matches!(
		err,
		Error::Service(ref e)
			if e.kind == ServiceErrorKind::InvalidClient && e.grant == GrantType::ClientCredentials
	));
	assert_eq!(client.metrics.failures(), 1);
}

#[tokio::test]
async fn stale_app_token_is_served_during_an_outage() {
	let (client, transport) = confidential_client(test_config().with_extended_lifetime(true));
	let descriptor = client
		.resolve_authority(None, &CorrelationContext::new())
		.await
		.expect("Test authority should resolve.");
	let query = CacheQuery::client(
		descriptor.cache_authority(),
		TEST_CLIENT_ID.parse().expect("Client id fixture should be valid."),
	);
	let now = OffsetDateTime::now_utc();

	client
		.cache
		.store(AccessTokenEntry {
			key: query.access_key(TEST_RESOURCE, Subject::Client),
			access_token: TokenSecret::new("stale-app-token"),
			expires_on: now - Duration::minutes(10),
			extended_expires_on: now + Duration::hours(1),
			id_token: None,
			user: None,
			tenant_id: None,
		})
		.expect("Stale fixture should be stored.");
	transport.push(TOKEN_PATH, ScriptedReply::NetworkFailure);

	let result = client
		.acquire_token_for_client(request(), &CorrelationContext::new())
		.await
		.expect("Stale app token should be served.");

	assert_eq!(result.source, TokenSource::StaleCache);
	assert!(result.extended_lifetime);
	assert_eq!(result.access_token.expose(), "stale-app-token");
}
