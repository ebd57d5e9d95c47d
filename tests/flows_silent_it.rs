#![cfg(feature = "test")]

// self
use directory_token_broker::{
	_preludet::*,
	auth::{ResourceId, Subject, TokenSecret, UserIdentifier, UserInfo},
	cache::{AccessTokenEntry, CacheError, CacheQuery, RefreshTokenEntry},
	context::CorrelationContext,
	error::ServiceErrorKind,
	flows::{SilentTokenRequest, TokenSource},
};

const ALICE_OID: &str = "oid-alice";
const ALICE_UPN: &str = "alice@contoso.com";
const OTHER_RESOURCE: &str = "https://vault.example.com";

fn alice() -> UserInfo {
	UserInfo::new(ALICE_OID).with_displayable_id(ALICE_UPN)
}

fn alice_id_token() -> String {
	id_token(ALICE_OID, ALICE_UPN, "tid-contoso")
}

fn resource() -> ResourceId {
	ResourceId::new(TEST_RESOURCE).expect("Resource fixture should be valid.")
}

async fn user_query(client: &ScriptedTokenClient, client_id: &str) -> CacheQuery {
	let descriptor = client
		.resolve_authority(None, &CorrelationContext::new())
		.await
		.expect("Test authority should resolve.");

	CacheQuery::user(
		descriptor.cache_authority(),
		client_id.parse().expect("Client id fixture should be valid."),
		UserIdentifier::AnyUser,
	)
}

fn seed_access(
	client: &ScriptedTokenClient,
	query: &CacheQuery,
	user: UserInfo,
	expires_on: OffsetDateTime,
	extended_expires_on: OffsetDateTime,
) {
	client
		.cache
		.store(AccessTokenEntry {
			key: query.access_key(TEST_RESOURCE, Subject::user(user.unique_id.clone())),
			access_token: TokenSecret::new("at-cached"),
			expires_on,
			extended_expires_on,
			id_token: None,
			user: Some(user),
			tenant_id: Some("tid-contoso".into()),
		})
		.expect("Access token fixture should be stored.");
}

fn seed_refresh(
	client: &ScriptedTokenClient,
	query: &CacheQuery,
	resource: &str,
	is_multi_resource: bool,
	family_id: Option<&str>,
) {
	client
		.cache
		.store(RefreshTokenEntry {
			key: query.refresh_key(Subject::user(ALICE_OID)),
			refresh_token: TokenSecret::new("rt-cached"),
			family_id: family_id.map(ToOwned::to_owned),
			resource: resource.into(),
			is_multi_resource,
			user: Some(alice()),
		})
		.expect("Refresh token fixture should be stored.");
}

fn refreshed_body() -> serde_json::Value {
	token_body("at-refreshed", Some("rt-rotated"), Some(&alice_id_token()))
}

#[tokio::test]
async fn fresh_cache_hit_makes_no_network_call() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now + Duration::hours(1), now + Duration::hours(2));

	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("Cached token should be served.");

	assert_eq!(result.source, TokenSource::Cache);
	assert_eq!(result.access_token.expose(), "at-cached");
	assert_eq!(result.user.map(|user| user.unique_id), Some(ALICE_OID.into()));
	assert!(!result.extended_lifetime);
	assert!(transport.requests().is_empty());
	assert_eq!(client.metrics.cache_hits(), 1);
}

#[tokio::test]
async fn tokens_inside_the_clock_skew_are_refreshed() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now + Duration::minutes(2), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 200, refreshed_body());

	let ctx = CorrelationContext::new();
	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &ctx)
		.await
		.expect("Refresh grant should succeed.");

	assert_eq!(result.source, TokenSource::RefreshGrant);
	assert_eq!(result.access_token.expose(), "at-refreshed");
	assert_eq!(result.correlation_id, ctx.correlation_id());

	let request = &transport.requests()[0];

	assert_eq!(request.form["grant_type"], "refresh_token");
	assert_eq!(request.form["refresh_token"], "rt-cached");
	assert_eq!(request.form["resource"], TEST_RESOURCE);
	assert_eq!(request.form["client_id"], TEST_CLIENT_ID);

	let rotated = client
		.cache
		.find_refresh_token(&query)
		.expect("Refresh lookup should succeed.")
		.expect("Rotated refresh token should be cached.");

	assert_eq!(rotated.refresh_token.expose(), "rt-rotated");
	assert_eq!(rotated.resource, TEST_RESOURCE);
}

#[tokio::test]
async fn multi_resource_refresh_token_serves_another_resource() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let mut body = refreshed_body();

	body["resource"] = TEST_RESOURCE.into();

	seed_refresh(&client, &query, OTHER_RESOURCE, true, None);
	transport.push_json(TOKEN_PATH, 200, body);

	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("MRRT redemption should succeed.");

	assert_eq!(result.source, TokenSource::MultiResourceRefresh);
	assert_eq!(result.resource, TEST_RESOURCE);
	assert_eq!(transport.requests()[0].form["resource"], TEST_RESOURCE);
	assert_eq!(client.metrics.mrrt_redemptions(), 1);

	let cached = client
		.cache
		.find_access_token(&query, TEST_RESOURCE, OffsetDateTime::now_utc())
		.expect("Access lookup should succeed.")
		.expect("Redeemed token should be cached for the requested resource.");

	assert_eq!(cached.access_token.expose(), "at-refreshed");

	let again = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("Second call should be served from the cache.");

	assert_eq!(again.source, TokenSource::Cache);
	assert_eq!(transport.calls(TOKEN_PATH), 1);
}

#[tokio::test]
async fn single_resource_refresh_token_is_not_redeemed_elsewhere() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;

	seed_refresh(&client, &query, OTHER_RESOURCE, false, None);

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("A single-resource refresh token should not be reused.");

	assert!(matches!(err, Error::InteractionRequired { source: None, .. }));
	assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn family_refresh_token_of_another_client_is_redeemed() {
	let (client, transport) = scripted_client(test_config());
	let sibling = user_query(&client, "app-2").await;
	let mut body = refreshed_body();

	body["foci"] = "1".into();

	seed_refresh(&client, &sibling, OTHER_RESOURCE, true, Some("1"));
	transport.push_json(TOKEN_PATH, 200, body);

	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("Family refresh token should be redeemed.");

	assert_eq!(result.source, TokenSource::FamilyRefresh);
	assert_eq!(transport.requests()[0].form["client_id"], TEST_CLIENT_ID);

	let own = client
		.cache
		.find_refresh_token(&user_query(&client, TEST_CLIENT_ID).await)
		.expect("Refresh lookup should succeed.")
		.expect("Redeemed family token should be stored for this client.");

	assert_eq!(own.refresh_token.expose(), "rt-rotated");
	assert_eq!(own.family_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn rejected_refresh_token_is_removed() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;

	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 400, error_body("invalid_grant", "AADSTS70008: expired."));

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("Rejected refresh token should require interaction.");

	assert!(err.requires_interaction());
	assert!(matches!(err, Error::InteractionRequired { source: Some(_), .. }));
	assert!(client.cache.find_refresh_token(&query).expect("Lookup should succeed.").is_none());
}

#[tokio::test]
async fn invalid_client_aborts_the_flow() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;

	seed_refresh(&client, &query, TEST_RESOURCE, true, Some("1"));
	transport.push_json(TOKEN_PATH, 401, error_body("invalid_client", "AADSTS7000215."));

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("Client authentication failure should propagate.");

	assert!(matches!(err, Error::Service(ref e) if e.kind == ServiceErrorKind::InvalidClient));
	assert_eq!(transport.calls(TOKEN_PATH), 1);
	assert!(client.cache.find_refresh_token(&query).expect("Lookup should succeed.").is_some());
}

#[tokio::test]
async fn stale_tokens_are_not_served_by_default() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now - Duration::minutes(1), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push(TOKEN_PATH, ScriptedReply::NetworkFailure);

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("Outage should surface without extended lifetime.");

	assert!(err.is_unavailable());
	assert_eq!(client.metrics.stale_serves(), 0);
}

#[tokio::test]
async fn stale_tokens_are_served_during_an_outage_when_enabled() {
	let (client, transport) = scripted_client(test_config().with_extended_lifetime(true));
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now - Duration::minutes(1), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push(TOKEN_PATH, ScriptedReply::NetworkFailure);

	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("Stale token should be served.");

	assert_eq!(result.source, TokenSource::StaleCache);
	assert!(result.extended_lifetime);
	assert_eq!(result.access_token.expose(), "at-cached");
	assert_eq!(client.metrics.stale_serves(), 1);
}

#[tokio::test]
async fn stale_tokens_are_not_served_after_a_rejection() {
	let (client, transport) = scripted_client(test_config().with_extended_lifetime(true));
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now - Duration::minutes(1), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 400, error_body("interaction_required", "MFA required."));

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("A rejection should not be answered with a stale token.");

	assert!(err.requires_interaction());
}

#[tokio::test]
async fn string_lifetimes_refresh_instead_of_serving_stale_tokens() {
	let (client, transport) = scripted_client(test_config().with_extended_lifetime(true));
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();
	let mut body = refreshed_body();

	body["expires_in"] = "3599".into();
	body["ext_expires_in"] = "3599".into();

	seed_access(&client, &query, alice(), now - Duration::minutes(1), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 200, body);

	let result = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect("Refresh grant should succeed.");

	assert_eq!(result.source, TokenSource::RefreshGrant);
	assert!(!result.extended_lifetime);
	assert_eq!(result.access_token.expose(), "at-refreshed");
	assert_eq!(client.metrics.stale_serves(), 0);
}

#[tokio::test]
async fn malformed_token_responses_are_not_answered_with_stale_tokens() {
	let (client, transport) = scripted_client(test_config().with_extended_lifetime(true));
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now - Duration::minutes(1), now + Duration::hours(1));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 200, serde_json::json!({ "token_type": "Bearer" }));

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("A malformed success body should not be answered with a stale token.");

	assert!(!err.is_unavailable());
	assert!(err.requires_interaction());
	assert!(matches!(
		err,
		Error::InteractionRequired { source: Some(ref source), .. }
			if matches!(**source, Error::Service(ref e) if e.kind == ServiceErrorKind::Other)
	));
	assert_eq!(client.metrics.stale_serves(), 0);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
	let transport = ScriptedHttpClient::new().with_delay(std::time::Duration::from_millis(50));
	let (client, transport) = scripted_client_with(test_config(), transport);
	let query = user_query(&client, TEST_CLIENT_ID).await;

	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 200, refreshed_body());

	let (first_ctx, second_ctx) = (CorrelationContext::new(), CorrelationContext::new());
	let (first, second) = tokio::join!(
		client.acquire_token_silent(SilentTokenRequest::new(resource()), &first_ctx),
		client.acquire_token_silent(SilentTokenRequest::new(resource()), &second_ctx),
	);
	let first = first.expect("First caller should succeed.");
	let second = second.expect("Second caller should succeed.");
	let mut sources = [first.source, second.source];

	sources.sort_by_key(|source| source.as_str());

	assert_eq!(transport.calls(TOKEN_PATH), 1);
	assert_eq!(sources, [TokenSource::Cache, TokenSource::RefreshGrant]);
	assert_eq!(first.access_token, second.access_token);
	assert_eq!(client.cache.len().expect("Cache should be readable."), 2);
}

#[tokio::test]
async fn force_refresh_skips_a_fresh_token() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();

	seed_access(&client, &query, alice(), now + Duration::hours(1), now + Duration::hours(2));
	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push_json(TOKEN_PATH, 200, refreshed_body());

	let result = client
		.acquire_token_silent(
			SilentTokenRequest::new(resource()).force_refresh(),
			&CorrelationContext::new(),
		)
		.await
		.expect("Forced refresh should succeed.");

	assert_eq!(result.source, TokenSource::RefreshGrant);
	assert_eq!(transport.calls(TOKEN_PATH), 1);
}

#[tokio::test]
async fn cancellation_leaves_the_cache_untouched() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;

	seed_refresh(&client, &query, TEST_RESOURCE, false, None);
	transport.push(TOKEN_PATH, ScriptedReply::Hang);

	let ctx = CorrelationContext::new();
	let (result, _) = tokio::join!(
		client.acquire_token_silent(SilentTokenRequest::new(resource()), &ctx),
		async {
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;
			ctx.cancel();
		},
	);

	assert!(matches!(result, Err(Error::Cancelled)));
	assert_eq!(transport.calls(TOKEN_PATH), 1);

	let now = OffsetDateTime::now_utc();

	assert!(
		client
			.cache
			.find_access_token(&query, TEST_RESOURCE, now)
			.expect("Lookup should succeed.")
			.is_none()
	);

	let kept = client
		.cache
		.find_refresh_token(&query)
		.expect("Lookup should succeed.")
		.expect("Refresh token should survive cancellation.");

	assert_eq!(kept.refresh_token.expose(), "rt-cached");
}

#[tokio::test]
async fn any_user_is_ambiguous_with_two_cached_users() {
	let (client, transport) = scripted_client(test_config());
	let query = user_query(&client, TEST_CLIENT_ID).await;
	let now = OffsetDateTime::now_utc();
	let (expires_on, extended) = (now + Duration::hours(1), now + Duration::hours(2));

	seed_access(&client, &query, alice(), expires_on, extended);
	seed_access(
		&client,
		&query,
		UserInfo::new("oid-bob").with_displayable_id("bob@contoso.com"),
		expires_on,
		extended,
	);

	let err = client
		.acquire_token_silent(SilentTokenRequest::new(resource()), &CorrelationContext::new())
		.await
		.expect_err("Two users should make `AnyUser` ambiguous.");

	assert!(matches!(err, Error::Cache(CacheError::MultipleUsersMatched { count: 2 })));
	assert!(transport.requests().is_empty());

	let bob = client
		.acquire_token_silent(
			SilentTokenRequest::new(resource())
				.with_user(UserIdentifier::DisplayableId("BOB@contoso.com".into())),
			&CorrelationContext::new(),
		)
		.await
		.expect("A displayable id should pick one user.");

	assert_eq!(bob.user.map(|user| user.unique_id), Some("oid-bob".into()));
}
