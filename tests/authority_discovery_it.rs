#![cfg(feature = "test")]

// self
use directory_token_broker::{
	_preludet::*,
	authority::AuthorityValidationError,
	context::CorrelationContext,
	error::TransientError,
};

fn discovery_body() -> serde_json::Value {
	serde_json::json!({
		"api-version": "1.1",
		"metadata": [
			{
				"preferred_network": "login.microsoftonline.com",
				"preferred_cache": "login.windows.net",
				"aliases": [
					"login.microsoftonline.com",
					"login.windows.net",
					"sts.windows.net"
				]
			}
		]
	})
}

#[tokio::test]
async fn discovery_binds_aliases_to_one_cache_authority() {
	let (client, transport) = scripted_client(test_config().with_validate_authority(true));
	let ctx = CorrelationContext::new();

	transport.push_json(DISCOVERY_PATH, 200, discovery_body());

	let first = client
		.resolve_authority(Some("https://login.microsoftonline.com/contoso"), &ctx)
		.await
		.expect("Known instance should resolve.");
	let alias = client
		.resolve_authority(Some("https://login.windows.net/contoso"), &ctx)
		.await
		.expect("Alias should resolve from the discovery cache.");

	assert_eq!(transport.calls(DISCOVERY_PATH), 1);
	assert_eq!(first.cache_authority(), alias.cache_authority());
	assert_eq!(first.preferred_cache(), "login.windows.net");
	assert_eq!(alias.token_endpoint(), "https://login.microsoftonline.com/contoso/oauth2/token");

	let request = &transport.requests()[0];
	let query = request.url.query_pairs().into_owned().collect::<HashMap<_, _>>();

	assert_eq!(request.url.host_str(), Some("login.microsoftonline.com"));
	assert_eq!(query["api-version"], "1.1");
	assert_eq!(
		query["authorization_endpoint"],
		"https://login.microsoftonline.com/contoso/oauth2/authorize"
	);
	assert_eq!(
		request.headers.get("client-request-id").map(String::as_str),
		Some(ctx.correlation_id().to_string().as_str())
	);
}

#[tokio::test]
async fn unknown_instances_are_rejected() {
	let (client, transport) = scripted_client(test_config().with_validate_authority(true));
	let ctx = CorrelationContext::new();

	transport.push_json(
		DISCOVERY_PATH,
		400,
		error_body("invalid_instance", "AADSTS50049: Unknown or invalid instance."),
	);

	let err = client
		.resolve_authority(Some("https://login.contoso.com/tenant"), &ctx)
		.await
		.expect_err("Unknown instance should be rejected.");

	assert!(matches!(
		err,
		Error::Authority(AuthorityValidationError::UnknownInstance { ref host })
			if host == "login.contoso.com"
	));
}

#[tokio::test]
async fn discovery_outages_are_transient() {
	let (client, transport) = scripted_client(test_config().with_validate_authority(true));
	let ctx = CorrelationContext::new();

	transport.push_json(DISCOVERY_PATH, 503, serde_json::json!({}));

	let err = client
		.resolve_authority(None, &ctx)
		.await
		.expect_err("Discovery outage should surface.");

	assert!(err.is_unavailable());
	assert!(matches!(err, Error::Transient(TransientError::Discovery { status: Some(503), .. })));
}

#[tokio::test]
async fn validation_can_be_disabled() {
	let (client, transport) = scripted_client(test_config());
	let ctx = CorrelationContext::new();
	let descriptor = client
		.resolve_authority(Some("https://sts.contoso.com/tenant"), &ctx)
		.await
		.expect("Unvalidated authority should resolve.");

	assert!(transport.requests().is_empty());
	assert_eq!(descriptor.canonical(), "https://sts.contoso.com/tenant/");
	assert_eq!(descriptor.token_endpoint(), "https://sts.contoso.com/tenant/oauth2/token");
}

#[tokio::test]
async fn adfs_authorities_cannot_be_validated() {
	let (client, transport) = scripted_client(test_config().with_validate_authority(true));
	let ctx = CorrelationContext::new();
	let err = client
		.resolve_authority(Some("https://adfs.contoso.com/adfs"), &ctx)
		.await
		.expect_err("ADFS validation should be refused.");

	assert!(transport.requests().is_empty());
	assert!(matches!(
		err,
		Error::Authority(AuthorityValidationError::ValidationNotSupported { .. })
	));
}
