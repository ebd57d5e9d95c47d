// crates.io
use url::Url;
use uuid::Uuid;
// self
use directory_token_broker::{
	auth::UserIdentifier,
	delegate::{BrokerParameterInput, BrokerParameterSet},
};

fn build(user: &UserIdentifier, redirect: &Url, is_silent: bool) -> BrokerParameterSet {
	BrokerParameterSet::build(BrokerParameterInput {
		authority: "https://login.microsoftonline.com/contoso/",
		resource: "https://graph.example.com",
		client_id: "app-1",
		correlation_id: Uuid::nil(),
		client_version: "0.1.0",
		user,
		redirect_uri: redirect,
		force: false,
		extra_query_parameters: Some("domain_hint=contoso.com"),
		claims: Some(r#"{"access_token":{}}"#),
		is_silent,
	})
}

#[test]
fn interactive_set_carries_eleven_keys() {
	let redirect = Url::parse("https://localhost/callback").expect("Redirect should parse.");
	let user = UserIdentifier::DisplayableId("alice@contoso.com".into());
	let set = build(&user, &redirect, false);
	let keys = set.pairs().into_iter().map(|(key, _)| key).collect::<Vec<_>>();

	assert!(!set.is_silent());
	assert_eq!(
		keys,
		[
			"authority",
			"resource",
			"client_id",
			"correlation_id",
			"client_version",
			"force",
			"username",
			"username_type",
			"redirect_uri",
			"extra_qp",
			"claims",
		]
	);
	assert_eq!(set.get(BrokerParameterSet::FORCE), Some("NO"));
	assert_eq!(set.get(BrokerParameterSet::USERNAME_TYPE), Some("DisplayableId"));
	assert_eq!(set.get(BrokerParameterSet::REDIRECT_URI), Some("https://localhost/callback"));
	assert_eq!(set.get(BrokerParameterSet::EXTRA_QP), Some("domain_hint=contoso.com"));
	assert_eq!(set.get(BrokerParameterSet::CORRELATION_ID), Some(Uuid::nil().to_string().as_str()));
	assert_eq!(set.get(BrokerParameterSet::SILENT_BROKER_FLOW), None);
}

#[test]
fn silent_set_carries_eight_keys_and_the_silent_marker() {
	let redirect = Url::parse("https://localhost/callback").expect("Redirect should parse.");
	let set = build(&UserIdentifier::AnyUser, &redirect, true);

	assert!(set.is_silent());
	assert_eq!(set.len(), 8);
	assert_eq!(set.get(BrokerParameterSet::SILENT_BROKER_FLOW), Some("YES"));
	assert_eq!(set.get(BrokerParameterSet::USERNAME), Some(""));
	assert_eq!(set.get(BrokerParameterSet::USERNAME_TYPE), Some("OptionalDisplayableId"));

	for key in [
		BrokerParameterSet::FORCE,
		BrokerParameterSet::REDIRECT_URI,
		BrokerParameterSet::EXTRA_QP,
		BrokerParameterSet::CLAIMS,
	] {
		assert_eq!(set.get(key), None, "`{key}` should only appear in the interactive set.");
	}
}

#[test]
fn unique_id_is_passed_through_verbatim() {
	let redirect = Url::parse("https://localhost/callback").expect("Redirect should parse.");
	let user = UserIdentifier::UniqueId("00000000-0000-0000-0000-00000000a11c".into());
	let set = build(&user, &redirect, true);

	assert_eq!(set.get(BrokerParameterSet::USERNAME), Some(user.value()));
	assert_eq!(set.get(BrokerParameterSet::USERNAME_TYPE), Some("UniqueId"));
}
