//! Parameter set handed to a platform broker.

// self
use crate::{_prelude::*, auth::UserIdentifier};

/// Inputs of [`BrokerParameterSet::build`].
#[derive(Clone, Debug)]
pub struct BrokerParameterInput<'a> {
	/// Canonical authority.
	pub authority: &'a str,
	/// Requested resource.
	pub resource: &'a str,
	/// Requesting client.
	pub client_id: &'a str,
	/// Correlation id of the call.
	pub correlation_id: Uuid,
	/// Library version reported to the broker.
	pub client_version: &'a str,
	/// User the call is for.
	pub user: &'a UserIdentifier,
	/// Redirect URI registered for the client.
	pub redirect_uri: &'a Url,
	/// Force the broker to prompt.
	pub force: bool,
	/// Caller-supplied extra query parameters.
	pub extra_query_parameters: Option<&'a str>,
	/// Claims challenge.
	pub claims: Option<&'a str>,
	/// Build the silent set instead of the interactive one.
	pub is_silent: bool,
}

/// Fields only present in the interactive set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractiveBrokerFields {
	/// `force` flag.
	pub force: bool,
	/// `redirect_uri`.
	pub redirect_uri: String,
	/// `extra_qp`.
	pub extra_qp: String,
	/// `claims`.
	pub claims: String,
}

/// Which invocation the set was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerInvocation {
	/// Interactive sign-in (eleven keys).
	Interactive(InteractiveBrokerFields),
	/// Silent acquisition (eight keys, including `silent_broker_flow`).
	Silent,
}

/// Deterministic key/value set understood by the platform broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerParameterSet {
	/// `authority`: canonical authority.
	pub authority: String,
	/// `resource`.
	pub resource: String,
	/// `client_id`.
	pub client_id: String,
	/// `correlation_id`.
	pub correlation_id: String,
	/// `client_version`.
	pub client_version: String,
	/// `username`: empty when there is no hint.
	pub username: String,
	/// `username_type`.
	pub username_type: String,
	/// Invocation-specific fields.
	pub invocation: BrokerInvocation,
}
impl BrokerParameterSet {
	/// Key of the canonical authority.
	pub const AUTHORITY: &'static str = "authority";
	/// Key of the claims challenge.
	pub const CLAIMS: &'static str = "claims";
	/// Key of the client id.
	pub const CLIENT_ID: &'static str = "client_id";
	/// Key of the library version.
	pub const CLIENT_VERSION: &'static str = "client_version";
	/// Key of the correlation id.
	pub const CORRELATION_ID: &'static str = "correlation_id";
	/// Key of the extra query parameters.
	pub const EXTRA_QP: &'static str = "extra_qp";
	/// Key of the force-prompt flag.
	pub const FORCE: &'static str = "force";
	/// Key of the redirect URI.
	pub const REDIRECT_URI: &'static str = "redirect_uri";
	/// Key of the resource.
	pub const RESOURCE: &'static str = "resource";
	/// Key marking a silent invocation.
	pub const SILENT_BROKER_FLOW: &'static str = "silent_broker_flow";
	/// Key of the user hint.
	pub const USERNAME: &'static str = "username";
	/// Key of the user hint precision.
	pub const USERNAME_TYPE: &'static str = "username_type";

	/// Builds the set; which keys are present depends only on `input.is_silent`.
	pub fn build(input: BrokerParameterInput<'_>) -> Self {
		let invocation = if input.is_silent {
			BrokerInvocation::Silent
		} else {
			BrokerInvocation::Interactive(InteractiveBrokerFields {
				force: input.force,
				redirect_uri: input.redirect_uri.to_string(),
				extra_qp: input.extra_query_parameters.unwrap_or_default().to_owned(),
				claims: input.claims.unwrap_or_default().to_owned(),
			})
		};

		Self {
			authority: input.authority.to_owned(),
			resource: input.resource.to_owned(),
			client_id: input.client_id.to_owned(),
			correlation_id: input.correlation_id.to_string(),
			client_version: input.client_version.to_owned(),
			username: input.user.value().to_owned(),
			username_type: input.user.broker_kind().as_str().to_owned(),
			invocation,
		}
	}

	/// Returns `true` for the silent set.
	pub fn is_silent(&self) -> bool {
		matches!(self.invocation, BrokerInvocation::Silent)
	}

	/// Number of keys.
	pub fn len(&self) -> usize {
		self.pairs().len()
	}

	/// Always `false`; every set carries the common keys.
	pub fn is_empty(&self) -> bool {
		false
	}

	/// Value of `key`, if present in this set.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.pairs().into_iter().find(|(name, _)| *name == key).map(|(_, value)| value)
	}

	/// Key/value pairs in wire order.
	pub fn pairs(&self) -> Vec<(&'static str, &str)> {
		let mut pairs = vec![
			(Self::AUTHORITY, self.authority.as_str()),
			(Self::RESOURCE, self.resource.as_str()),
			(Self::CLIENT_ID, self.client_id.as_str()),
			(Self::CORRELATION_ID, self.correlation_id.as_str()),
			(Self::CLIENT_VERSION, self.client_version.as_str()),
		];

		match &self.invocation {
			BrokerInvocation::Interactive(fields) => pairs.extend([
				(Self::FORCE, if fields.force { "YES" } else { "NO" }),
				(Self::USERNAME, self.username.as_str()),
				(Self::USERNAME_TYPE, self.username_type.as_str()),
				(Self::REDIRECT_URI, fields.redirect_uri.as_str()),
				(Self::EXTRA_QP, fields.extra_qp.as_str()),
				(Self::CLAIMS, fields.claims.as_str()),
			]),
			BrokerInvocation::Silent => pairs.extend([
				(Self::USERNAME, self.username.as_str()),
				(Self::USERNAME_TYPE, self.username_type.as_str()),
				(Self::SILENT_BROKER_FLOW, "YES"),
			]),
		}

		pairs
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn force_flag_maps_to_yes() {
		let redirect = Url::parse("urn:ietf:wg:oauth:2.0:oob").expect("Redirect should parse.");
		let user = UserIdentifier::DisplayableId("alice@contoso.com".into());
		let set = BrokerParameterSet::build(BrokerParameterInput {
			authority: "https://login.microsoftonline.com/contoso/",
			resource: "https://graph.example.com",
			client_id: "app-1",
			correlation_id: Uuid::nil(),
			client_version: "1.0.0",
			user: &user,
			redirect_uri: &redirect,
			force: true,
			extra_query_parameters: None,
			claims: None,
			is_silent: false,
		});

		assert_eq!(set.get(BrokerParameterSet::FORCE), Some("YES"));
		assert_eq!(set.get(BrokerParameterSet::USERNAME), Some("alice@contoso.com"));
		assert_eq!(set.get(BrokerParameterSet::USERNAME_TYPE), Some("DisplayableId"));
		assert_eq!(set.get(BrokerParameterSet::EXTRA_QP), Some(""));
		assert_eq!(set.get(BrokerParameterSet::SILENT_BROKER_FLOW), None);
		assert!(!set.is_silent());
	}
}
