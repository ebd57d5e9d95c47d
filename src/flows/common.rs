//! Request and result types shared by the acquisition flows, plus the singleflight guards.

// self
use crate::{
	_prelude::*,
	auth::{ResourceId, Subject, TokenSecret, UserIdentifier, UserInfo},
	cache::{AccessTokenEntry, CacheEntry, CacheQuery, RefreshTokenEntry},
	delegate::BrokerToken,
	flows::{Prompt, TokenClient},
	http::StsHttpClient,
	oauth::{IssuedTokens, TransportErrorMapper},
};

/// Inputs of [`TokenClient::acquire_token_silent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SilentTokenRequest {
	/// Authority override; the configured authority is used when `None`.
	pub authority: Option<String>,
	/// Resource the token is for.
	pub resource: ResourceId,
	/// User the token is for.
	pub user: UserIdentifier,
	/// Skip the access-token lookup and go straight to the refresh grant.
	pub force_refresh: bool,
}
impl SilentTokenRequest {
	/// Creates a request for `resource` on behalf of any single cached user.
	pub fn new(resource: ResourceId) -> Self {
		Self { authority: None, resource, user: UserIdentifier::AnyUser, force_refresh: false }
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = Some(authority.into());

		self
	}

	/// Selects the user.
	pub fn with_user(mut self, user: UserIdentifier) -> Self {
		self.user = user;

		self
	}

	/// Bypasses the cached access token.
	pub fn force_refresh(mut self) -> Self {
		self.force_refresh = true;

		self
	}
}

/// Inputs of [`TokenClient::acquire_token_interactive`] and [`TokenClient::acquire_token`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractiveTokenRequest {
	/// Authority override; the configured authority is used when `None`.
	pub authority: Option<String>,
	/// Resource the token is for.
	pub resource: ResourceId,
	/// User hint or requirement.
	pub user: UserIdentifier,
	/// Prompt behavior.
	pub prompt: Prompt,
	/// Extra query parameters appended to the authorization URL (`a=b&c=d`).
	pub extra_query_parameters: Option<String>,
	/// Claims challenge forwarded to the STS.
	pub claims: Option<String>,
}
impl InteractiveTokenRequest {
	/// Creates a request for `resource` with automatic prompting.
	pub fn new(resource: ResourceId) -> Self {
		Self {
			authority: None,
			resource,
			user: UserIdentifier::AnyUser,
			prompt: Prompt::Auto,
			extra_query_parameters: None,
			claims: None,
		}
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = Some(authority.into());

		self
	}

	/// Selects the user.
	pub fn with_user(mut self, user: UserIdentifier) -> Self {
		self.user = user;

		self
	}

	/// Sets the prompt behavior.
	pub fn with_prompt(mut self, prompt: Prompt) -> Self {
		self.prompt = prompt;

		self
	}

	/// Appends extra query parameters to the authorization URL.
	pub fn with_extra_query_parameters(mut self, parameters: impl Into<String>) -> Self {
		self.extra_query_parameters = Some(parameters.into());

		self
	}

	/// Forwards a claims challenge.
	pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
		self.claims = Some(claims.into());

		self
	}

	/// Silent request for the same authority, resource, and user.
	pub fn to_silent(&self) -> SilentTokenRequest {
		SilentTokenRequest {
			authority: self.authority.clone(),
			resource: self.resource.clone(),
			user: self.user.clone(),
			force_refresh: false,
		}
	}
}

/// Inputs of [`TokenClient::acquire_token_for_client`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTokenRequest {
	/// Authority override; the configured authority is used when `None`.
	pub authority: Option<String>,
	/// Resource the token is for.
	pub resource: ResourceId,
	/// Skip the cached token.
	pub force_refresh: bool,
}
impl ClientTokenRequest {
	/// Creates an app-only request for `resource`.
	pub fn new(resource: ResourceId) -> Self {
		Self { authority: None, resource, force_refresh: false }
	}

	/// Overrides the authority.
	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = Some(authority.into());

		self
	}

	/// Bypasses the cached access token.
	pub fn force_refresh(mut self) -> Self {
		self.force_refresh = true;

		self
	}
}

/// Where an [`AuthenticationResult`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
	/// Fresh access token served from the cache.
	Cache,
	/// Platform broker answered silently.
	Broker,
	/// The client's refresh token was redeemed for the requested resource.
	RefreshGrant,
	/// A multi-resource refresh token minted for another resource was redeemed.
	MultiResourceRefresh,
	/// A family refresh token issued to another client was redeemed.
	FamilyRefresh,
	/// An authorization code from interactive sign-in was redeemed.
	AuthorizationCode,
	/// The client credentials grant.
	ClientCredentials,
	/// Expired access token served inside its extended lifetime.
	StaleCache,
}
impl TokenSource {
	/// Returns a stable label for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Cache => "cache",
			Self::Broker => "broker",
			Self::RefreshGrant => "refresh_grant",
			Self::MultiResourceRefresh => "multi_resource_refresh",
			Self::FamilyRefresh => "family_refresh",
			Self::AuthorizationCode => "authorization_code",
			Self::ClientCredentials => "client_credentials",
			Self::StaleCache => "stale_cache",
		}
	}
}
impl Display for TokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Token handed back to callers.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
	/// Access token.
	pub access_token: TokenSecret,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// Extended expiry.
	pub extended_expires_on: OffsetDateTime,
	/// Canonical authority the token was acquired against.
	pub authority: String,
	/// Resource the token is for.
	pub resource: String,
	/// Tenant id, when known.
	pub tenant_id: Option<String>,
	/// Signed-in user; `None` for app-only tokens.
	pub user: Option<UserInfo>,
	/// Raw `id_token`, when one was issued.
	pub id_token: Option<String>,
	/// Path that produced the token.
	pub source: TokenSource,
	/// `true` when the token is expired and served only because the STS was unavailable.
	pub extended_lifetime: bool,
	/// Correlation id of the call.
	pub correlation_id: Uuid,
}
impl AuthenticationResult {
	pub(crate) fn from_entry(
		entry: AccessTokenEntry,
		authority: &str,
		source: TokenSource,
		correlation_id: Uuid,
	) -> Self {
		Self {
			access_token: entry.access_token,
			expires_on: entry.expires_on,
			extended_expires_on: entry.extended_expires_on,
			authority: authority.to_owned(),
			resource: entry.key.resource,
			tenant_id: entry.tenant_id,
			user: entry.user,
			id_token: entry.id_token,
			extended_lifetime: source == TokenSource::StaleCache,
			source,
			correlation_id,
		}
	}

	pub(crate) fn from_broker(
		token: BrokerToken,
		authority: &str,
		resource: &str,
		correlation_id: Uuid,
	) -> Self {
		Self {
			access_token: token.access_token,
			expires_on: token.expires_on,
			extended_expires_on: token.expires_on,
			authority: authority.to_owned(),
			resource: resource.to_owned(),
			tenant_id: token.tenant_id,
			user: token.user,
			id_token: token.id_token,
			source: TokenSource::Broker,
			extended_lifetime: false,
			correlation_id,
		}
	}
}

/// Singleflight key: one guard per cache authority, client, and requested subject.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FlowGuardKey {
	authority: String,
	client_id: String,
	subject: String,
}
impl FlowGuardKey {
	pub(crate) fn user(query: &CacheQuery, user: &UserIdentifier) -> Self {
		Self {
			authority: query.authority.clone(),
			client_id: query.client_id.to_string(),
			subject: format!("{}:{}", user.kind(), user.value().to_ascii_lowercase()),
		}
	}

	pub(crate) fn client(query: &CacheQuery, resource: &str) -> Self {
		Self {
			authority: query.authority.clone(),
			client_id: query.client_id.to_string(),
			subject: format!("client:{resource}"),
		}
	}
}

/// Returns (and creates on demand) the singleflight guard for `key`.
pub(crate) fn flow_guard<C, M>(client: &TokenClient<C, M>, key: FlowGuardKey) -> Arc<AsyncMutex<()>>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut guards = client.flow_guards.lock();

	guards.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

/// Builds the access- and refresh-token entries for a user-bound grant response.
///
/// `fallback` supplies the subject when the response carries no `id_token`, which is normal for
/// refresh grants.
pub(crate) fn user_entries(
	query: &CacheQuery,
	resource: &str,
	issued: &IssuedTokens,
	fallback: Option<&RefreshTokenEntry>,
) -> Option<(AccessTokenEntry, Option<RefreshTokenEntry>)> {
	let user = issued.user().or_else(|| fallback.and_then(|refresh| refresh.user.clone()));
	let subject = match (&user, fallback) {
		(Some(user), _) => Subject::user(&user.unique_id),
		(None, Some(refresh)) => refresh.key.subject.clone(),
		(None, None) => return None,
	};
	let mut access =
		AccessTokenEntry::from_issued(query.access_key(resource, subject.clone()), issued);

	access.user = user.clone();

	let refresh_key = query.refresh_key(subject);
	let refresh = match RefreshTokenEntry::from_issued(refresh_key.clone(), resource, issued) {
		Some(mut entry) => {
			entry.user = user;

			if let Some(previous) = fallback {
				entry.family_id = entry.family_id.or_else(|| previous.family_id.clone());
				entry.is_multi_resource |= previous.is_multi_resource;
			}

			Some(entry)
		},
		None => fallback.map(|previous| RefreshTokenEntry {
			key: refresh_key,
			refresh_token: previous.refresh_token.clone(),
			family_id: previous.family_id.clone(),
			resource: resource.to_owned(),
			is_multi_resource: previous.is_multi_resource || issued.is_multi_resource(),
			user,
		}),
	};

	Some((access, refresh))
}

/// Flattens the entries returned by [`user_entries`] for [`TokenCacheStore::store_all`].
///
/// [`TokenCacheStore::store_all`]: crate::cache::TokenCacheStore::store_all
pub(crate) fn into_cache_entries(
	access: AccessTokenEntry,
	refresh: Option<RefreshTokenEntry>,
) -> Vec<CacheEntry> {
	let mut entries = vec![CacheEntry::Access(access)];

	entries.extend(refresh.map(CacheEntry::Refresh));

	entries
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::ClientId;

	fn issued(refresh: Option<&str>, resource: Option<&str>) -> IssuedTokens {
		let now = OffsetDateTime::now_utc();

		IssuedTokens {
			access_token: TokenSecret::new("at"),
			refresh_token: refresh.map(TokenSecret::new),
			expires_on: now + Duration::hours(1),
			extended_expires_on: now + Duration::hours(2),
			id_token: None,
			claims: None,
			family_id: None,
			resource: resource.map(ToOwned::to_owned),
		}
	}

	fn query() -> CacheQuery {
		CacheQuery::user(
			"https://login.microsoftonline.com/contoso/",
			ClientId::new("app-1").expect("Client fixture should be valid."),
			UserIdentifier::AnyUser,
		)
	}

	#[test]
	fn refresh_without_identity_keeps_the_previous_subject_and_secret() {
		let query = query();
		let previous = RefreshTokenEntry {
			key: query.refresh_key(Subject::user("oid-alice")),
			refresh_token: TokenSecret::new("rt-old"),
			family_id: Some("1".into()),
			resource: "https://graph.example.com".into(),
			is_multi_resource: true,
			user: Some(UserInfo::new("oid-alice")),
		};
		let (access, refresh) =
			user_entries(&query, "https://mail.example.com", &issued(None, None), Some(&previous))
				.expect("Fallback subject should be used.");
		let refresh = refresh.expect("Previous refresh token should be carried over.");

		assert_eq!(access.key.subject, Subject::user("oid-alice"));
		assert_eq!(access.key.resource, "https://mail.example.com");
		assert_eq!(refresh.refresh_token.expose(), "rt-old");
		assert_eq!(refresh.resource, "https://mail.example.com");
		assert_eq!(refresh.family_id.as_deref(), Some("1"));
		assert!(refresh.is_multi_resource);
	}

	#[test]
	fn rotated_refresh_token_replaces_the_previous_one() {
		let query = query();
		let previous = RefreshTokenEntry {
			key: query.refresh_key(Subject::user("oid-alice")),
			refresh_token: TokenSecret::new("rt-old"),
			family_id: None,
			resource: "https://graph.example.com".into(),
			is_multi_resource: false,
			user: None,
		};
		let (_, refresh) = user_entries(
			&query,
			"https://graph.example.com",
			&issued(Some("rt-new"), Some("https://graph.example.com")),
			Some(&previous),
		)
		.expect("Fallback subject should be used.");

		assert_eq!(
			refresh.map(|entry| entry.refresh_token.expose().to_owned()),
			Some("rt-new".into())
		);
	}

	#[test]
	fn responses_without_any_identity_are_not_cacheable() {
		let issued = issued(None, None);

		assert!(user_entries(&query(), "https://graph.example.com", &issued, None).is_none());
	}
}
