//! Cache keys, entries, and lookup queries.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, Subject, TokenSecret, UserIdentifier, UserInfo},
	oauth::IssuedTokens,
};

/// Composite key of a cached access token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessTokenKey {
	/// Cache authority (`https://{preferred_cache}/{path}`).
	pub authority: String,
	/// Resource the token was minted for.
	pub resource: String,
	/// Client that requested the token.
	pub client_id: String,
	/// User or client the token was issued to.
	pub subject: Subject,
	/// B2C policy, when the authority has one.
	pub policy: Option<String>,
}

/// Resource-independent key of a cached refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshTokenKey {
	/// Cache authority.
	pub authority: String,
	/// Client that owns the refresh token.
	pub client_id: String,
	/// User the refresh token was issued to.
	pub subject: Subject,
}

/// Cached access token plus the identity snapshot it was issued with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenEntry {
	/// Entry key.
	pub key: AccessTokenKey,
	/// Access token.
	pub access_token: TokenSecret,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// Extended expiry; never earlier than `expires_on`.
	pub extended_expires_on: OffsetDateTime,
	/// Raw `id_token`, when one was issued.
	pub id_token: Option<String>,
	/// Identity decoded from the `id_token`.
	pub user: Option<UserInfo>,
	/// Tenant id from the `id_token`.
	pub tenant_id: Option<String>,
}
impl AccessTokenEntry {
	/// Builds an entry from a grant response.
	pub fn from_issued(key: AccessTokenKey, issued: &IssuedTokens) -> Self {
		Self {
			key,
			access_token: issued.access_token.clone(),
			expires_on: issued.expires_on,
			extended_expires_on: issued.extended_expires_on.max(issued.expires_on),
			id_token: issued.id_token.clone(),
			user: issued.user(),
			tenant_id: issued.tenant_id().map(ToOwned::to_owned),
		}
	}

	/// Returns `true` while the token can be served without refreshing.
	pub fn is_fresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
		self.expires_on - skew > now
	}

	/// Returns `true` when the token is expired but inside its extended lifetime.
	pub fn is_stale_but_extended(&self, now: OffsetDateTime, skew: Duration) -> bool {
		!self.is_fresh(now, skew) && self.extended_expires_on > now
	}
}

/// Cached refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenEntry {
	/// Entry key.
	pub key: RefreshTokenKey,
	/// Refresh token.
	pub refresh_token: TokenSecret,
	/// Family id (`foci`), shared across clients of one family.
	pub family_id: Option<String>,
	/// Resource the token was last minted for.
	pub resource: String,
	/// Whether the token may be redeemed for other resources.
	pub is_multi_resource: bool,
	/// Identity the token was issued to.
	pub user: Option<UserInfo>,
}
impl RefreshTokenEntry {
	/// Builds an entry from a grant response, returning `None` when no refresh token was issued.
	pub fn from_issued(
		key: RefreshTokenKey,
		resource: &str,
		issued: &IssuedTokens,
	) -> Option<Self> {
		let refresh_token = issued.refresh_token.clone()?;

		Some(Self {
			key,
			refresh_token,
			family_id: issued.family_id.clone(),
			resource: resource.to_owned(),
			is_multi_resource: issued.is_multi_resource(),
			user: issued.user(),
		})
	}
}

/// Any cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEntry {
	/// Access token entry.
	Access(AccessTokenEntry),
	/// Refresh token entry.
	Refresh(RefreshTokenEntry),
}
impl From<AccessTokenEntry> for CacheEntry {
	fn from(entry: AccessTokenEntry) -> Self {
		Self::Access(entry)
	}
}
impl From<RefreshTokenEntry> for CacheEntry {
	fn from(entry: RefreshTokenEntry) -> Self {
		Self::Refresh(entry)
	}
}

/// Any cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
	/// Access token key.
	Access(AccessTokenKey),
	/// Refresh token key.
	Refresh(RefreshTokenKey),
}
impl From<AccessTokenKey> for CacheKey {
	fn from(key: AccessTokenKey) -> Self {
		Self::Access(key)
	}
}
impl From<RefreshTokenKey> for CacheKey {
	fn from(key: RefreshTokenKey) -> Self {
		Self::Refresh(key)
	}
}

/// Who a lookup is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectQuery {
	/// A user, matched with the identifier's precision.
	User(UserIdentifier),
	/// The client itself (app-only tokens).
	Client,
}

/// Lookup parameters shared by every cache query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheQuery {
	/// Cache authority.
	pub authority: String,
	/// Requesting client.
	pub client_id: ClientId,
	/// Subject filter.
	pub subject: SubjectQuery,
	/// B2C policy.
	pub policy: Option<String>,
}
impl CacheQuery {
	/// Query for a user's tokens.
	pub fn user(authority: impl Into<String>, client_id: ClientId, user: UserIdentifier) -> Self {
		Self {
			authority: authority.into(),
			client_id,
			subject: SubjectQuery::User(user),
			policy: None,
		}
	}

	/// Query for app-only tokens.
	pub fn client(authority: impl Into<String>, client_id: ClientId) -> Self {
		Self { authority: authority.into(), client_id, subject: SubjectQuery::Client, policy: None }
	}

	/// Restricts the query to a B2C policy.
	pub fn with_policy(mut self, policy: Option<String>) -> Self {
		self.policy = policy;

		self
	}

	/// Access-token key for `resource` and an already-resolved subject.
	pub fn access_key(&self, resource: &str, subject: Subject) -> AccessTokenKey {
		AccessTokenKey {
			authority: self.authority.clone(),
			resource: resource.to_owned(),
			client_id: self.client_id.to_string(),
			subject,
			policy: self.policy.clone(),
		}
	}

	/// Refresh-token key for an already-resolved subject.
	pub fn refresh_key(&self, subject: Subject) -> RefreshTokenKey {
		RefreshTokenKey {
			authority: self.authority.clone(),
			client_id: self.client_id.to_string(),
			subject,
		}
	}

	pub(crate) fn matches_subject(&self, subject: &Subject, user: Option<&UserInfo>) -> bool {
		match (&self.subject, subject) {
			(SubjectQuery::Client, Subject::Client) => true,
			(SubjectQuery::User(identifier), Subject::User { unique_id }) => match identifier {
				UserIdentifier::UniqueId(value) => unique_id == value,
				_ => match user {
					Some(user) => identifier.matches(user),
					None => identifier.is_any_user(),
				},
			},
			_ => false,
		}
	}

	pub(crate) fn matches_access(&self, key: &AccessTokenKey, resource: &str) -> bool {
		key.authority == self.authority
			&& key.client_id == self.client_id.as_ref()
			&& key.resource == resource
			&& key.policy == self.policy
	}

	pub(crate) fn matches_refresh(&self, key: &RefreshTokenKey) -> bool {
		key.authority == self.authority && key.client_id == self.client_id.as_ref()
	}
}
