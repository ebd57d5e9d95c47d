//! User identifiers supplied by callers and identities confirmed by the STS.

// self
use crate::_prelude::*;

/// Precision tag attached to a [`UserIdentifier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserIdentifierKind {
	/// Immutable object identifier issued by the directory.
	UniqueId,
	/// Sign-in name that must match the signed-in user.
	DisplayableId,
	/// Sign-in name used as a hint only.
	OptionalDisplayableId,
	/// No preference; any single cached user is acceptable.
	AnyUser,
}
impl UserIdentifierKind {
	/// Returns the literal used on the broker wire and in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::UniqueId => "UniqueId",
			Self::DisplayableId => "DisplayableId",
			Self::OptionalDisplayableId => "OptionalDisplayableId",
			Self::AnyUser => "AnyUser",
		}
	}
}
impl Display for UserIdentifierKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Identifies which user a token request is for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserIdentifier {
	/// Match the directory object id exactly.
	UniqueId(String),
	/// Match the sign-in name; interactive sign-in must confirm the same user.
	DisplayableId(String),
	/// Prefer the sign-in name when present.
	OptionalDisplayableId(String),
	/// Accept whichever user is cached, if there is exactly one.
	#[default]
	AnyUser,
}
impl UserIdentifier {
	/// Returns the precision tag.
	pub fn kind(&self) -> UserIdentifierKind {
		match self {
			Self::UniqueId(_) => UserIdentifierKind::UniqueId,
			Self::DisplayableId(_) => UserIdentifierKind::DisplayableId,
			Self::OptionalDisplayableId(_) => UserIdentifierKind::OptionalDisplayableId,
			Self::AnyUser => UserIdentifierKind::AnyUser,
		}
	}

	/// Returns the raw identifier value; empty for [`UserIdentifier::AnyUser`].
	pub fn value(&self) -> &str {
		match self {
			Self::UniqueId(value)
			| Self::DisplayableId(value)
			| Self::OptionalDisplayableId(value) => value,
			Self::AnyUser => "",
		}
	}

	/// Kind reported to a platform broker.
	///
	/// `AnyUser` travels as an empty optional displayable id.
	pub fn broker_kind(&self) -> UserIdentifierKind {
		match self.kind() {
			UserIdentifierKind::AnyUser => UserIdentifierKind::OptionalDisplayableId,
			kind => kind,
		}
	}

	/// Returns `true` when any cached user satisfies the identifier.
	pub fn is_any_user(&self) -> bool {
		match self {
			Self::AnyUser => true,
			Self::OptionalDisplayableId(value) => value.is_empty(),
			_ => false,
		}
	}

	/// Sign-in name to pre-fill on the authorization page.
	pub fn login_hint(&self) -> Option<&str> {
		match self {
			Self::DisplayableId(value) | Self::OptionalDisplayableId(value)
				if !value.is_empty() =>
				Some(value),
			_ => None,
		}
	}

	/// Checks a cached user against this identifier.
	pub fn matches(&self, user: &UserInfo) -> bool {
		match self {
			Self::UniqueId(value) => user.unique_id == *value,
			Self::DisplayableId(value) | Self::OptionalDisplayableId(value)
				if !value.is_empty() =>
				user.displayable_id
					.as_deref()
					.is_some_and(|displayable| displayable.eq_ignore_ascii_case(value)),
			_ => true,
		}
	}
}

/// Identity confirmed by the STS for a user-bound token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
	/// Directory object id (`oid`, falling back to `sub`).
	pub unique_id: String,
	/// Sign-in name (`upn`, `unique_name`, or `email`).
	pub displayable_id: Option<String>,
	/// Given name claim.
	pub given_name: Option<String>,
	/// Family name claim.
	pub family_name: Option<String>,
	/// Issuing identity provider (`idp`), for guest users.
	pub identity_provider: Option<String>,
}
impl UserInfo {
	/// Creates a user with only a unique id.
	pub fn new(unique_id: impl Into<String>) -> Self {
		Self {
			unique_id: unique_id.into(),
			displayable_id: None,
			given_name: None,
			family_name: None,
			identity_provider: None,
		}
	}

	/// Sets the displayable id.
	pub fn with_displayable_id(mut self, displayable_id: impl Into<String>) -> Self {
		self.displayable_id = Some(displayable_id.into());

		self
	}
}

/// Who a cached token was issued to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
	/// Token issued to a signed-in user, keyed by unique id.
	User {
		/// STS-confirmed unique id.
		unique_id: String,
	},
	/// App-only token issued to the client itself.
	Client,
}
impl Subject {
	/// Builds a user subject.
	pub fn user(unique_id: impl Into<String>) -> Self {
		Self::User { unique_id: unique_id.into() }
	}
}
