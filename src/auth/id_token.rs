//! Unverified decoding of the `id_token` returned alongside access tokens.
//!
//! Signature verification belongs to the caller; the cache only needs the identity claims to
//! key entries by the STS-confirmed user.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{_prelude::*, auth::UserInfo, error::ConfigError};

/// Identity claims read from an `id_token` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
	/// Directory object id.
	#[serde(default)]
	pub oid: Option<String>,
	/// Subject identifier.
	#[serde(default)]
	pub sub: Option<String>,
	/// Tenant id.
	#[serde(default)]
	pub tid: Option<String>,
	/// User principal name.
	#[serde(default)]
	pub upn: Option<String>,
	/// Legacy sign-in name.
	#[serde(default)]
	pub unique_name: Option<String>,
	/// Email address.
	#[serde(default)]
	pub email: Option<String>,
	/// Given name.
	#[serde(default)]
	pub given_name: Option<String>,
	/// Family name.
	#[serde(default)]
	pub family_name: Option<String>,
	/// Identity provider for guest users.
	#[serde(default)]
	pub idp: Option<String>,
}
impl IdTokenClaims {
	/// Decodes the payload segment of a compact JWT without verifying its signature.
	pub fn decode(raw: &str) -> Result<Self, ConfigError> {
		let mut segments = raw.split('.');
		let payload = match (segments.next(), segments.next(), segments.next()) {
			(Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
			_ => return Err(invalid("expected three dot-separated segments")),
		};
		let bytes = URL_SAFE_NO_PAD
			.decode(payload.trim_end_matches('='))
			.map_err(|e| invalid(format!("payload is not base64url: {e}")))?;

		serde_json::from_slice(&bytes).map_err(|e| invalid(format!("payload is not JSON: {e}")))
	}

	/// Derives the cache identity, preferring `oid` over `sub`.
	pub fn user_info(&self) -> Option<UserInfo> {
		let unique_id = self.oid.as_ref().or(self.sub.as_ref())?.clone();

		Some(UserInfo {
			unique_id,
			displayable_id: self
				.upn
				.as_ref()
				.or(self.unique_name.as_ref())
				.or(self.email.as_ref())
				.cloned(),
			given_name: self.given_name.clone(),
			family_name: self.family_name.clone(),
			identity_provider: self.idp.clone(),
		})
	}
}

fn invalid(reason: impl Into<String>) -> ConfigError {
	ConfigError::InvalidIdToken { reason: reason.into() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn encode(payload: &str) -> String {
		format!(
			"{}.{}.",
			URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
			URL_SAFE_NO_PAD.encode(payload)
		)
	}

	#[test]
	fn oid_and_upn_win_over_fallbacks() {
		let raw = encode(
			r#"{"oid":"oid-1","sub":"sub-1","tid":"tenant","upn":"a@contoso.com","email":"x@y.z"}"#,
		);
		let claims = IdTokenClaims::decode(&raw).expect("Fixture id_token should decode.");
		let user = claims.user_info().expect("Claims with oid should produce a user.");

		assert_eq!(user.unique_id, "oid-1");
		assert_eq!(user.displayable_id.as_deref(), Some("a@contoso.com"));
		assert_eq!(claims.tid.as_deref(), Some("tenant"));
	}

	#[test]
	fn sub_and_email_are_fallbacks() {
		let raw = encode(r#"{"sub":"sub-only","email":"b@contoso.com"}"#);
		let user = IdTokenClaims::decode(&raw)
			.expect("Fixture id_token should decode.")
			.user_info()
			.expect("Claims with sub should produce a user.");

		assert_eq!(user.unique_id, "sub-only");
		assert_eq!(user.displayable_id.as_deref(), Some("b@contoso.com"));
	}

	#[test]
	fn malformed_tokens_are_rejected() {
		assert!(IdTokenClaims::decode("not-a-jwt").is_err());
		assert!(IdTokenClaims::decode("a.!!!.c").is_err());
		assert!(IdTokenClaims::decode(&encode("[1,2,3]")).is_err());
		assert!(
			IdTokenClaims::decode(&encode("{}"))
				.expect("Empty claims should decode.")
				.user_info()
				.is_none()
		);
	}
}
