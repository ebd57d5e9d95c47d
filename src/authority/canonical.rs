//! Offline authority checks.

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	authority::{AuthorityDescriptor, AuthorityKind, AuthorityValidationError, InstanceMetadata},
};

const HTTPS_PREFIX: &str = "https://";

/// Trims, checks the scheme, rejects query and fragment, and ensures a trailing `/`.
///
/// Casing is preserved and the function is idempotent.
pub fn canonicalize(authority: &str) -> Result<String, AuthorityValidationError> {
	let trimmed = authority.trim();

	if trimmed.is_empty() {
		return Err(malformed(authority, "authority is empty"));
	}

	let has_https = trimmed
		.get(..HTTPS_PREFIX.len())
		.is_some_and(|prefix| prefix.eq_ignore_ascii_case(HTTPS_PREFIX));

	if !has_https {
		return Err(AuthorityValidationError::InsecureScheme { authority: trimmed.to_owned() });
	}
	if trimmed.contains(['?', '#']) {
		return Err(AuthorityValidationError::QueryOrFragment { authority: trimmed.to_owned() });
	}

	let mut canonical = trimmed.to_owned();

	if !canonical.ends_with('/') {
		canonical.push('/');
	}

	Ok(canonical)
}

/// Canonicalizes `authority` and classifies it.
///
/// The returned descriptor is bound to self-hosted metadata until a resolver replaces it.
pub fn validate(authority: &str) -> Result<AuthorityDescriptor, AuthorityValidationError> {
	let canonical = canonicalize(authority)?;
	let url = Url::parse(&canonical).map_err(|e| malformed(&canonical, e.to_string()))?;
	let host = match (url.host_str(), url.port()) {
		(Some(host), Some(port)) => format!("{host}:{port}").to_ascii_lowercase(),
		(Some(host), None) => host.to_ascii_lowercase(),
		(None, _) => return Err(malformed(&canonical, "authority has no host")),
	};
	// Segments come from the canonical string so their casing survives.
	let raw_path = canonical
		.get(HTTPS_PREFIX.len()..)
		.and_then(|rest| rest.split_once('/'))
		.map(|(_, path)| path)
		.unwrap_or_default();
	let segments = raw_path.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>();
	let (kind, tenant, policy) = match segments.as_slice() {
		[] => return Err(AuthorityValidationError::MissingTenant { authority: canonical.clone() }),
		[first] if first.eq_ignore_ascii_case("adfs") => (AuthorityKind::Adfs, *first, None),
		[first, tenant, policy] if first.eq_ignore_ascii_case("tfp") =>
			(AuthorityKind::B2c, *tenant, Some((*policy).to_owned())),
		[first, ..] if first.eq_ignore_ascii_case("tfp") =>
			return Err(malformed(&canonical, "B2C authorities need `/tfp/{tenant}/{policy}`")),
		[tenant] => (AuthorityKind::Aad, *tenant, None),
		_ => return Err(malformed(&canonical, "unexpected path segments after the tenant")),
	};
	let tenant = TenantId::new(tenant).map_err(|e| malformed(&canonical, e.to_string()))?;
	let path = format!("{}/", segments.join("/"));
	let metadata = Arc::new(InstanceMetadata::self_hosted(&host));

	Ok(AuthorityDescriptor { canonical, kind, host, tenant, policy, path, metadata })
}

fn malformed(authority: &str, reason: impl Into<String>) -> AuthorityValidationError {
	AuthorityValidationError::Malformed { authority: authority.to_owned(), reason: reason.into() }
}
