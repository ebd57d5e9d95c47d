//! STS strategy hooks that customize token requests and classify token-endpoint errors.
//!
//! Implementations decorate outgoing token requests and normalize error mapping without tying
//! flows to any particular HTTP client.

// self
use crate::{_prelude::*, oauth::GrantType};

/// Strategy hook that allows deployments to decorate requests and classify errors.
///
/// Implementors must be `Send + Sync`; the hooks use crate-owned data types so downstream crates
/// never depend on transport-specific structures. Override only what you need;
/// `augment_token_request` defaults to a no-op.
pub trait StsStrategy
where
	Self: Send + Sync,
{
	/// Maps an STS error response into the acquisition taxonomy.
	fn classify_token_error(&self, ctx: &StsErrorContext) -> StsErrorKind;

	/// Gives deployments a chance to add custom form parameters before dispatching.
	///
	/// The map already holds `resource` and the client credential fields.
	fn augment_token_request(&self, _grant: GrantType, _form: &mut BTreeMap<String, String>) {}
}

/// Canonical STS error categories used by the acquisition state machines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StsErrorKind {
	/// The grant (refresh token, code) is invalid, expired, or revoked.
	InvalidGrant,
	/// The STS demands user interaction (consent, MFA, conditional access).
	InteractionRequired,
	/// Client authentication failed.
	InvalidClient,
	/// Failure is temporary; the STS is unavailable.
	Transient,
	/// Any other rejection.
	Other,
}

/// Context passed to strategies when classifying token errors.
///
/// The struct keeps only primitive data (status codes, OAuth fields, body preview) so
/// strategies stay decoupled from any HTTP client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StsErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the STS, when available.
	pub http_status: Option<u16>,
	/// STS-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// STS-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl StsErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the STS.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for responses that are not JSON.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Default strategy for directory STS error codes.
///
/// It prioritizes structured OAuth fields (`error`, `error_description`), then body text hints,
/// and finally the HTTP status code.
#[derive(Debug, Default)]
pub struct DefaultStsStrategy;
impl Display for DefaultStsStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-sts-strategy")
	}
}
impl StsStrategy for DefaultStsStrategy {
	fn classify_token_error(&self, ctx: &StsErrorContext) -> StsErrorKind {
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(match_exact_value) {
			return kind;
		}
		if let Some(kind) = classify_body(ctx.error_description.as_deref()) {
			return kind;
		}
		if let Some(kind) = classify_body(ctx.body_preview.as_deref()) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= StsErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(StsErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn match_exact_value(value: &str) -> Option<StsErrorKind> {
	const INTERACTION: &[&str] = &["interaction_required", "consent_required", "login_required"];

	if value.eq_ignore_ascii_case("invalid_grant") {
		Some(StsErrorKind::InvalidGrant)
	} else if INTERACTION.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(StsErrorKind::InteractionRequired)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(StsErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(StsErrorKind::Transient)
	} else {
		None
	}
}

fn classify_body(body: Option<&str>) -> Option<StsErrorKind> {
	let lowered = body?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(StsErrorKind::InvalidGrant),
		text if text.contains("interaction_required") || text.contains("consent_required") =>
			Some(StsErrorKind::InteractionRequired),
		text if text.contains("invalid_client") => Some(StsErrorKind::InvalidClient),
		text if text.contains("temporarily_unavailable") => Some(StsErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> StsErrorKind {
	match status {
		Some(401) => StsErrorKind::InvalidClient,
		Some(429) => StsErrorKind::Transient,
		Some(code) if code >= 500 => StsErrorKind::Transient,
		_ => StsErrorKind::Other,
	}
}
