//! Authorization URL construction, PKCE, and prompt behavior for interactive sign-in.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::UserIdentifier, config::CLIENT_VERSION, error::ConfigError};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const RESERVED_PARAMETERS: &[&str] = &[
	"response_type",
	"client_id",
	"redirect_uri",
	"resource",
	"state",
	"code_challenge",
	"code_challenge_method",
	"login_hint",
	"prompt",
	"claims",
	"client-request-id",
	"x-client-ver",
];

/// Supported PKCE challenge methods surfaced via [`AuthorizationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Prompt behavior of an interactive sign-in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
	/// Prompt only when the STS needs to; silent acquisition runs first.
	#[default]
	Auto,
	/// Always show the sign-in page and skip silent acquisition.
	Always,
	/// Show the account picker.
	SelectAccount,
	/// Re-prompt to refresh the session (for example after a claims challenge).
	RefreshSession,
}
impl Prompt {
	/// Value of the `prompt` query parameter, if any.
	pub const fn query_value(self) -> Option<&'static str> {
		match self {
			Self::Auto => None,
			Self::Always => Some("login"),
			Self::SelectAccount => Some("select_account"),
			Self::RefreshSession => Some("refresh_session"),
		}
	}

	/// Returns `true` when the user must be prompted regardless of cached state.
	pub const fn forces_prompt(self) -> bool {
		matches!(self, Self::Always)
	}
}

/// Authorization Code + PKCE handshake state for one interactive sign-in.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Opaque state value that must round-trip via the redirect.
	pub state: String,
	/// Redirect URI supplied when constructing the authorize URL.
	pub redirect_uri: Url,
	/// Fully-formed HTTPS authorize URL handed to the delegate.
	pub authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		self.pkce.method
	}

	/// Validates the returned `state` parameter after the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<(), ConfigError> {
		if returned_state == self.state { Ok(()) } else { Err(ConfigError::StateMismatch) }
	}

	pub(crate) fn verifier(&self) -> &str {
		&self.pkce.verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge", &self.pkce.challenge)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

/// Inputs of [`build_session`].
pub(crate) struct SessionInput<'a> {
	pub(crate) authorize_endpoint: String,
	pub(crate) client_id: &'a str,
	pub(crate) redirect_uri: &'a Url,
	pub(crate) resource: &'a str,
	pub(crate) user: &'a UserIdentifier,
	pub(crate) prompt: Prompt,
	pub(crate) extra_query_parameters: Option<&'a str>,
	pub(crate) claims: Option<&'a str>,
	pub(crate) correlation_id: Uuid,
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

pub(crate) fn build_session(input: SessionInput<'_>) -> Result<AuthorizationSession, ConfigError> {
	let extra = parse_extra_query_parameters(input.extra_query_parameters)?;
	let mut authorize_url = Url::parse(&input.authorize_endpoint).map_err(|source| {
		ConfigError::InvalidEndpoint { endpoint: input.authorize_endpoint.clone(), source }
	})?;
	let state = random_string(STATE_LEN);
	let pkce = PkcePair::generate();
	let mut pairs = authorize_url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", input.client_id);
	pairs.append_pair("redirect_uri", input.redirect_uri.as_str());
	pairs.append_pair("resource", input.resource);
	pairs.append_pair("state", &state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", pkce.method.as_str());

	if let Some(hint) = input.user.login_hint() {
		pairs.append_pair("login_hint", hint);
	}
	if let Some(prompt) = input.prompt.query_value() {
		pairs.append_pair("prompt", prompt);
	}
	if let Some(claims) = input.claims.filter(|claims| !claims.is_empty()) {
		pairs.append_pair("claims", claims);
	}

	pairs.append_pair("client-request-id", &input.correlation_id.to_string());
	pairs.append_pair("x-client-Ver", CLIENT_VERSION);

	for (name, value) in &extra {
		pairs.append_pair(name, value);
	}

	drop(pairs);

	Ok(AuthorizationSession {
		state,
		redirect_uri: input.redirect_uri.clone(),
		authorize_url,
		pkce,
	})
}

fn parse_extra_query_parameters(raw: Option<&str>) -> Result<Vec<(String, String)>, ConfigError> {
	let Some(raw) = raw.map(|raw| raw.trim_start_matches(['?', '&'])).filter(|raw| !raw.is_empty())
	else {
		return Ok(Vec::new());
	};
	let mut parameters = Vec::<(String, String)>::new();

	for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
		let reserved =
			RESERVED_PARAMETERS.iter().any(|reserved| name.eq_ignore_ascii_case(reserved));
		let repeated = parameters.iter().any(|(seen, _)| seen.eq_ignore_ascii_case(&name));

		if reserved || repeated {
			return Err(ConfigError::DuplicateQueryParameter { name: name.into_owned() });
		}

		parameters.push((name.into_owned(), value.into_owned()));
	}

	Ok(parameters)
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(verifier.as_bytes());
	let digest = hasher.finalize();
	URL_SAFE_NO_PAD.encode(digest)
}
