//! Crate-level error types shared across flows, the cache, and the authority resolver.

// self
use crate::{_prelude::*, oauth::GrantType};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Authority is malformed, insecure, or not a recognized instance.
	#[error(transparent)]
	Authority(#[from] crate::authority::AuthorityValidationError),
	/// Token cache lookup could not be answered unambiguously.
	#[error(transparent)]
	Cache(#[from] crate::cache::CacheError),
	/// Persistence hook or snapshot failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::cache::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Client credential could not be built or applied.
	#[error(transparent)]
	Credential(#[from] crate::credential::CredentialError),
	/// Temporary STS failure; eligible for the stale-token fallback.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS); eligible for the stale-token fallback.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// STS rejected the request.
	#[error(transparent)]
	Service(#[from] ServiceError),

	/// Silent acquisition exhausted every non-interactive path.
	#[error("User interaction is required: {reason}.")]
	InteractionRequired {
		/// Why the silent flow gave up.
		reason: String,
		/// Failure observed by the last silent step, when one was attempted.
		#[source]
		source: Option<Box<Error>>,
	},
	/// The user dismissed the sign-in surface.
	#[error("User canceled the sign-in.")]
	UserCancel,
	/// The platform broker or web UI reported an error.
	#[error("Broker reported `{error}`: {description}.")]
	Broker {
		/// Error code returned by the broker.
		error: String,
		/// Human-readable description returned by the broker.
		description: String,
	},
	/// The authorization code could not be redeemed.
	#[error("Authorization code exchange failed.")]
	ExchangeFailed {
		/// Underlying grant failure.
		#[source]
		source: Box<Error>,
	},
	/// The STS signed in a different user than the one requested.
	#[error("Signed-in user `{returned}` does not match the requested user `{requested}`.")]
	UserMismatch {
		/// Displayable identifier supplied by the caller.
		requested: String,
		/// Displayable identifier confirmed by the STS.
		returned: String,
	},
	/// The caller's cancellation signal fired before the flow completed.
	#[error("Token acquisition was cancelled.")]
	Cancelled,
}
impl Error {
	/// Returns `true` when the failure means the STS or the network was unavailable.
	///
	/// These are the only failures that may be answered with a stale access token.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_))
	}

	/// Returns `true` when the caller should fall back to interactive acquisition.
	pub fn requires_interaction(&self) -> bool {
		match self {
			Self::InteractionRequired { .. } => true,
			Self::Service(err) => matches!(
				err.kind,
				ServiceErrorKind::InvalidGrant | ServiceErrorKind::InteractionRequired
			),
			_ => false,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// An STS endpoint derived from the authority is not a valid URL.
	#[error("Endpoint `{endpoint}` is not a valid URL.")]
	InvalidEndpoint {
		/// Offending endpoint string.
		endpoint: String,
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Redirect URI carries a fragment, which the STS never echoes back.
	#[error("Redirect URI `{uri}` must not contain a fragment.")]
	UnsupportedRedirect {
		/// Offending redirect URI.
		uri: String,
	},
	/// Instance discovery host is not a bare host name.
	#[error("Discovery host `{host}` is not a bare host name.")]
	InvalidDiscoveryHost {
		/// Offending host.
		host: String,
	},
	/// Configuration document could not be parsed.
	#[error("Client configuration is invalid.")]
	InvalidConfig {
		/// Structured parsing failure with the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
	},
	/// Client identifier or resource failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// The grant needs a client credential but none was configured.
	#[error("The {grant} grant requires a client credential.")]
	MissingClientCredential {
		/// Grant label.
		grant: GrantType,
	},
	/// Interactive acquisition needs a web UI or broker delegate.
	#[error("No interaction delegate is configured.")]
	MissingInteractionDelegate,
	/// Extra query parameters collide with a parameter the flow already sends.
	#[error("Extra query parameter `{name}` duplicates a reserved parameter.")]
	DuplicateQueryParameter {
		/// Offending parameter name.
		name: String,
	},
	/// The authorization response carried a different `state` value.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// The `id_token` returned by the STS could not be decoded.
	#[error("The id_token returned by the STS is malformed: {reason}.")]
	InvalidIdToken {
		/// Decoding failure summary.
		reason: String,
	},
	/// The STS returned no identity for a user-bound grant.
	#[error("Token endpoint response carried no user identity.")]
	MissingIdentity,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary STS failures.
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// STS returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Instance discovery endpoint failed without rejecting the authority.
	#[error("Instance discovery failed: {message}.")]
	Discovery {
		/// Message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the STS.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the STS.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Sub-kinds of an STS-reported failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceErrorKind {
	/// The grant (refresh token, code) is invalid, expired, or revoked.
	InvalidGrant,
	/// The STS demands user interaction (consent, MFA, conditional access).
	InteractionRequired,
	/// Client authentication failed.
	InvalidClient,
	/// Any other OAuth error.
	Other,
}
impl ServiceErrorKind {
	/// Returns a stable label for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InvalidGrant => "invalid_grant",
			Self::InteractionRequired => "interaction_required",
			Self::InvalidClient => "invalid_client",
			Self::Other => "other",
		}
	}
}
impl Display for ServiceErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Failure reported by the STS token endpoint.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("STS rejected the {grant} grant ({kind}): {reason}.")]
pub struct ServiceError {
	/// Classification used by the acquisition state machines.
	pub kind: ServiceErrorKind,
	/// Grant that was rejected.
	pub grant: GrantType,
	/// STS-supplied `error` code, when present.
	pub oauth_error: Option<String>,
	/// STS-supplied description or a synthesized summary.
	pub reason: String,
	/// HTTP status code, when available.
	pub status: Option<u16>,
}
impl ServiceError {
	/// Creates a service error without an OAuth code or status.
	pub fn new(kind: ServiceErrorKind, grant: GrantType, reason: impl Into<String>) -> Self {
		Self { kind, grant, oauth_error: None, reason: reason.into(), status: None }
	}
}
