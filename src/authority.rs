//! Authority validation, canonicalization, and instance discovery.
//!
//! An authority string is turned into an [`AuthorityDescriptor`] in two steps:
//! [`canonicalize`]/[`validate`] check the URL shape offline, then [`AuthorityResolver::resolve`]
//! attaches the instance metadata (preferred hosts and aliases) from the process-wide
//! [`InstanceDiscoveryCache`], running instance discovery on a miss.

pub mod canonical;
pub mod discovery;

pub use canonical::*;
pub use discovery::*;

// self
use crate::{_prelude::*, auth::TenantId};

/// Errors raised while validating or discovering an authority.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthorityValidationError {
	/// Authority is not a parseable URL or has an unexpected path.
	#[error("Authority `{authority}` is malformed: {reason}.")]
	Malformed {
		/// Offending authority.
		authority: String,
		/// Parsing failure summary.
		reason: String,
	},
	/// Authority does not use `https`.
	#[error("Authority `{authority}` must use the https scheme.")]
	InsecureScheme {
		/// Offending authority.
		authority: String,
	},
	/// Authority carries a query string or fragment.
	#[error("Authority `{authority}` must not contain a query or fragment.")]
	QueryOrFragment {
		/// Offending authority.
		authority: String,
	},
	/// Authority has no tenant segment.
	#[error("Authority `{authority}` is missing the tenant segment.")]
	MissingTenant {
		/// Offending authority.
		authority: String,
	},
	/// Instance discovery does not know the host.
	#[error("Host `{host}` is not a known STS instance.")]
	UnknownInstance {
		/// Rejected host.
		host: String,
	},
	/// Authority validation was requested for a kind that cannot be discovered.
	#[error("Authority validation is not supported for {kind} authorities.")]
	ValidationNotSupported {
		/// Authority kind.
		kind: AuthorityKind,
	},
}

/// Flavor of STS an authority points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityKind {
	/// Multi-tenant directory; supports instance discovery.
	Aad,
	/// On-premises federation server (`/adfs`).
	Adfs,
	/// Consumer directory addressed with a policy (`/tfp/{tenant}/{policy}`).
	B2c,
}
impl AuthorityKind {
	/// Stable label for logs and errors.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Aad => "AAD",
			Self::Adfs => "ADFS",
			Self::B2c => "B2C",
		}
	}
}
impl Display for AuthorityKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Validated authority plus the instance metadata it resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityDescriptor {
	canonical: String,
	kind: AuthorityKind,
	host: String,
	tenant: TenantId,
	policy: Option<String>,
	path: String,
	metadata: Arc<InstanceMetadata>,
}
impl AuthorityDescriptor {
	/// Canonical authority (`https://host/path/`, original casing).
	pub fn canonical(&self) -> &str {
		&self.canonical
	}

	/// Authority kind.
	pub fn kind(&self) -> AuthorityKind {
		self.kind
	}

	/// Lowercase host as written by the caller.
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Tenant segment (`adfs` for ADFS authorities).
	pub fn tenant(&self) -> &TenantId {
		&self.tenant
	}

	/// B2C policy, when present.
	pub fn policy(&self) -> Option<&str> {
		self.policy.as_deref()
	}

	/// Host used for network calls.
	pub fn preferred_network(&self) -> &str {
		&self.metadata.preferred_network
	}

	/// Host used in cache keys.
	pub fn preferred_cache(&self) -> &str {
		&self.metadata.preferred_cache
	}

	/// Every host considered equivalent to this one.
	pub fn aliases(&self) -> &[String] {
		&self.metadata.aliases
	}

	/// Authority used in cache keys; equal for every alias of one instance.
	pub fn cache_authority(&self) -> String {
		format!("https://{}/{}", self.metadata.preferred_cache, self.path)
	}

	/// Token endpoint on the preferred network host.
	pub fn token_endpoint(&self) -> String {
		format!("https://{}/{}oauth2/token", self.metadata.preferred_network, self.path)
	}

	/// Authorization endpoint on the preferred network host.
	pub fn authorize_endpoint(&self) -> String {
		format!("https://{}/{}oauth2/authorize", self.metadata.preferred_network, self.path)
	}

	/// Returns a copy bound to `metadata`.
	pub fn with_metadata(mut self, metadata: Arc<InstanceMetadata>) -> Self {
		self.metadata = metadata;

		self
	}
}
