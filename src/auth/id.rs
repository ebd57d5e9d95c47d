//! Strongly typed identifiers for clients, resources, and tenants.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $check:path) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;
				$check(view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;
				$check(&value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 256;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, resource, tenant).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, resource, tenant).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, resource, tenant).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// A resource containing a scheme separator is not an absolute `http(s)` URI.
	#[error("Resource `{value}` is not an absolute http(s) URI.")]
	InvalidResourceUri {
		/// Offending resource.
		value: String,
	},
	/// A resource URI carries a query or fragment.
	#[error("Resource URI `{value}` cannot carry a query or fragment.")]
	ResourceUriSuffix {
		/// Offending resource.
		value: String,
	},
	/// The tenant contains a character that would change the authority path.
	#[error("Tenant `{value}` contains a reserved URL character.")]
	ReservedTenantCharacter {
		/// Offending tenant.
		value: String,
	},
}

def_id! {
	ClientId,
	"Application (client) identifier registered with the STS.",
	"Client",
	accept_any
}
def_id! {
	ResourceId,
	"Resource (audience) an access token is minted for: an app id URI or a bare app id.",
	"Resource",
	check_resource
}
def_id! { TenantId, "Directory tenant segment of an authority.", "Tenant", check_tenant }

impl ClientId {
	/// Whether the id is a GUID, the form the STS assigns to registered applications.
	pub fn is_guid(&self) -> bool {
		Uuid::parse_str(&self.0).is_ok()
	}
}

impl ResourceId {
	/// Whether the resource is an app id URI rather than a bare app id.
	pub fn is_uri(&self) -> bool {
		self.0.contains("://")
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

fn accept_any(_: &str) -> Result<(), IdentifierError> {
	Ok(())
}

fn check_resource(view: &str) -> Result<(), IdentifierError> {
	if !view.contains("://") {
		return Ok(());
	}

	let url = Url::parse(view)
		.ok()
		.filter(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
		.ok_or_else(|| IdentifierError::InvalidResourceUri { value: view.to_owned() })?;

	if url.query().is_some() || url.fragment().is_some() {
		return Err(IdentifierError::ResourceUriSuffix { value: view.to_owned() });
	}

	Ok(())
}

fn check_tenant(view: &str) -> Result<(), IdentifierError> {
	if view.contains(['/', '?', '#', '\\']) {
		return Err(IdentifierError::ReservedTenantCharacter { value: view.to_owned() });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_blank_values() {
		assert!(ClientId::new(" client-123").is_err(), "Leading whitespace must be rejected.");
		assert!(ClientId::new("client-123 ").is_err(), "Trailing whitespace must be rejected.");

		let client = ClientId::new("client-123").expect("Client fixture should be valid.");

		assert_eq!(client.as_ref(), "client-123");
		assert!(ResourceId::new("").is_err());
		assert!(TenantId::new("with space").is_err());
	}

	#[test]
	fn resource_uris_are_accepted_verbatim() {
		let resource = ResourceId::new("https://graph.windows.net/")
			.expect("Resource URIs should be valid identifiers.");

		assert_eq!(resource.to_string(), "https://graph.windows.net/");
		assert_eq!(format!("{resource:?}"), "Resource(https://graph.windows.net/)");
	}

	#[test]
	fn resource_uris_must_be_absolute_http_urls() {
		let app_id = ResourceId::new("00000002-0000-0000-c000-000000000000")
			.expect("Bare app ids should be valid resources.");

		assert!(!app_id.is_uri());
		assert!(matches!(
			ResourceId::new("ftp://files.example.com"),
			Err(IdentifierError::InvalidResourceUri { .. })
		));
		assert!(matches!(
			ResourceId::new("https://graph.example.com/?api=1"),
			Err(IdentifierError::ResourceUriSuffix { .. })
		));
		assert!(matches!(
			ResourceId::new("https://graph.example.com/#me"),
			Err(IdentifierError::ResourceUriSuffix { .. })
		));
	}

	#[test]
	fn tenants_cannot_reshape_the_authority_path() {
		assert!(TenantId::new("contoso.onmicrosoft.com").is_ok());
		assert!(matches!(
			TenantId::new("contoso/evil"),
			Err(IdentifierError::ReservedTenantCharacter { .. })
		));
		assert!(
			ClientId::new("9a6f3f3e-2f4c-4f0d-9d1b-0c5a7e1b2c3d")
				.expect("Guid client ids should be valid.")
				.is_guid()
		);
		assert!(!ClientId::new("app-1").expect("Named client ids should be valid.").is_guid());
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let client: ClientId = serde_json::from_str("\"client-42\"")
			.expect("Client identifier should deserialize successfully.");

		assert_eq!(client.as_ref(), "client-42");
		assert!(serde_json::from_str::<ClientId>("\"with space\"").is_err());
		assert!(serde_json::from_str::<ClientId>("\"\"").is_err());
	}

	#[test]
	fn length_limit_is_inclusive() {
		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		ResourceId::new(&exact).expect("Exact length should succeed.");

		let too_long = "a".repeat(IDENTIFIER_MAX_LEN + 1);

		assert!(matches!(
			ResourceId::new(&too_long),
			Err(IdentifierError::TooLong { kind: "Resource", .. })
		));
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<TenantId, u8> = HashMap::from_iter([(
			TenantId::new("contoso.onmicrosoft.com")
				.expect("Tenant used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("contoso.onmicrosoft.com"), Some(&7));
	}
}
