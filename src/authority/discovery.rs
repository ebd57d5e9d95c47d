//! Process-wide instance metadata and the resolver that fills it.

// std
use std::sync::OnceLock;
// crates.io
use oauth2::{
	AsyncHttpClient,
	http::{Method, Request, header::ACCEPT},
};
// self
use crate::{
	_prelude::*,
	authority::{self, AuthorityDescriptor, AuthorityKind, AuthorityValidationError},
	config::ClientConfig,
	context::CorrelationContext,
	error::{ConfigError, TransientError},
	http::{CorrelatedHandle, ResponseMetadataSlot, StsHttpClient},
	oauth::{StsOperation, TransportErrorMapper},
};

const DISCOVERY_API_VERSION: &str = "1.1";

/// Preferred hosts and aliases of one STS instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
	/// Host used for network calls.
	pub preferred_network: String,
	/// Host used in cache keys.
	pub preferred_cache: String,
	/// Every host naming the same instance.
	pub aliases: Vec<String>,
}
impl InstanceMetadata {
	/// Metadata for a host that is its own preferred network and cache host.
	pub fn self_hosted(host: &str) -> Self {
		let host = host.to_ascii_lowercase();

		Self { preferred_network: host.clone(), preferred_cache: host.clone(), aliases: vec![host] }
	}
}

/// Instance metadata keyed by lowercase host.
///
/// Entries are immutable once inserted; [`InstanceDiscoveryCache::clear`] drops them all.
#[derive(Debug, Default)]
pub struct InstanceDiscoveryCache {
	entries: Mutex<HashMap<String, Arc<InstanceMetadata>>>,
}
impl InstanceDiscoveryCache {
	/// Shared cache used by every resolver that is not given its own.
	pub fn process() -> Arc<Self> {
		static PROCESS: OnceLock<Arc<InstanceDiscoveryCache>> = OnceLock::new();

		Arc::clone(PROCESS.get_or_init(Default::default))
	}

	/// Returns the metadata cached for `host`.
	pub fn get(&self, host: &str) -> Option<Arc<InstanceMetadata>> {
		self.entries.lock().get(&host.to_ascii_lowercase()).cloned()
	}

	/// Caches `metadata` under each of its aliases.
	pub fn insert(&self, metadata: InstanceMetadata) -> Arc<InstanceMetadata> {
		let metadata = Arc::new(metadata);
		let mut entries = self.entries.lock();

		for alias in &metadata.aliases {
			entries.insert(alias.to_ascii_lowercase(), Arc::clone(&metadata));
		}

		metadata
	}

	/// Drops every cached entry.
	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	/// Number of cached hosts.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns `true` when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

/// Turns authority strings into descriptors bound to instance metadata.
#[derive(Clone, Debug)]
pub struct AuthorityResolver {
	cache: Arc<InstanceDiscoveryCache>,
	validate_authority: bool,
	trusted_host: String,
}
impl AuthorityResolver {
	/// Creates a resolver backed by the process-wide cache.
	pub fn new(validate_authority: bool, trusted_host: impl Into<String>) -> Self {
		Self {
			cache: InstanceDiscoveryCache::process(),
			validate_authority,
			trusted_host: trusted_host.into(),
		}
	}

	/// Creates a resolver from the client configuration.
	pub fn from_config(config: &ClientConfig) -> Self {
		Self::new(config.validate_authority, config.trusted_discovery_host.clone())
	}

	/// Replaces the backing cache.
	pub fn with_cache(mut self, cache: Arc<InstanceDiscoveryCache>) -> Self {
		self.cache = cache;

		self
	}

	/// Backing cache.
	pub fn cache(&self) -> &Arc<InstanceDiscoveryCache> {
		&self.cache
	}

	/// Validates `authority` and binds it to instance metadata, running discovery on a miss.
	pub async fn resolve<C, M>(
		&self,
		authority: &str,
		http_client: &C,
		mapper: &M,
		ctx: &CorrelationContext,
	) -> Result<AuthorityDescriptor>
	where
		C: ?Sized + StsHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let descriptor = authority::validate(authority)?;

		if let Some(metadata) = self.cache.get(descriptor.host()) {
			tracing::trace!(host = descriptor.host(), "Instance metadata cache hit.");

			return Ok(descriptor.with_metadata(metadata));
		}
		if !self.validate_authority {
			let metadata = self.cache.insert(InstanceMetadata::self_hosted(descriptor.host()));

			return Ok(descriptor.with_metadata(metadata));
		}
		if descriptor.kind() != AuthorityKind::Aad {
			return Err(AuthorityValidationError::ValidationNotSupported { kind: descriptor.kind() }
				.into());
		}

		let metadata = ctx.guard(self.discover(&descriptor, http_client, mapper, ctx)).await?;

		Ok(descriptor.with_metadata(metadata))
	}

	async fn discover<C, M>(
		&self,
		descriptor: &AuthorityDescriptor,
		http_client: &C,
		mapper: &M,
		ctx: &CorrelationContext,
	) -> Result<Arc<InstanceMetadata>>
	where
		C: ?Sized + StsHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let url = self.discovery_url(descriptor)?;

		tracing::debug!(
			host = descriptor.host(),
			trusted_host = %self.trusted_host,
			"Running instance discovery."
		);

		let request = Request::builder()
			.method(Method::GET)
			.uri(url.as_str())
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let slot = ResponseMetadataSlot::default();
		let handle =
			CorrelatedHandle::new(http_client.with_metadata(slot.clone()), ctx.correlation_id());
		let response = handle.call(request).await.map_err(|e| {
			mapper.map_transport_error(StsOperation::InstanceDiscovery, slot.take().as_ref(), e)
		})?;
		let status = response.status().as_u16();
		let body = serde_json::from_slice::<DiscoveryResponse>(response.body()).map_err(|e| {
			TransientError::Discovery {
				message: format!("response is not valid JSON: {e}"),
				status: Some(status),
			}
		})?;

		if let Some(error) = body.error {
			if error.eq_ignore_ascii_case("invalid_instance") {
				return Err(AuthorityValidationError::UnknownInstance {
					host: descriptor.host().to_owned(),
				}
				.into());
			}

			let description = body.error_description.unwrap_or_default();

			return Err(TransientError::Discovery {
				message: format!("`{error}`: {description}"),
				status: Some(status),
			}
			.into());
		}
		if !response.status().is_success() {
			return Err(TransientError::Discovery {
				message: "endpoint returned a non-success status".into(),
				status: Some(status),
			}
			.into());
		}
		if body.metadata.is_empty() {
			// An empty metadata list confirms the host without naming aliases.
			return Ok(self.cache.insert(InstanceMetadata::self_hosted(descriptor.host())));
		}

		let mut resolved = None;

		for entry in body.metadata {
			let is_queried =
				entry.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(descriptor.host()));
			let metadata = self.cache.insert(entry);

			if is_queried {
				resolved = Some(metadata);
			}
		}

		resolved.ok_or_else(|| {
			AuthorityValidationError::UnknownInstance { host: descriptor.host().to_owned() }.into()
		})
	}

	fn discovery_url(&self, descriptor: &AuthorityDescriptor) -> Result<Url> {
		let base = format!("https://{}/common/discovery/instance", self.trusted_host);
		let authorize =
			format!("https://{}/{}/oauth2/authorize", descriptor.host(), descriptor.tenant());
		let url = Url::parse_with_params(
			&base,
			[
				("api-version", DISCOVERY_API_VERSION),
				("authorization_endpoint", authorize.as_str()),
			],
		)
		.map_err(|source| ConfigError::InvalidEndpoint { endpoint: base.clone(), source })?;

		Ok(url)
	}
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
	#[serde(default)]
	metadata: Vec<InstanceMetadata>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn insert_registers_every_alias() {
		let cache = InstanceDiscoveryCache::default();
		let metadata = cache.insert(InstanceMetadata {
			preferred_network: "login.microsoftonline.com".into(),
			preferred_cache: "login.windows.net".into(),
			aliases: vec![
				"login.microsoftonline.com".into(),
				"login.windows.net".into(),
				"Login.Microsoft.com".into(),
			],
		});

		assert_eq!(cache.len(), 3);
		assert_eq!(cache.get("login.microsoft.com"), Some(Arc::clone(&metadata)));
		assert_eq!(cache.get("LOGIN.WINDOWS.NET"), Some(metadata));

		cache.clear();

		assert!(cache.is_empty());
	}

	#[test]
	fn aliases_share_the_cache_authority() {
		let cache = InstanceDiscoveryCache::default();
		let metadata = cache.insert(InstanceMetadata {
			preferred_network: "login.microsoftonline.com".into(),
			preferred_cache: "login.windows.net".into(),
			aliases: vec!["login.microsoftonline.com".into(), "login.windows.net".into()],
		});
		let first = authority::validate("https://login.microsoftonline.com/contoso")
			.expect("First alias should validate.")
			.with_metadata(Arc::clone(&metadata));
		let second = authority::validate("https://login.windows.net/contoso")
			.expect("Second alias should validate.")
			.with_metadata(metadata);

		assert_eq!(first.cache_authority(), second.cache_authority());
		assert_eq!(
			second.token_endpoint(),
			"https://login.microsoftonline.com/contoso/oauth2/token"
		);
	}

	#[test]
	fn discovery_url_targets_the_trusted_host() {
		let resolver = AuthorityResolver::new(true, "login.microsoftonline.com")
			.with_cache(Arc::new(InstanceDiscoveryCache::default()));
		let descriptor = authority::validate("https://login.contoso.com/tenant")
			.expect("Authority should validate.");
		let url = resolver.discovery_url(&descriptor).expect("Discovery URL should build.");

		assert_eq!(url.host_str(), Some("login.microsoftonline.com"));
		assert_eq!(url.path(), "/common/discovery/instance");
		assert!(url.query_pairs().any(|(key, value)| {
			key == "authorization_endpoint"
				&& value == "https://login.contoso.com/tenant/oauth2/authorize"
		}));
	}
}
