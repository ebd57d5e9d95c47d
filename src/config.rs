//! Immutable client configuration.

// self
use crate::{_prelude::*, auth::ClientId, error::ConfigError};

/// Authority used when none is configured.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";
/// Host queried for instance discovery.
pub const DEFAULT_TRUSTED_HOST: &str = "login.microsoftonline.com";
/// Seconds subtracted from access-token expiry before a cached token is considered expired.
pub const DEFAULT_CLOCK_SKEW_SECS: u32 = 300;
/// Version string reported in `x-client-Ver` and to the platform broker.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Surface used for interactive sign-in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationUserAgent {
	/// Embedded or system web view supplied by the application.
	#[default]
	WebUi,
	/// Platform broker application, when installed.
	Broker,
}

/// Client registration and acquisition policy.
///
/// Values are fixed for the lifetime of a [`TokenClient`](crate::flows::TokenClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
	/// Application (client) id.
	pub client_id: ClientId,
	/// Redirect URI registered for the application.
	pub redirect_uri: Url,
	/// Default authority for acquisitions.
	#[serde(default = "default_authority")]
	pub authority: String,
	/// Run instance discovery before trusting an AAD authority.
	#[serde(default = "default_true")]
	pub validate_authority: bool,
	/// Allow serving expired-but-extended tokens while the STS is unavailable.
	#[serde(default)]
	pub extended_lifetime_enabled: bool,
	/// Expiry tolerance applied to cached access tokens.
	#[serde(default = "default_clock_skew_secs")]
	pub clock_skew_secs: u32,
	/// Interactive sign-in surface.
	#[serde(default)]
	pub user_agent: AuthorizationUserAgent,
	/// Host used for instance discovery.
	#[serde(default = "default_trusted_host")]
	pub trusted_discovery_host: String,
}
impl ClientConfig {
	/// Creates a configuration with defaults for everything but the registration.
	pub fn new(client_id: ClientId, redirect_uri: Url) -> Self {
		Self {
			client_id,
			redirect_uri,
			authority: default_authority(),
			validate_authority: true,
			extended_lifetime_enabled: false,
			clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
			user_agent: AuthorizationUserAgent::default(),
			trusted_discovery_host: default_trusted_host(),
		}
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ConfigError::InvalidConfig { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Sets the default authority.
	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = authority.into();

		self
	}

	/// Enables or disables authority validation.
	pub fn with_validate_authority(mut self, validate: bool) -> Self {
		self.validate_authority = validate;

		self
	}

	/// Enables or disables the stale-token fallback.
	pub fn with_extended_lifetime(mut self, enabled: bool) -> Self {
		self.extended_lifetime_enabled = enabled;

		self
	}

	/// Overrides the clock skew.
	pub fn with_clock_skew_secs(mut self, secs: u32) -> Self {
		self.clock_skew_secs = secs;

		self
	}

	/// Selects the interactive sign-in surface.
	pub fn with_user_agent(mut self, user_agent: AuthorizationUserAgent) -> Self {
		self.user_agent = user_agent;

		self
	}

	/// Overrides the instance discovery host.
	pub fn with_trusted_discovery_host(mut self, host: impl Into<String>) -> Self {
		self.trusted_discovery_host = host.into();

		self
	}

	/// Clock skew as a duration.
	pub fn clock_skew(&self) -> Duration {
		Duration::seconds(i64::from(self.clock_skew_secs))
	}

	/// Checks cross-field constraints that serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.redirect_uri.fragment().is_some() {
			return Err(ConfigError::UnsupportedRedirect { uri: self.redirect_uri.to_string() });
		}
		if self.trusted_discovery_host.trim().is_empty()
			|| self.trusted_discovery_host.contains(['/', '?', '#'])
		{
			return Err(ConfigError::InvalidDiscoveryHost {
				host: self.trusted_discovery_host.clone(),
			});
		}

		Ok(())
	}
}

fn default_authority() -> String {
	DEFAULT_AUTHORITY.into()
}

fn default_true() -> bool {
	true
}

fn default_clock_skew_secs() -> u32 {
	DEFAULT_CLOCK_SKEW_SECS
}

fn default_trusted_host() -> String {
	DEFAULT_TRUSTED_HOST.into()
}
