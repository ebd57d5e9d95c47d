//! Acquisition flows driven by the [`TokenClient`] facade.

pub mod common;
pub mod interactive;
pub mod metrics;
pub mod silent;

mod client_credentials;

pub use common::*;
pub use interactive::*;
pub use metrics::AcquisitionMetrics;

// self
use crate::{
	_prelude::*,
	authority::{AuthorityDescriptor, AuthorityResolver, InstanceDiscoveryCache},
	cache::TokenCacheStore,
	config::{AuthorizationUserAgent, ClientConfig},
	context::CorrelationContext,
	credential::ClientCredential,
	delegate::{PlatformBroker, WebUi},
	http::StsHttpClient,
	oauth::{StsFacade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	strategy::{DefaultStsStrategy, StsStrategy},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Token client specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenClient = TokenClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Acquires tokens for one client registration.
///
/// The client owns the transport, the token cache, the authority resolver, the optional client
/// credential, and the interaction delegates so each flow only implements its state machine.
/// Cloning is cheap and clones share the cache, the metrics, and the singleflight guards.
#[derive(Clone)]
pub struct TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound STS request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Client registration and acquisition policy.
	pub config: ClientConfig,
	/// Token cache shared by every flow.
	pub cache: Arc<TokenCacheStore>,
	/// Authority resolver backed by the instance discovery cache.
	pub resolver: AuthorityResolver,
	/// Strategy classifying STS errors and decorating token requests.
	pub strategy: Arc<dyn StsStrategy>,
	/// Credential for confidential clients.
	pub credential: Option<ClientCredential>,
	/// Web UI delegate for interactive sign-in.
	pub web_ui: Option<Arc<dyn WebUi>>,
	/// Platform broker delegate.
	pub platform_broker: Option<Arc<dyn PlatformBroker>>,
	/// Shared acquisition counters.
	pub metrics: Arc<AcquisitionMetrics>,
	flow_guards: Arc<Mutex<HashMap<FlowGuardKey, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: ClientConfig,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			cache: Arc::new(TokenCacheStore::new(config.clock_skew())),
			resolver: AuthorityResolver::from_config(&config),
			strategy: Arc::new(DefaultStsStrategy),
			credential: None,
			web_ui: None,
			platform_broker: None,
			metrics: Default::default(),
			flow_guards: Default::default(),
			config,
		}
	}

	/// Replaces the token cache, for example with one carrying a persistence hook.
	pub fn with_cache(mut self, cache: Arc<TokenCacheStore>) -> Self {
		self.cache = cache;

		self
	}

	/// Uses a private instance discovery cache instead of the process-wide one.
	pub fn with_discovery_cache(mut self, cache: Arc<InstanceDiscoveryCache>) -> Self {
		self.resolver = self.resolver.with_cache(cache);

		self
	}

	/// Replaces the STS strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn StsStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Attaches a client credential (confidential clients).
	pub fn with_credential(mut self, credential: ClientCredential) -> Self {
		self.credential = Some(credential);

		self
	}

	/// Attaches the web UI delegate.
	pub fn with_web_ui(mut self, web_ui: Arc<dyn WebUi>) -> Self {
		self.web_ui = Some(web_ui);

		self
	}

	/// Attaches the platform broker delegate.
	pub fn with_platform_broker(mut self, broker: Arc<dyn PlatformBroker>) -> Self {
		self.platform_broker = Some(broker);

		self
	}

	/// Validates and resolves `authority` (or the configured default).
	pub async fn resolve_authority(
		&self,
		authority: Option<&str>,
		ctx: &CorrelationContext,
	) -> Result<AuthorityDescriptor> {
		const KIND: FlowKind = FlowKind::InstanceDiscovery;

		let span = FlowSpan::new(KIND, "resolve_authority", ctx);
		let authority = authority.unwrap_or(&self.config.authority);
		let result = span
			.instrument(self.resolver.resolve(
				authority,
				self.http_client.as_ref(),
				self.transport_mapper.as_ref(),
				ctx,
			))
			.await;

		if result.is_err() {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);
		}

		result
	}

	pub(crate) fn facade(&self, descriptor: &AuthorityDescriptor) -> Result<StsFacade<C, M>> {
		StsFacade::new(
			&descriptor.token_endpoint(),
			&self.config.client_id,
			self.http_client.clone(),
			self.transport_mapper.clone(),
		)
	}

	pub(crate) fn credential_fields(
		&self,
		descriptor: &AuthorityDescriptor,
	) -> Result<Vec<(String, String)>> {
		match &self.credential {
			Some(credential) => Ok(credential.form_fields(
				&self.config.client_id,
				&descriptor.token_endpoint(),
				OffsetDateTime::now_utc(),
			)?),
			None => Ok(Vec::new()),
		}
	}

	pub(crate) fn available_broker(&self) -> Option<&Arc<dyn PlatformBroker>> {
		self.platform_broker.as_ref().filter(|broker| broker.is_available())
	}

	pub(crate) fn prefers_broker(&self) -> bool {
		self.config.user_agent == AuthorizationUserAgent::Broker
	}
}
#[cfg(feature = "reqwest")]
impl TokenClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client that provisions its own reqwest-backed transport.
	pub fn new(config: ClientConfig) -> Self {
		Self::with_http_client(
			config,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenClient")
			.field("config", &self.config)
			.field("cache", &self.cache)
			.field("credential", &self.credential.as_ref().map(ClientCredential::kind))
			.field("web_ui_set", &self.web_ui.is_some())
			.field("platform_broker_set", &self.platform_broker.is_some())
			.finish()
	}
}
