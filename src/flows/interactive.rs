//! Interactive sign-in: authorization code + PKCE through the web UI or the platform broker.

pub mod session;

pub use session::{AuthorizationSession, PkceCodeChallengeMethod, Prompt};

// self
use crate::{
	_prelude::*,
	auth::{UserIdentifier, UserInfo},
	authority::AuthorityDescriptor,
	cache::CacheQuery,
	config::CLIENT_VERSION,
	context::CorrelationContext,
	delegate::{
		AuthorizationResponse, BrokerParameterInput, BrokerParameterSet, DelegateFuture,
		InteractionRequest, PlatformBroker, WebUi,
	},
	error::ConfigError,
	flows::{AuthenticationResult, InteractiveTokenRequest, TokenClient, TokenSource, common},
	http::StsHttpClient,
	oauth::{GrantRequest, IssuedTokens, OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

enum Delegate<'a> {
	WebUi(&'a dyn WebUi),
	Broker(&'a dyn PlatformBroker),
}
impl Delegate<'_> {
	fn authorize<'r>(
		&'r self,
		request: &'r InteractionRequest,
	) -> DelegateFuture<'r, AuthorizationResponse> {
		match *self {
			Self::WebUi(web_ui) => web_ui.authorize(request),
			Self::Broker(broker) => broker.authorize(request),
		}
	}

	fn label(&self) -> &'static str {
		match self {
			Self::WebUi(_) => "web_ui",
			Self::Broker(_) => "broker",
		}
	}
}

impl<C, M> TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token silently when possible and falls back to interactive sign-in.
	///
	/// Silent acquisition is skipped when the prompt forces interaction. Only failures that
	/// require interaction trigger the fallback; everything else is returned as is.
	pub async fn acquire_token(
		&self,
		request: InteractiveTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		if !request.prompt.forces_prompt() {
			match self.acquire_token_silent(request.to_silent(), ctx).await {
				Ok(result) => return Ok(result),
				Err(err) if err.requires_interaction() => {
					tracing::debug!(error = %err, "Falling back to interactive sign-in.");
				},
				Err(err) => return Err(err),
			}
		}

		self.acquire_token_interactive(request, ctx).await
	}

	/// Runs an interactive sign-in and redeems the returned authorization code.
	pub async fn acquire_token_interactive(
		&self,
		request: InteractiveTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		const KIND: FlowKind = FlowKind::Interactive;

		let span = FlowSpan::new(KIND, "acquire_token_interactive", ctx);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.run_interactive(request, ctx)).await;

		match &result {
			Ok(_) => {
				self.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
			},
			Err(err) => {
				tracing::debug!(error = %err, "Interactive acquisition failed.");
				self.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		result
	}

	async fn run_interactive(
		&self,
		request: InteractiveTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		ctx.ensure_active()?;

		let delegate = self.interaction_delegate()?;
		let descriptor = self.resolve_authority(request.authority.as_deref(), ctx).await?;
		let resource = request.resource.as_ref();
		let session = session::build_session(session::SessionInput {
			authorize_endpoint: descriptor.authorize_endpoint(),
			client_id: &self.config.client_id,
			redirect_uri: &self.config.redirect_uri,
			resource,
			user: &request.user,
			prompt: request.prompt,
			extra_query_parameters: request.extra_query_parameters.as_deref(),
			claims: request.claims.as_deref(),
			correlation_id: ctx.correlation_id(),
		})?;
		let broker_parameters = BrokerParameterSet::build(BrokerParameterInput {
			authority: descriptor.canonical(),
			resource,
			client_id: &self.config.client_id,
			correlation_id: ctx.correlation_id(),
			client_version: CLIENT_VERSION,
			user: &request.user,
			redirect_uri: &self.config.redirect_uri,
			force: request.prompt.forces_prompt(),
			extra_query_parameters: request.extra_query_parameters.as_deref(),
			claims: request.claims.as_deref(),
			is_silent: false,
		});
		let interaction = InteractionRequest {
			authorize_url: session.authorize_url.clone(),
			redirect_uri: session.redirect_uri.clone(),
			state: session.state.clone(),
			broker_parameters,
			correlation_id: ctx.correlation_id(),
		};

		tracing::debug!(delegate = delegate.label(), "Handing sign-in to the delegate.");

		let response = ctx.guard(async { Ok(delegate.authorize(&interaction).await) }).await?;
		let code = match response {
			AuthorizationResponse::Code { code, state } => {
				if let Some(state) = state {
					session.validate_state(&state)?;
				}

				code
			},
			AuthorizationResponse::Cancelled => return Err(Error::UserCancel),
			AuthorizationResponse::Failed { error, description } =>
				return Err(Error::Broker { error, description }),
		};
		let issued = self
			.exchange_code(&descriptor, resource, &code, &session, ctx)
			.await
			.map_err(|err| match err {
				Error::Cancelled => Error::Cancelled,
				err => Error::ExchangeFailed { source: Box::new(err) },
			})?;
		let query = CacheQuery::user(
			descriptor.cache_authority(),
			self.config.client_id.clone(),
			request.user.clone(),
		)
		.with_policy(descriptor.policy().map(ToOwned::to_owned));
		let (access, refresh) =
			common::user_entries(&query, resource, &issued, None).ok_or_else(|| {
				Error::ExchangeFailed { source: Box::new(ConfigError::MissingIdentity.into()) }
			})?;

		if let Some(user) = &access.user {
			ensure_requested_user(&request.user, user)?;
		}

		self.cache.store_all(common::into_cache_entries(access.clone(), refresh))?;

		Ok(AuthenticationResult::from_entry(
			access,
			descriptor.canonical(),
			TokenSource::AuthorizationCode,
			ctx.correlation_id(),
		))
	}

	fn interaction_delegate(&self) -> Result<Delegate<'_>> {
		if let Some(broker) = self.available_broker().filter(|_| self.prefers_broker()) {
			return Ok(Delegate::Broker(broker.as_ref()));
		}

		match &self.web_ui {
			Some(web_ui) => Ok(Delegate::WebUi(web_ui.as_ref())),
			None => Err(ConfigError::MissingInteractionDelegate.into()),
		}
	}

	async fn exchange_code(
		&self,
		descriptor: &AuthorityDescriptor,
		resource: &str,
		code: &str,
		session: &AuthorizationSession,
		ctx: &CorrelationContext,
	) -> Result<IssuedTokens> {
		let facade = self.facade(descriptor)?;
		let request = GrantRequest {
			strategy: self.strategy.as_ref(),
			correlation_id: ctx.correlation_id(),
			resource,
			credential_fields: self.credential_fields(descriptor)?,
		};

		ctx.guard(facade.exchange_authorization_code(
			request,
			code,
			session.verifier(),
			&session.redirect_uri,
		))
		.await
	}
}

fn ensure_requested_user(requested: &UserIdentifier, returned: &UserInfo) -> Result<()> {
	let mismatch = match requested {
		UserIdentifier::UniqueId(value) => (returned.unique_id != *value)
			.then(|| (value.clone(), returned.unique_id.clone())),
		UserIdentifier::DisplayableId(value) => {
			let displayable = returned.displayable_id.clone().unwrap_or_default();

			(!displayable.eq_ignore_ascii_case(value)).then(|| (value.clone(), displayable))
		},
		_ => None,
	};

	match mismatch {
		Some((requested, returned)) => Err(Error::UserMismatch { requested, returned }),
		None => Ok(()),
	}
}
