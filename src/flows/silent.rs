//! Cache-first silent acquisition.
//!
//! [`TokenClient::acquire_token_silent`] walks a fixed sequence of steps and stops at the first
//! one that yields a token:
//!
//! 1. `CacheLookup`: serve a fresh access token; on a miss, take the singleflight guard for the
//!    requested subject and look again so concurrent callers reuse the winner's result.
//! 2. `NeedsRefresh`: ask the platform broker, when one is configured and available.
//! 3. `RefreshGrant`: redeem the client's own refresh token minted for the requested resource.
//! 4. `MrrtFallback`: redeem a multi-resource refresh token minted for another resource, then a
//!    family refresh token issued to another client.
//! 5. `StaleFallback`: when the STS was unavailable and extended lifetime is enabled, serve an
//!    expired access token still inside its extended lifetime.
//!
//! Refresh tokens rejected with `invalid_grant` or `interaction_required` are removed before the
//! next step runs. `invalid_client` aborts immediately.

// self
use crate::{
	_prelude::*,
	authority::AuthorityDescriptor,
	cache::{AccessTokenEntry, CacheKey, CacheQuery, RefreshTokenEntry},
	config::CLIENT_VERSION,
	context::CorrelationContext,
	delegate::{BrokerParameterInput, BrokerParameterSet},
	error::{ConfigError, ServiceErrorKind},
	flows::{
		AuthenticationResult, FlowGuardKey, SilentTokenRequest, TokenClient, TokenSource, common,
	},
	http::StsHttpClient,
	oauth::{GrantRequest, OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Family id redeemed when the client's own refresh token carries none.
pub const DEFAULT_FAMILY_ID: &str = "1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SilentStep {
	CacheLookup,
	NeedsRefresh,
	RefreshGrant,
	MrrtFallback,
	StaleFallback,
}

struct SilentAttempt {
	descriptor: AuthorityDescriptor,
	query: CacheQuery,
	request: SilentTokenRequest,
	own_refresh: Option<RefreshTokenEntry>,
	last_error: Option<Error>,
}
impl SilentAttempt {
	fn resource(&self) -> &str {
		self.request.resource.as_ref()
	}

	fn unavailable(&self) -> bool {
		self.last_error.as_ref().is_some_and(Error::is_unavailable)
	}
}

impl<C, M> TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token without user interaction.
	///
	/// Fails with [`Error::InteractionRequired`] once every silent path is exhausted, or with
	/// the transport/transient failure when the STS was unavailable and no stale token could be
	/// served.
	pub async fn acquire_token_silent(
		&self,
		request: SilentTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		const KIND: FlowKind = FlowKind::Silent;

		let span = FlowSpan::new(KIND, "acquire_token_silent", ctx);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.run_silent(request, ctx)).await;

		match &result {
			Ok(result) => {
				tracing::debug!(source = %result.source, "Silent acquisition succeeded.");
				self.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
			},
			Err(err) => {
				tracing::debug!(error = %err, "Silent acquisition failed.");
				self.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		result
	}

	async fn run_silent(
		&self,
		request: SilentTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		ctx.ensure_active()?;

		let descriptor = self.resolve_authority(request.authority.as_deref(), ctx).await?;
		let query = CacheQuery::user(
			descriptor.cache_authority(),
			self.config.client_id.clone(),
			request.user.clone(),
		)
		.with_policy(descriptor.policy().map(ToOwned::to_owned));
		let mut attempt =
			SilentAttempt { descriptor, query, request, own_refresh: None, last_error: None };
		let mut singleflight = None;
		let mut step = SilentStep::CacheLookup;

		loop {
			step = match step {
				SilentStep::CacheLookup => {
					if let Some(result) = self.lookup_fresh(&attempt, ctx)? {
						return Ok(result);
					}
					if singleflight.is_some() {
						SilentStep::NeedsRefresh
					} else {
						let guard = common::flow_guard(
							self,
							FlowGuardKey::user(&attempt.query, &attempt.request.user),
						);

						singleflight = Some(ctx.guard(async { Ok(guard.lock_arc().await) }).await?);

						if attempt.request.force_refresh {
							SilentStep::NeedsRefresh
						} else {
							SilentStep::CacheLookup
						}
					}
				},
				SilentStep::NeedsRefresh => {
					if let Some(result) = self.try_broker_silently(&attempt, ctx).await? {
						return Ok(result);
					}

					SilentStep::RefreshGrant
				},
				SilentStep::RefreshGrant => {
					let own = self.cache.find_refresh_token(&attempt.query)?;

					let matching = own.as_ref().filter(|rt| rt.resource == attempt.resource());

					if let Some(refresh) = matching {
						match self.redeem_refresh_token(&attempt, refresh, ctx).await {
							Ok(entry) => {
								let source = TokenSource::RefreshGrant;

								return Ok(self.result(&attempt, entry, source, ctx));
							},
							Err(err) => attempt.last_error = Some(self.absorb(err, refresh)?),
						}
					}

					attempt.own_refresh = own;

					if attempt.unavailable() {
						SilentStep::StaleFallback
					} else {
						SilentStep::MrrtFallback
					}
				},
				SilentStep::MrrtFallback => {
					if let Some(result) = self.try_multi_resource(&mut attempt, ctx).await? {
						return Ok(result);
					}

					SilentStep::StaleFallback
				},
				SilentStep::StaleFallback => return self.serve_stale(attempt, ctx),
			};

			tracing::trace!(?step, "Silent acquisition advanced.");
		}
	}

	fn lookup_fresh(
		&self,
		attempt: &SilentAttempt,
		ctx: &CorrelationContext,
	) -> Result<Option<AuthenticationResult>> {
		if attempt.request.force_refresh {
			return Ok(None);
		}

		let now = OffsetDateTime::now_utc();
		let Some(entry) = self.cache.find_access_token(&attempt.query, attempt.resource(), now)?
		else {
			return Ok(None);
		};

		self.metrics.record_cache_hit();

		Ok(Some(self.result(attempt, entry, TokenSource::Cache, ctx)))
	}

	async fn try_broker_silently(
		&self,
		attempt: &SilentAttempt,
		ctx: &CorrelationContext,
	) -> Result<Option<AuthenticationResult>> {
		if !self.prefers_broker() {
			return Ok(None);
		}

		let Some(broker) = self.available_broker() else {
			return Ok(None);
		};
		let parameters = BrokerParameterSet::build(BrokerParameterInput {
			authority: attempt.descriptor.canonical(),
			resource: attempt.resource(),
			client_id: &self.config.client_id,
			correlation_id: ctx.correlation_id(),
			client_version: CLIENT_VERSION,
			user: &attempt.request.user,
			redirect_uri: &self.config.redirect_uri,
			force: false,
			extra_query_parameters: None,
			claims: None,
			is_silent: true,
		});
		let token = ctx.guard(broker.acquire_token_silently(&parameters)).await?;

		Ok(token.map(|token| {
			AuthenticationResult::from_broker(
				token,
				attempt.descriptor.canonical(),
				attempt.resource(),
				ctx.correlation_id(),
			)
		}))
	}

	async fn try_multi_resource(
		&self,
		attempt: &mut SilentAttempt,
		ctx: &CorrelationContext,
	) -> Result<Option<AuthenticationResult>> {
		let mut candidates = Vec::new();
		let own = attempt.own_refresh.take();

		if let Some(own) =
			own.as_ref().filter(|rt| rt.resource != attempt.resource() && rt.is_multi_resource)
		{
			candidates.push((own.clone(), TokenSource::MultiResourceRefresh));
		}

		let family_id =
			own.as_ref().and_then(|rt| rt.family_id.as_deref()).unwrap_or(DEFAULT_FAMILY_ID);

		if let Some(family) = self.cache.find_family_refresh_token(&attempt.query, family_id)? {
			candidates.push((family, TokenSource::FamilyRefresh));
		}

		for (candidate, source) in candidates {
			match self.redeem_refresh_token(attempt, &candidate, ctx).await {
				Ok(entry) => {
					self.metrics.record_mrrt_redemption();

					return Ok(Some(self.result(attempt, entry, source, ctx)));
				},
				Err(err) => {
					attempt.last_error = Some(self.absorb(err, &candidate)?);

					if attempt.unavailable() {
						break;
					}
				},
			}
		}

		Ok(None)
	}

	fn serve_stale(
		&self,
		attempt: SilentAttempt,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		if self.config.extended_lifetime_enabled && attempt.unavailable() {
			let now = OffsetDateTime::now_utc();

			if let Some(entry) =
				self.cache.find_stale_access_token(&attempt.query, attempt.resource(), now)?
			{
				tracing::warn!(
					expires_on = %entry.expires_on,
					"STS is unavailable; serving an access token inside its extended lifetime."
				);
				self.metrics.record_stale_serve();

				return Ok(self.result(&attempt, entry, TokenSource::StaleCache, ctx));
			}
		}

		Err(match attempt.last_error {
			Some(err) if err.is_unavailable() => err,
			Some(err) => Error::InteractionRequired {
				reason: "the cached refresh tokens were rejected".into(),
				source: Some(Box::new(err)),
			},
			None => Error::InteractionRequired {
				reason: "no cached token can satisfy the request".into(),
				source: None,
			},
		})
	}

	async fn redeem_refresh_token(
		&self,
		attempt: &SilentAttempt,
		refresh: &RefreshTokenEntry,
		ctx: &CorrelationContext,
	) -> Result<AccessTokenEntry> {
		let facade = self.facade(&attempt.descriptor)?;
		let request = GrantRequest {
			strategy: self.strategy.as_ref(),
			correlation_id: ctx.correlation_id(),
			resource: attempt.resource(),
			credential_fields: self.credential_fields(&attempt.descriptor)?,
		};
		let issued =
			ctx.guard(facade.refresh_token(request, refresh.refresh_token.expose())).await?;
		let (access, rotated) =
			common::user_entries(&attempt.query, attempt.resource(), &issued, Some(refresh))
				.ok_or(ConfigError::MissingIdentity)?;

		self.cache.store_all(common::into_cache_entries(access.clone(), rotated))?;

		Ok(access)
	}

	/// Classifies a refresh failure: returns it when the next step may run, propagates it
	/// otherwise.
	fn absorb(&self, err: Error, refresh: &RefreshTokenEntry) -> Result<Error> {
		match &err {
			Error::Service(service) if service.kind == ServiceErrorKind::InvalidClient => Err(err),
			Error::Service(_) => {
				if err.requires_interaction() {
					tracing::debug!(error = %err, "Removing rejected refresh token.");
					self.cache.remove(&CacheKey::Refresh(refresh.key.clone()))?;
				}

				Ok(err)
			},
			_ if err.is_unavailable() => Ok(err),
			_ => Err(err),
		}
	}

	fn result(
		&self,
		attempt: &SilentAttempt,
		entry: AccessTokenEntry,
		source: TokenSource,
		ctx: &CorrelationContext,
	) -> AuthenticationResult {
		AuthenticationResult::from_entry(
			entry,
			attempt.descriptor.canonical(),
			source,
			ctx.correlation_id(),
		)
	}
}
