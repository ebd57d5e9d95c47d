//! App-only acquisition through the client credentials grant.

// self
use crate::{
	_prelude::*,
	auth::Subject,
	cache::{AccessTokenEntry, CacheQuery},
	context::CorrelationContext,
	error::ConfigError,
	flows::{
		AuthenticationResult, ClientTokenRequest, FlowGuardKey, TokenClient, TokenSource, common,
	},
	http::StsHttpClient,
	oauth::{GrantRequest, GrantType, OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl<C, M> TokenClient<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires an app-only token with the configured client credential.
	///
	/// A cached token is reused until it expires; concurrent callers for the same resource share
	/// one grant.
	pub async fn acquire_token_for_client(
		&self,
		request: ClientTokenRequest,
		ctx: &CorrelationContext,
	) -> Result<AuthenticationResult> {
		const KIND: FlowKind = FlowKind::ClientCredentials;

		let span = FlowSpan::new(KIND, "acquire_token_for_client", ctx);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span
			.instrument(async move {
				ctx.ensure_active()?;

				if self.credential.is_none() {
					return Err(ConfigError::MissingClientCredential {
						grant: GrantType::ClientCredentials,
					}
					.into());
				}

				let descriptor = self.resolve_authority(request.authority.as_deref(), ctx).await?;
				let resource: &str = request.resource.as_ref();
				let query =
					CacheQuery::client(descriptor.cache_authority(), self.config.client_id.clone())
						.with_policy(descriptor.policy().map(ToOwned::to_owned));
				let cached = |ctx: &CorrelationContext| -> Result<Option<AuthenticationResult>> {
					if request.force_refresh {
						return Ok(None);
					}

					let now = OffsetDateTime::now_utc();

					Ok(self.cache.find_access_token(&query, resource, now)?.map(|entry| {
						self.metrics.record_cache_hit();

						AuthenticationResult::from_entry(
							entry,
							descriptor.canonical(),
							TokenSource::Cache,
							ctx.correlation_id(),
						)
					}))
				};

				if let Some(result) = cached(ctx)? {
					return Ok(result);
				}

				let guard = common::flow_guard(self, FlowGuardKey::client(&query, resource));
				let _singleflight = ctx.guard(async { Ok(guard.lock_arc().await) }).await?;

				if let Some(result) = cached(ctx)? {
					return Ok(result);
				}

				let facade = self.facade(&descriptor)?;
				let grant = GrantRequest {
					strategy: self.strategy.as_ref(),
					correlation_id: ctx.correlation_id(),
					resource,
					credential_fields: self.credential_fields(&descriptor)?,
				};

				match ctx.guard(facade.exchange_client_credentials(grant)).await {
					Ok(issued) => {
						let mut entry = AccessTokenEntry::from_issued(
							query.access_key(resource, Subject::Client),
							&issued,
						);

						entry.user = None;

						self.cache.store(entry.clone())?;

						Ok(AuthenticationResult::from_entry(
							entry,
							descriptor.canonical(),
							TokenSource::ClientCredentials,
							ctx.correlation_id(),
						))
					},
					Err(err) if err.is_unavailable() && self.config.extended_lifetime_enabled => {
						let now = OffsetDateTime::now_utc();

						match self.cache.find_stale_access_token(&query, resource, now)? {
							Some(entry) => {
								tracing::warn!(
									error = %err,
									"STS is unavailable; serving a stale app token."
								);
								self.metrics.record_stale_serve();

								Ok(AuthenticationResult::from_entry(
									entry,
									descriptor.canonical(),
									TokenSource::StaleCache,
									ctx.correlation_id(),
								))
							},
							None => Err(err),
						}
					},
					Err(err) => Err(err),
				}
			})
			.await;

		match &result {
			Ok(_) => {
				self.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
			},
			Err(_) => {
				self.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		result
	}
}
