//! Token-endpoint facade over the `oauth2` crate.
//!
//! The facade sends the three grants this crate uses through a client configured with the
//! directory token response (which carries `id_token`, `ext_expires_in`, `foci`, and `resource`
//! next to the standard fields) and maps every failure into the crate [`Error`] taxonomy.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AccessToken, AuthType, AuthorizationCode, ClientId as OAuthClientId, EndpointNotSet,
	EndpointSet, HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	Scope, StandardRevocableToken, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRequestTokenError, BasicRevocationErrorResponse,
		BasicTokenIntrospectionResponse, BasicTokenType,
	},
};
use serde::Deserializer;
// self
use crate::{
	_prelude::*,
	auth::{IdTokenClaims, TokenSecret, UserInfo},
	error::{ConfigError, ServiceError, ServiceErrorKind, TransientError, TransportError},
	http::{CorrelatedHandle, ResponseMetadata, ResponseMetadataSlot, StsHttpClient},
	strategy::{StsErrorContext, StsErrorKind, StsStrategy},
};

type DirectoryClient = oauth2::Client<
	BasicErrorResponse,
	DirectoryTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// OAuth 2.0 grant types used against the STS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization code redeemed after interactive sign-in.
	AuthorizationCode,
	/// Refresh token redeemed by the silent flow.
	RefreshToken,
	/// App-only client credentials.
	ClientCredentials,
}
impl GrantType {
	/// Returns the RFC 6749 identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
			GrantType::ClientCredentials => "client_credentials",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// STS call a transport failure happened on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StsOperation {
	/// Token endpoint call for a grant.
	Grant(GrantType),
	/// Instance discovery lookup.
	InstanceDiscovery,
}
impl StsOperation {
	/// Endpoint label used in error messages.
	pub const fn endpoint(self) -> &'static str {
		match self {
			Self::Grant(_) => "token endpoint",
			Self::InstanceDiscovery => "instance discovery endpoint",
		}
	}
}

/// Directory token response: the standard fields plus the directory extensions.
///
/// The directory STS sends `expires_in` as a JSON string, so lifetimes accept both strings and
/// numbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryTokenResponse {
	access_token: AccessToken,
	#[serde(deserialize_with = "oauth2::helpers::deserialize_untagged_enum_case_insensitive")]
	token_type: BasicTokenType,
	#[serde(default, deserialize_with = "seconds", skip_serializing_if = "Option::is_none")]
	expires_in: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<RefreshToken>,
	#[serde(
		rename = "scope",
		default,
		deserialize_with = "oauth2::helpers::deserialize_space_delimited_vec",
		serialize_with = "oauth2::helpers::serialize_space_delimited_vec",
		skip_serializing_if = "Option::is_none"
	)]
	scopes: Option<Vec<Scope>>,
	#[serde(flatten)]
	extra_fields: DirectoryTokenFields,
}
impl DirectoryTokenResponse {
	/// Directory extension fields.
	pub fn extra_fields(&self) -> &DirectoryTokenFields {
		&self.extra_fields
	}
}
impl TokenResponse for DirectoryTokenResponse {
	type TokenType = BasicTokenType;

	fn access_token(&self) -> &AccessToken {
		&self.access_token
	}

	fn token_type(&self) -> &BasicTokenType {
		&self.token_type
	}

	fn expires_in(&self) -> Option<std::time::Duration> {
		self.expires_in.map(std::time::Duration::from_secs)
	}

	fn refresh_token(&self) -> Option<&RefreshToken> {
		self.refresh_token.as_ref()
	}

	fn scopes(&self) -> Option<&Vec<Scope>> {
		self.scopes.as_ref()
	}
}

/// Directory-specific token response fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTokenFields {
	/// Raw `id_token` issued alongside user tokens.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
	/// Extended lifetime in seconds, used while the STS is unavailable.
	#[serde(default, deserialize_with = "seconds", skip_serializing_if = "Option::is_none")]
	pub ext_expires_in: Option<u64>,
	/// Family of client ids sharing the refresh token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub foci: Option<String>,
	/// Resource echoed by the STS; its presence marks a multi-resource refresh token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource: Option<String>,
}

/// Tokens returned by a successful grant, with absolute expiries.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
	/// Access token.
	pub access_token: TokenSecret,
	/// Refresh token, when issued or rotated.
	pub refresh_token: Option<TokenSecret>,
	/// Access-token expiry.
	pub expires_on: OffsetDateTime,
	/// Extended expiry; never earlier than `expires_on`.
	pub extended_expires_on: OffsetDateTime,
	/// Raw `id_token`, when issued.
	pub id_token: Option<String>,
	/// Decoded `id_token` claims.
	pub claims: Option<IdTokenClaims>,
	/// Family id (`foci`) of the refresh token.
	pub family_id: Option<String>,
	/// Resource echoed by the STS.
	pub resource: Option<String>,
}
impl IssuedTokens {
	/// Identity confirmed by the `id_token`.
	pub fn user(&self) -> Option<UserInfo> {
		self.claims.as_ref().and_then(IdTokenClaims::user_info)
	}

	/// Tenant id from the `id_token`.
	pub fn tenant_id(&self) -> Option<&str> {
		self.claims.as_ref().and_then(|claims| claims.tid.as_deref())
	}

	/// Whether the refresh token may be redeemed for other resources.
	pub fn is_multi_resource(&self) -> bool {
		self.resource.is_some()
	}
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		operation: StsOperation,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: StsOperation,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(operation, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				map_generic_transport_error(operation, meta, message),
			_ => map_unknown_transport_error(operation, meta),
		}
	}
}

/// Per-grant inputs shared by every token request.
pub(crate) struct GrantRequest<'a> {
	pub(crate) strategy: &'a dyn StsStrategy,
	pub(crate) correlation_id: Uuid,
	pub(crate) resource: &'a str,
	pub(crate) credential_fields: Vec<(String, String)>,
}
impl GrantRequest<'_> {
	fn form(&self, grant: GrantType) -> Vec<(String, String)> {
		let mut form = BTreeMap::new();

		form.insert("resource".to_owned(), self.resource.to_owned());

		for (key, value) in &self.credential_fields {
			form.insert(key.clone(), value.clone());
		}

		self.strategy.augment_token_request(grant, &mut form);

		form.into_iter().collect()
	}
}

pub(crate) trait OAuth2Facade {
	fn refresh_token<'a>(
		&'a self,
		request: GrantRequest<'a>,
		refresh_token: &'a str,
	) -> FacadeFuture<'a, IssuedTokens>;

	fn exchange_authorization_code<'a>(
		&'a self,
		request: GrantRequest<'a>,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> FacadeFuture<'a, IssuedTokens>;

	fn exchange_client_credentials<'a>(
		&'a self,
		request: GrantRequest<'a>,
	) -> FacadeFuture<'a, IssuedTokens>;
}

pub(crate) struct StsFacade<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: DirectoryClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> StsFacade<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(
		token_endpoint: &str,
		client_id: &str,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_owned()).map_err(|source| {
			ConfigError::InvalidEndpoint { endpoint: token_endpoint.to_owned(), source }
		})?;
		let oauth_client: DirectoryClient =
			oauth2::Client::new(OAuthClientId::new(client_id.to_owned()))
				.set_token_uri(token_url)
				.set_auth_type(AuthType::RequestBody);

		Ok(Self { oauth_client, http_client, error_mapper })
	}

	fn handle(
		&self,
		slot: ResponseMetadataSlot,
		correlation_id: Uuid,
	) -> CorrelatedHandle<C::Handle> {
		CorrelatedHandle::new(self.http_client.with_metadata(slot), correlation_id)
	}
}
impl<C, M> OAuth2Facade for StsFacade<C, M>
where
	C: ?Sized + StsHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn refresh_token<'a>(
		&'a self,
		request: GrantRequest<'a>,
		refresh_token: &'a str,
	) -> FacadeFuture<'a, IssuedTokens> {
		const GRANT: GrantType = GrantType::RefreshToken;

		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = self.handle(meta.clone(), request.correlation_id);
			let refresh_secret = RefreshToken::new(refresh_token.to_owned());
			let mut token_request = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.add_scope(Scope::new("openid".into()));

			for (key, value) in request.form(GRANT) {
				token_request = token_request.add_extra_param(key, value);
			}

			let response = token_request.request_async(&handle).await.map_err(|err| {
				map_request_error(
					request.strategy,
					GRANT,
					meta.take(),
					err,
					self.error_mapper.as_ref(),
				)
			})?;

			map_token_response(response, OffsetDateTime::now_utc())
		})
	}

	fn exchange_authorization_code<'a>(
		&'a self,
		request: GrantRequest<'a>,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> FacadeFuture<'a, IssuedTokens> {
		const GRANT: GrantType = GrantType::AuthorizationCode;

		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = self.handle(meta.clone(), request.correlation_id);
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let mut token_request = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.add_extra_param("scope", "openid");

			for (key, value) in request.form(GRANT) {
				token_request = token_request.add_extra_param(key, value);
			}

			let response = token_request.request_async(&handle).await.map_err(|err| {
				map_request_error(
					request.strategy,
					GRANT,
					meta.take(),
					err,
					self.error_mapper.as_ref(),
				)
			})?;

			map_token_response(response, OffsetDateTime::now_utc())
		})
	}

	fn exchange_client_credentials<'a>(
		&'a self,
		request: GrantRequest<'a>,
	) -> FacadeFuture<'a, IssuedTokens> {
		const GRANT: GrantType = GrantType::ClientCredentials;

		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = self.handle(meta.clone(), request.correlation_id);
			let mut token_request = self.oauth_client.exchange_client_credentials();

			for (key, value) in request.form(GRANT) {
				token_request = token_request.add_extra_param(key, value);
			}

			let response = token_request.request_async(&handle).await.map_err(|err| {
				map_request_error(
					request.strategy,
					GRANT,
					meta.take(),
					err,
					self.error_mapper.as_ref(),
				)
			})?;

			map_token_response(response, OffsetDateTime::now_utc())
		})
	}
}

fn map_token_response(
	response: DirectoryTokenResponse,
	received_at: OffsetDateTime,
) -> Result<IssuedTokens> {
	let expires_in = positive_seconds(response.expires_in().map(|value| value.as_secs()))?;
	let extra = response.extra_fields();
	let extended_in = match extra.ext_expires_in {
		Some(secs) => positive_seconds(Some(secs))?.max(expires_in),
		None => expires_in,
	};
	let claims = extra.id_token.as_deref().map(IdTokenClaims::decode).transpose()?;

	Ok(IssuedTokens {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned())),
		expires_on: received_at + expires_in,
		extended_expires_on: received_at + extended_in,
		id_token: extra.id_token.clone(),
		claims,
		family_id: extra.foci.clone(),
		resource: extra.resource.clone(),
	})
}

fn positive_seconds(secs: Option<u64>) -> Result<Duration, ConfigError> {
	let secs = secs.ok_or(ConfigError::MissingExpiresIn)?;
	let secs = i64::try_from(secs).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if secs <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn);
	}

	Ok(Duration::seconds(secs))
}

fn seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Seconds {
		Number(u64),
		Text(String),
	}

	match Option::<Seconds>::deserialize(deserializer)? {
		None => Ok(None),
		Some(Seconds::Number(value)) => Ok(Some(value)),
		Some(Seconds::Text(raw)) => raw.trim().parse().map(Some).map_err(serde::de::Error::custom),
	}
}

fn map_request_error<E, M>(
	strategy: &dyn StsStrategy,
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, grant, response, meta_ref),
		RequestTokenError::Request(error) =>
			mapper.map_transport_error(StsOperation::Grant(grant), meta_ref, error),
		RequestTokenError::Parse(error, _body) => ServiceError {
			kind: ServiceErrorKind::Other,
			grant,
			oauth_error: None,
			reason: format!("token response is malformed at `{}`: {}", error.path(), error.inner()),
			status: meta_status(meta_ref),
		}
		.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message: format!("Token endpoint returned an unexpected response: {message}"),
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(
	strategy: &dyn StsStrategy,
	grant: GrantType,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref().to_owned();
	let mut ctx = StsErrorContext::new(grant).with_oauth_error(code.clone());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let reason = response.error_description().cloned().unwrap_or_else(|| code.clone());
	let kind = match strategy.classify_token_error(&ctx) {
		StsErrorKind::InvalidGrant => ServiceErrorKind::InvalidGrant,
		StsErrorKind::InteractionRequired => ServiceErrorKind::InteractionRequired,
		StsErrorKind::InvalidClient => ServiceErrorKind::InvalidClient,
		StsErrorKind::Other => ServiceErrorKind::Other,
		StsErrorKind::Transient =>
			return TransientError::TokenEndpoint {
				message: format!("Token endpoint returned `{code}`: {reason}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
	};

	ServiceError { kind, grant, oauth_error: Some(code), reason, status: meta_status(meta) }.into()
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	operation: StsOperation,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: format!("Request timed out while calling the {}", operation.endpoint()),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

#[cfg(feature = "reqwest")]
fn map_generic_transport_error(
	operation: StsOperation,
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> Error {
	TransientError::TokenEndpoint {
		message: format!(
			"HTTP client error occurred while calling the {}: {message}",
			operation.endpoint()
		),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

#[cfg(feature = "reqwest")]
fn map_unknown_transport_error(operation: StsOperation, meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the {}", operation.endpoint()),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
