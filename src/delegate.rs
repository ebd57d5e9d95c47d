//! Interaction delegates: the application's web UI and the platform broker.
//!
//! The crate never renders UI. Interactive acquisition hands an [`InteractionRequest`] to a
//! [`WebUi`] or a [`PlatformBroker`] and waits for an [`AuthorizationResponse`].

pub mod params;

pub use params::*;

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserInfo},
};

/// Boxed future returned by delegates.
pub type DelegateFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Everything a delegate needs to run one sign-in.
#[derive(Clone, Debug)]
pub struct InteractionRequest {
	/// Fully built authorization URL.
	pub authorize_url: Url,
	/// Redirect URI the delegate should intercept.
	pub redirect_uri: Url,
	/// `state` value the response must echo.
	pub state: String,
	/// Parameter set for the platform broker.
	pub broker_parameters: BrokerParameterSet,
	/// Correlation id of the call.
	pub correlation_id: Uuid,
}

/// Outcome reported by a delegate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationResponse {
	/// The user signed in and the STS issued a code.
	Code {
		/// Authorization code.
		code: String,
		/// Echoed `state`, when the delegate captured it.
		state: Option<String>,
	},
	/// The user dismissed the surface.
	Cancelled,
	/// The STS or the broker reported an error.
	Failed {
		/// Error code.
		error: String,
		/// Human-readable description.
		description: String,
	},
}
impl AuthorizationResponse {
	/// Parses the query of the URL the redirect landed on.
	pub fn from_redirect(url: &Url) -> Self {
		let mut code = None;
		let mut state = None;
		let mut error = None;
		let mut description = None;

		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => state = Some(value.into_owned()),
				"error" => error = Some(value.into_owned()),
				"error_description" => description = Some(value.into_owned()),
				_ => {},
			}
		}

		match (code, error) {
			(_, Some(error)) if error == "access_denied" && description.is_none() =>
				Self::Cancelled,
			(_, Some(error)) =>
				Self::Failed { error, description: description.unwrap_or_default() },
			(Some(code), None) => Self::Code { code, state },
			(None, None) => Self::Failed {
				error: "authorization_failed".into(),
				description: "The redirect carried neither a code nor an error.".into(),
			},
		}
	}
}

/// Token issued directly by the platform broker.
#[derive(Clone, Debug)]
pub struct BrokerToken {
	/// Access token.
	pub access_token: TokenSecret,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// Raw `id_token`, when available.
	pub id_token: Option<String>,
	/// Signed-in user.
	pub user: Option<UserInfo>,
	/// Tenant id.
	pub tenant_id: Option<String>,
}

/// Application-provided sign-in surface (embedded or system web view).
pub trait WebUi
where
	Self: Send + Sync,
{
	/// Navigates to `request.authorize_url` and reports where the redirect landed.
	fn authorize<'a>(
		&'a self,
		request: &'a InteractionRequest,
	) -> DelegateFuture<'a, AuthorizationResponse>;
}

/// Platform broker application.
pub trait PlatformBroker
where
	Self: Send + Sync,
{
	/// Returns `true` when the broker is installed and usable.
	fn is_available(&self) -> bool;

	/// Runs an interactive sign-in through the broker.
	fn authorize<'a>(
		&'a self,
		request: &'a InteractionRequest,
	) -> DelegateFuture<'a, AuthorizationResponse>;

	/// Asks the broker for a token without prompting; `Ok(None)` means it has none.
	fn acquire_token_silently<'a>(
		&'a self,
		parameters: &'a BrokerParameterSet,
	) -> DelegateFuture<'a, Result<Option<BrokerToken>>>;
}
