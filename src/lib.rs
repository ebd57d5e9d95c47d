//! Directory STS token acquisition for native and confidential clients: silent and interactive
//! state machines, an MRRT-aware token cache, and authority discovery in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authority;
pub mod cache;
pub mod config;
pub mod context;
pub mod credential;
pub mod delegate;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod strategy;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and a scripted STS transport for tests; enabled via `cfg(test)` or
	//! the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	use oauth2::{
		AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
		http::{Response, header::CONTENT_TYPE},
	};
	// self
	use crate::{
		auth::ClientId,
		authority::InstanceDiscoveryCache,
		config::ClientConfig,
		error::{ConfigError, TransientError, TransportError},
		flows::TokenClient,
		http::{ResponseMetadata, ResponseMetadataSlot, StsHttpClient},
		oauth::{StsOperation, TransportErrorMapper},
	};
	#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

	/// Token client backed by [`ScriptedHttpClient`].
	pub type ScriptedTokenClient = TokenClient<ScriptedHttpClient, ScriptedTransportErrorMapper>;

	/// Transport failure injected by [`ScriptedReply::NetworkFailure`].
	#[derive(Debug, ThisError)]
	#[error("{0}")]
	pub struct ScriptedTransportError(pub String);

	/// One scripted answer.
	#[derive(Clone, Debug)]
	pub enum ScriptedReply {
		/// JSON response with the given status.
		Json {
			/// HTTP status.
			status: u16,
			/// JSON body.
			body: serde_json::Value,
		},
		/// Connection-level failure.
		NetworkFailure,
		/// Never answers; only cancellation ends the call.
		Hang,
	}

	/// Request captured by [`ScriptedHttpClient`].
	#[derive(Clone, Debug)]
	pub struct RecordedRequest {
		/// HTTP method.
		pub method: String,
		/// Full request URL.
		pub url: Url,
		/// Request headers, lowercased names.
		pub headers: HashMap<String, String>,
		/// Decoded `application/x-www-form-urlencoded` body.
		pub form: HashMap<String, String>,
	}

	#[derive(Debug, Default)]
	struct Script {
		routes: Vec<(String, VecDeque<ScriptedReply>)>,
		requests: Vec<RecordedRequest>,
	}
	impl Script {
		fn next_reply(&mut self, path: &str) -> ScriptedReply {
			let Some((_, replies)) =
				self.routes.iter_mut().find(|(route, _)| path.ends_with(route.as_str()))
			else {
				return ScriptedReply::Json {
					status: 404,
					body: serde_json::json!({ "error": "unscripted_request" }),
				};
			};

			match replies.len() {
				0 => ScriptedReply::NetworkFailure,
				1 => replies[0].clone(),
				_ => replies.pop_front().unwrap_or(ScriptedReply::NetworkFailure),
			}
		}
	}

	/// In-process STS double: replies are matched by URL path suffix and consumed in order, the
	/// last reply of a route repeating forever.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedHttpClient {
		script: Arc<Mutex<Script>>,
		delay: Option<std::time::Duration>,
	}
	impl ScriptedHttpClient {
		/// Creates an empty script.
		pub fn new() -> Self {
			Self::default()
		}

		/// Delays every reply, giving concurrent callers a chance to overlap.
		pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Queues `reply` for requests whose path ends with `path`.
		pub fn push(&self, path: &str, reply: ScriptedReply) -> &Self {
			let mut script = self.script.lock();

			match script.routes.iter_mut().find(|(route, _)| route == path) {
				Some((_, replies)) => replies.push_back(reply),
				None => script.routes.push((path.to_owned(), VecDeque::from([reply]))),
			}

			self
		}

		/// Queues a JSON reply.
		pub fn push_json(&self, path: &str, status: u16, body: serde_json::Value) -> &Self {
			self.push(path, ScriptedReply::Json { status, body })
		}

		/// Every request seen so far.
		pub fn requests(&self) -> Vec<RecordedRequest> {
			self.script.lock().requests.clone()
		}

		/// Number of requests whose path ends with `path`.
		pub fn calls(&self, path: &str) -> usize {
			self.script.lock().requests.iter().filter(|req| req.url.path().ends_with(path)).count()
		}
	}
	impl StsHttpClient for ScriptedHttpClient {
		type Handle = ScriptedHandle;
		type TransportError = ScriptedTransportError;

		fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
			ScriptedHandle { client: self.clone(), slot }
		}
	}

	/// Handle produced by [`ScriptedHttpClient`].
	#[derive(Debug)]
	pub struct ScriptedHandle {
		client: ScriptedHttpClient,
		slot: ResponseMetadataSlot,
	}
	impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
		type Error = HttpClientError<ScriptedTransportError>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			self.slot.take();

			let url = Url::parse(&request.uri().to_string())
				.or_else(|_| Url::parse("https://invalid.test/"))
				.expect("Scripted request URL should parse.");
			let reply = {
				let mut script = self.client.script.lock();
				let reply = script.next_reply(url.path());

				script.requests.push(RecordedRequest {
					method: request.method().to_string(),
					headers: request
						.headers()
						.iter()
						.map(|(name, value)| {
							let value = value.to_str().unwrap_or_default();

							(name.as_str().to_owned(), value.to_owned())
						})
						.collect(),
					form: url::form_urlencoded::parse(request.body()).into_owned().collect(),
					url,
				});

				reply
			};
			let delay = self.client.delay;
			let slot = self.slot.clone();

			Box::pin(async move {
				if let Some(delay) = delay {
					tokio::time::sleep(delay).await;
				}

				match reply {
					ScriptedReply::Json { status, body } => {
						slot.store(ResponseMetadata { status: Some(status), retry_after: None });

						Response::builder()
							.status(status)
							.header(CONTENT_TYPE, "application/json")
							.body(body.to_string().into_bytes())
							.map_err(HttpClientError::Http)
					},
					ScriptedReply::NetworkFailure => Err(HttpClientError::Reqwest(Box::new(
						ScriptedTransportError("connection refused".into()),
					))),
					ScriptedReply::Hang => std::future::pending().await,
				}
			})
		}
	}

	/// Maps [`ScriptedTransportError`] the way the reqwest mapper maps connection failures.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedTransportErrorMapper;
	impl TransportErrorMapper<ScriptedTransportError> for ScriptedTransportErrorMapper {
		fn map_transport_error(
			&self,
			operation: StsOperation,
			metadata: Option<&ResponseMetadata>,
			error: HttpClientError<ScriptedTransportError>,
		) -> Error {
			match error {
				HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
				HttpClientError::Http(inner) => ConfigError::from(inner).into(),
				HttpClientError::Io(inner) => TransportError::Io(inner).into(),
				other => TransientError::TokenEndpoint {
					message: format!("{} failed: {other}", operation.endpoint()),
					status: metadata.and_then(|meta| meta.status),
					retry_after: None,
				}
				.into(),
			}
		}
	}

	/// Authority used by scripted fixtures.
	pub const TEST_AUTHORITY: &str = "https://login.microsoftonline.com/contoso";
	/// Client id used by scripted fixtures.
	pub const TEST_CLIENT_ID: &str = "app-1";
	/// Resource used by scripted fixtures.
	pub const TEST_RESOURCE: &str = "https://graph.example.com";
	/// Token endpoint path of [`TEST_AUTHORITY`].
	pub const TOKEN_PATH: &str = "/contoso/oauth2/token";
	/// Instance discovery path.
	pub const DISCOVERY_PATH: &str = "/common/discovery/instance";

	/// Configuration with authority validation disabled, pointing at [`TEST_AUTHORITY`].
	pub fn test_config() -> ClientConfig {
		ClientConfig::new(
			ClientId::new(TEST_CLIENT_ID).expect("Client fixture should be valid."),
			Url::parse("https://localhost/callback").expect("Redirect fixture should parse."),
		)
		.with_authority(TEST_AUTHORITY)
		.with_validate_authority(false)
	}

	/// Builds a client over a fresh script with a private discovery cache.
	pub fn scripted_client(config: ClientConfig) -> (ScriptedTokenClient, ScriptedHttpClient) {
		scripted_client_with(config, ScriptedHttpClient::new())
	}

	/// Builds a client over `transport` with a private discovery cache.
	pub fn scripted_client_with(
		config: ClientConfig,
		transport: ScriptedHttpClient,
	) -> (ScriptedTokenClient, ScriptedHttpClient) {
		let client = ScriptedTokenClient::with_http_client(
			config,
			transport.clone(),
			ScriptedTransportErrorMapper,
		)
		.with_discovery_cache(Arc::new(InstanceDiscoveryCache::default()));

		(client, transport)
	}

	/// Unsigned `id_token` carrying `oid`, `upn`, and `tid`.
	pub fn id_token(oid: &str, upn: &str, tid: &str) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD
			.encode(serde_json::json!({ "oid": oid, "upn": upn, "tid": tid }).to_string());

		format!("{header}.{payload}.sig")
	}

	/// Successful token response body, with lifetimes as strings the way the STS sends them.
	pub fn token_body(
		access_token: &str,
		refresh_token: Option<&str>,
		id_token: Option<&str>,
	) -> serde_json::Value {
		let mut body = serde_json::json!({
			"token_type": "Bearer",
			"access_token": access_token,
			"expires_in": "3600",
			"ext_expires_in": "7200",
		});

		if let Some(refresh_token) = refresh_token {
			body["refresh_token"] = refresh_token.into();
		}
		if let Some(id_token) = id_token {
			body["id_token"] = id_token.into();
		}

		body
	}

	/// OAuth error response body.
	pub fn error_body(error: &str, description: &str) -> serde_json::Value {
		serde_json::json!({ "error": error, "error_description": description })
	}

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;
	pub use uuid::Uuid;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
