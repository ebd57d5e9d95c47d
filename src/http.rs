//! Transport primitives for STS calls.
//!
//! The module exposes [`StsHttpClient`] alongside [`ResponseMetadata`] and
//! [`ResponseMetadataSlot`] so downstream crates can integrate custom HTTP clients without
//! losing response instrumentation. Implementations call [`ResponseMetadataSlot::take`] before
//! dispatching a request and [`ResponseMetadataSlot::store`] once an HTTP status or retry hint
//! is known, enabling error mapping with consistent metadata. Every handle is wrapped in a
//! [`CorrelatedHandle`] that stamps the correlation headers on outgoing requests.

// std
use std::ops::Deref;
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{HeaderName, HeaderValue},
};
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, config::CLIENT_VERSION};

const CLIENT_REQUEST_ID: HeaderName = HeaderName::from_static("client-request-id");
const RETURN_CLIENT_REQUEST_ID: HeaderName = HeaderName::from_static("return-client-request-id");
const CLIENT_VERSION_HEADER: HeaderName = HeaderName::from_static("x-client-ver");

/// Abstraction over HTTP transports capable of executing STS calls while publishing response
/// metadata.
///
/// The trait is the crate's only dependency on an HTTP stack. Callers provide an implementation
/// (typically behind `Arc<T>`) and the flows request short-lived [`AsyncHttpClient`] handles
/// that each carry a clone of a [`ResponseMetadataSlot`]. Handles must own whatever state their
/// request futures need so those futures stay `Send` for the lifetime of the call.
pub trait StsHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// # Metadata Contract
	///
	/// - Call [`ResponseMetadataSlot::take`] before submitting the HTTP request so stale
	///   information never leaks across calls.
	/// - Once an HTTP response provides status headers, save them with
	///   [`ResponseMetadataSlot::store`].
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the STS, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Handle wrapper that adds `client-request-id`, `return-client-request-id`, and
/// `x-client-Ver` to every request before delegating to the transport.
pub struct CorrelatedHandle<H> {
	inner: H,
	correlation_id: HeaderValue,
}
impl<H> CorrelatedHandle<H> {
	/// Wraps `inner`, tagging requests with `correlation_id`.
	pub fn new(inner: H, correlation_id: Uuid) -> Self {
		let correlation_id = HeaderValue::from_str(&correlation_id.hyphenated().to_string())
			.unwrap_or_else(|_| HeaderValue::from_static(""));

		Self { inner, correlation_id }
	}
}
impl<'c, H> AsyncHttpClient<'c> for CorrelatedHandle<H>
where
	H: AsyncHttpClient<'c>,
{
	type Error = H::Error;
	type Future = H::Future;

	fn call(&'c self, mut request: HttpRequest) -> Self::Future {
		let headers = request.headers_mut();

		headers.insert(CLIENT_REQUEST_ID, self.correlation_id.clone());
		headers.insert(RETURN_CLIENT_REQUEST_ID, HeaderValue::from_static("true"));
		headers.insert(CLIENT_VERSION_HEADER, HeaderValue::from_static(CLIENT_VERSION));

		self.inner.call(request)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// STS endpoints answer directly, so any custom [`ReqwestClient`] should disable redirect
/// following.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl StsHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		self.instrumented(slot)
	}
}

#[cfg(feature = "reqwest")]
struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`] that records response metadata.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// std
	use std::future::{Ready, ready};
	// self
	use super::*;

	struct EchoHeaders;
	impl<'c> AsyncHttpClient<'c> for EchoHeaders {
		type Error = HttpClientError<std::io::Error>;
		type Future = Ready<Result<HttpResponse, Self::Error>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			let mut response = HttpResponse::new(Vec::new());

			*response.headers_mut() = request.headers().clone();

			ready(Ok(response))
		}
	}

	#[tokio::test]
	async fn correlated_handle_stamps_headers() {
		let id = Uuid::new_v4();
		let handle = CorrelatedHandle::new(EchoHeaders, id);
		let request = oauth2::http::Request::builder()
			.uri("https://login.example.com/common/oauth2/token")
			.body(Vec::new())
			.expect("Request fixture should build.");
		let response = handle.call(request).await.expect("Echo transport should succeed.");
		let headers = response.headers();

		assert_eq!(
			headers.get("client-request-id").and_then(|value| value.to_str().ok()),
			Some(id.to_string().as_str())
		);
		assert_eq!(
			headers.get("return-client-request-id").map(|value| value.as_bytes()),
			Some(&b"true"[..])
		);
		assert_eq!(
			headers.get("x-client-Ver").and_then(|value| value.to_str().ok()),
			Some(CLIENT_VERSION)
		);
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn retry_after_accepts_delta_seconds() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, "12".parse().expect("Header fixture should parse."));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(12)));
	}
}
