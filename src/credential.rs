//! Client credentials and the form fields they contribute to token requests.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenSecret};

/// `client_assertion_type` sent with certificate and assertion credentials.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const ASSERTION_LIFETIME: Duration = Duration::minutes(10);
const SUPPORTED_ALGORITHMS: &[&str] =
	&["RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512"];

/// Errors raised while building or applying a client credential.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CredentialError {
	/// Client secret was empty.
	#[error("Client secret cannot be empty.")]
	EmptySecret,
	/// Certificate DER bytes were empty.
	#[error("Certificate cannot be empty.")]
	EmptyCertificate,
	/// Signer reported a JWS algorithm the STS does not accept for client assertions.
	#[error("Signing algorithm `{algorithm}` is not supported for client assertions.")]
	UnsupportedAlgorithm {
		/// Algorithm reported by the signer.
		algorithm: String,
	},
	/// Assertion was empty or not a compact JWT.
	#[error("Client assertion must be a compact JWT with three segments.")]
	MalformedAssertion,
	/// Assertion header or claims could not be encoded.
	#[error("Client assertion could not be encoded: {message}.")]
	Encoding {
		/// Encoder failure summary.
		message: String,
	},
	/// The external signer failed.
	#[error("Client assertion signing failed: {message}.")]
	Signing {
		/// Signer failure summary.
		message: String,
	},
}

/// External signing key used by certificate credentials.
///
/// The private key never enters this crate; implementations wrap an HSM, a platform key store,
/// or a software key.
pub trait AssertionSigner
where
	Self: Send + Sync,
{
	/// JWS algorithm name written into the assertion header (for example `RS256`).
	fn algorithm(&self) -> &str;

	/// Signs the JWS signing input and returns the raw signature bytes.
	fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>, CredentialError>;
}

/// Certificate-backed credential: DER certificate plus an external signer.
#[derive(Clone)]
pub struct CertificateCredential {
	der: Arc<[u8]>,
	thumbprint: String,
	signer: Arc<dyn AssertionSigner>,
}
impl CertificateCredential {
	/// Base64url SHA-256 thumbprint of the DER certificate (`x5t#S256`).
	pub fn thumbprint(&self) -> &str {
		&self.thumbprint
	}

	/// DER certificate bytes.
	pub fn der(&self) -> &[u8] {
		&self.der
	}

	/// Builds and signs a client assertion for `audience`.
	pub fn build_assertion(
		&self,
		client_id: &str,
		audience: &str,
		now: OffsetDateTime,
	) -> Result<String, CredentialError> {
		let header = AssertionHeader {
			alg: self.signer.algorithm(),
			typ: "JWT",
			x5t_s256: &self.thumbprint,
		};
		let jti = Uuid::new_v4().to_string();
		let claims = AssertionClaims {
			aud: audience,
			iss: client_id,
			sub: client_id,
			jti: &jti,
			nbf: now.unix_timestamp(),
			exp: (now + ASSERTION_LIFETIME).unix_timestamp(),
		};
		let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
		let signature = self.signer.sign(signing_input.as_bytes())?;

		Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
	}
}
impl Debug for CertificateCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CertificateCredential")
			.field("thumbprint", &self.thumbprint)
			.field("algorithm", &self.signer.algorithm())
			.finish()
	}
}

/// Credential a confidential client presents to the token endpoint.
#[derive(Clone, Debug)]
pub enum ClientCredential {
	/// Shared secret sent as `client_secret`.
	Secret(TokenSecret),
	/// Certificate used to sign a fresh client assertion per request.
	Certificate(CertificateCredential),
	/// Pre-built client assertion sent verbatim.
	Assertion(TokenSecret),
}
impl ClientCredential {
	/// Builds a shared-secret credential.
	pub fn secret(value: impl Into<String>) -> Result<Self, CredentialError> {
		let value = value.into();

		if value.is_empty() {
			return Err(CredentialError::EmptySecret);
		}

		Ok(Self::Secret(TokenSecret::new(value)))
	}

	/// Builds a certificate credential and computes its thumbprint.
	pub fn certificate(
		der: impl Into<Vec<u8>>,
		signer: Arc<dyn AssertionSigner>,
	) -> Result<Self, CredentialError> {
		let der = der.into();

		if der.is_empty() {
			return Err(CredentialError::EmptyCertificate);
		}

		let algorithm = signer.algorithm();

		if !SUPPORTED_ALGORITHMS.contains(&algorithm) {
			return Err(CredentialError::UnsupportedAlgorithm { algorithm: algorithm.to_owned() });
		}

		let thumbprint = URL_SAFE_NO_PAD.encode(Sha256::digest(&der));

		Ok(Self::Certificate(CertificateCredential { der: der.into(), thumbprint, signer }))
	}

	/// Builds a credential from a pre-signed assertion.
	pub fn assertion(value: impl Into<String>) -> Result<Self, CredentialError> {
		let value = value.into();
		let segments = value.split('.').collect::<Vec<_>>();

		if segments.len() != 3 || segments[..2].iter().any(|segment| segment.is_empty()) {
			return Err(CredentialError::MalformedAssertion);
		}

		Ok(Self::Assertion(TokenSecret::new(value)))
	}

	/// Stable label for logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Secret(_) => "secret",
			Self::Certificate(_) => "certificate",
			Self::Assertion(_) => "assertion",
		}
	}

	/// Form fields authenticating `client_id` against `token_endpoint`.
	pub fn form_fields(
		&self,
		client_id: &str,
		token_endpoint: &str,
		now: OffsetDateTime,
	) -> Result<Vec<(String, String)>, CredentialError> {
		let fields = match self {
			Self::Secret(secret) => vec![("client_secret".into(), secret.expose().to_owned())],
			Self::Certificate(certificate) => assertion_fields(certificate.build_assertion(
				client_id,
				token_endpoint,
				now,
			)?),
			Self::Assertion(assertion) => assertion_fields(assertion.expose().to_owned()),
		};

		Ok(fields)
	}
}

#[derive(Serialize)]
struct AssertionHeader<'a> {
	alg: &'a str,
	typ: &'a str,
	#[serde(rename = "x5t#S256")]
	x5t_s256: &'a str,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
	aud: &'a str,
	iss: &'a str,
	sub: &'a str,
	jti: &'a str,
	nbf: i64,
	exp: i64,
}

fn assertion_fields(assertion: String) -> Vec<(String, String)> {
	vec![
		("client_assertion_type".into(), CLIENT_ASSERTION_TYPE.into()),
		("client_assertion".into(), assertion),
	]
}

fn encode_segment<T>(value: &T) -> Result<String, CredentialError>
where
	T: Serialize,
{
	let bytes = serde_json::to_vec(value)
		.map_err(|e| CredentialError::Encoding { message: e.to_string() })?;

	Ok(URL_SAFE_NO_PAD.encode(bytes))
}
