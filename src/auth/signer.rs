//! RS256 JWT assertions for the OAuth 2.0 JWT-bearer grant.

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{_prelude::*, auth::ServiceAccountCredential, error::CredentialError};

/// Lifetime embedded in every assertion (`exp - iat`).
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Signed JWT assertion; owned by the exchange that consumes it.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedAssertion(String);
impl SignedAssertion {
	/// Compact `header.payload.signature` form.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for SignedAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("SignedAssertion(..)")
	}
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	scope: &'a str,
	aud: &'a str,
	iat: i64,
	exp: i64,
}

/// Builds and signs service-account assertions for a fixed scope and audience.
#[derive(Clone, Debug)]
pub struct CryptoSigner {
	scope: String,
	audience: String,
}
impl CryptoSigner {
	/// Creates a signer that requests `scope` from the token endpoint at `audience`.
	pub fn new(scope: impl Into<String>, audience: impl Into<String>) -> Self {
		Self { scope: scope.into(), audience: audience.into() }
	}

	/// Signs an assertion issued at the current wall-clock time.
	pub fn sign(&self, credential: &ServiceAccountCredential) -> Result<SignedAssertion> {
		self.sign_at(credential, OffsetDateTime::now_utc())
	}

	/// Signs an assertion issued at `now`.
	///
	/// The header carries `alg=RS256`, `typ=JWT`, and the credential's key id; segments are
	/// URL-safe base64 without padding and the signature is RSASSA-PKCS1-v1_5 over SHA-256.
	pub fn sign_at(
		&self,
		credential: &ServiceAccountCredential,
		now: OffsetDateTime,
	) -> Result<SignedAssertion> {
		let key = EncodingKey::from_rsa_pem(credential.private_key.expose().as_bytes())
			.map_err(CredentialError::invalid_private_key)?;
		let mut header = Header::new(Algorithm::RS256);

		header.kid = Some(credential.private_key_id.clone());

		let iat = now.unix_timestamp();
		let claims = AssertionClaims {
			iss: &credential.client_email,
			scope: &self.scope,
			aud: &self.audience,
			iat,
			exp: iat + ASSERTION_LIFETIME_SECS,
		};
		let token =
			jsonwebtoken::encode(&header, &claims, &key).map_err(CredentialError::signing)?;

		Ok(SignedAssertion(token))
	}
}
