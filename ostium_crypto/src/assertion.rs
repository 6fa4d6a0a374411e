//! Signed JWT client assertions

use std::fmt;

use base64::Engine as _;
use ostium_clock::{DurationSecs, UnixTime};
use serde::Serialize;

use crate::{
    certificate::ClientAssertionCertificate,
    error::{self, SigningError},
    signer::CertificateSigner,
};

/// The assertion type sent alongside JWT bearer client assertions
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How long a freshly minted assertion remains acceptable to the authority
pub const ASSERTION_LIFETIME: DurationSecs = DurationSecs(600);

#[derive(Serialize)]
struct AssertionHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    x5t: &'a str,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: UnixTime,
    exp: UnixTime,
}

/// A client assertion ready to be presented to a token endpoint
#[derive(Clone)]
#[must_use]
pub struct ClientAssertion {
    assertion: String,
    assertion_type: String,
}

impl ClientAssertion {
    /// Wraps an assertion that was produced elsewhere
    pub fn new(assertion: impl Into<String>, assertion_type: impl Into<String>) -> Self {
        Self {
            assertion: assertion.into(),
            assertion_type: assertion_type.into(),
        }
    }

    /// Mints an RS256 JWT assertion for `client_id`, addressed to `audience`
    ///
    /// The key size is checked before any other work is done with the
    /// certificate.
    ///
    /// # Errors
    ///
    /// The certificate is unusable or signing fails.
    #[tracing::instrument(level = "debug", skip(signer, certificate))]
    pub fn from_certificate<S>(
        signer: &S,
        certificate: &ClientAssertionCertificate,
        client_id: &str,
        audience: &str,
        now: UnixTime,
    ) -> Result<Self, SigningError>
    where
        S: CertificateSigner + ?Sized,
    {
        signer.ensure_key_size(certificate)?;

        let thumbprint = signer.thumbprint(certificate)?;

        let header = AssertionHeader {
            alg: "RS256",
            typ: "JWT",
            x5t: &thumbprint,
        };
        let claims = AssertionClaims {
            aud: audience,
            iss: client_id,
            sub: client_id,
            jti: uuid::Uuid::new_v4().to_string(),
            nbf: now,
            exp: now + ASSERTION_LIFETIME,
        };

        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mut message = engine.encode(serde_json::to_vec(&header).map_err(error::unexpected)?);
        message.push('.');
        engine.encode_string(
            serde_json::to_vec(&claims).map_err(error::unexpected)?,
            &mut message,
        );

        let signature = signer.sign(message.as_bytes(), certificate)?;

        message.push('.');
        engine.encode_string(signature, &mut message);

        Ok(Self {
            assertion: message,
            assertion_type: JWT_BEARER_ASSERTION_TYPE.to_owned(),
        })
    }

    /// The encoded assertion
    #[must_use]
    pub fn assertion(&self) -> &str {
        &self.assertion
    }

    /// The type of the assertion
    #[must_use]
    pub fn assertion_type(&self) -> &str {
        &self.assertion_type
    }
}

impl fmt::Debug for ClientAssertion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientAssertion")
            .field("assertion", &"***CLIENT ASSERTION***")
            .field("assertion_type", &self.assertion_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use openssl::{hash::MessageDigest, pkey::PKey, rsa::Rsa, sign::Verifier};

    use super::*;
    use crate::{test, CryptoSigner};

    fn decode_segment(segment: &str) -> Result<serde_json::Value> {
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(segment)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    #[test]
    fn assertion_is_a_verifiable_rs256_jwt() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let cert = test::pkcs12_certificate(&key, "pw")?;
        let signer = CryptoSigner::new();

        let assertion = ClientAssertion::from_certificate(
            &signer,
            &cert,
            "client-1",
            "https://login.example.com/tenant/oauth2/token",
            UnixTime(1_000),
        )?;
        assert_eq!(assertion.assertion_type(), JWT_BEARER_ASSERTION_TYPE);

        let parts: Vec<_> = assertion.assertion().split('.').collect();
        assert_eq!(parts.len(), 3);

        let header = decode_segment(parts[0])?;
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["x5t"], signer.thumbprint(&cert)?.as_str());

        let claims = decode_segment(parts[1])?;
        assert_eq!(claims["aud"], "https://login.example.com/tenant/oauth2/token");
        assert_eq!(claims["iss"], "client-1");
        assert_eq!(claims["sub"], "client-1");
        assert_eq!(claims["nbf"], 1_000);
        assert_eq!(claims["exp"], 1_600);

        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(parts[2])?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
        verifier.update(format!("{}.{}", parts[0], parts[1]).as_bytes())?;
        assert!(verifier.verify(&signature)?);

        Ok(())
    }

    #[test]
    fn debug_output_hides_assertion() {
        let assertion = ClientAssertion::new("secret.jwt.value", JWT_BEARER_ASSERTION_TYPE);
        let rendered = format!("{:?}", assertion);
        assert!(!rendered.contains("secret.jwt.value"));
    }
}
