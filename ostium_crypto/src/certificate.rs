use std::fmt;

use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::X509,
};

use crate::error::{self, SigningError};

/// A certificate credential used to sign client assertions
///
/// Wraps a PKCS#12 bundle holding the certificate and its private key
/// together with the password that protects it. The bundle is decoded
/// on each use; nothing derived from it outlives a single operation.
#[derive(Clone)]
#[must_use]
pub struct ClientAssertionCertificate {
    raw: Vec<u8>,
    password: String,
}

impl ClientAssertionCertificate {
    /// The smallest key size accepted for signing client assertions
    pub const MIN_KEY_SIZE_IN_BITS: u32 = 2048;

    /// Constructs a credential from a DER-encoded PKCS#12 bundle and its password
    pub fn new(raw: impl Into<Vec<u8>>, password: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            password: password.into(),
        }
    }

    /// The raw PKCS#12 bundle
    #[must_use]
    pub fn raw_data(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn open(&self) -> Result<OpenedCertificate, SigningError> {
        let bundle = Pkcs12::from_der(&self.raw).map_err(error::invalid_certificate)?;
        let parsed = bundle
            .parse2(&self.password)
            .map_err(error::invalid_certificate)?;

        let key = parsed.pkey.ok_or(SigningError::MissingPrivateKey)?;
        let certificate = parsed.cert.ok_or(SigningError::MissingCertificate)?;

        Ok(OpenedCertificate { key, certificate })
    }
}

impl fmt::Debug for ClientAssertionCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientAssertionCertificate")
            .field("raw", &format_args!("<{} bytes>", self.raw.len()))
            .field("password", &"<redacted>")
            .finish()
    }
}

pub(crate) struct OpenedCertificate {
    pub(crate) key: PKey<Private>,
    pub(crate) certificate: X509,
}

impl OpenedCertificate {
    pub(crate) fn key_size(&self) -> u32 {
        self.key.bits()
    }

    pub(crate) fn ensure_key_size(&self, minimum: u32) -> Result<(), SigningError> {
        let actual = self.key_size();
        if actual < minimum {
            tracing::debug!(actual, minimum, "rejecting certificate with undersized key");
            return Err(SigningError::KeyTooSmall { actual, minimum });
        }

        Ok(())
    }
}
