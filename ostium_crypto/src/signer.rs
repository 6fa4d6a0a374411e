use std::fmt;

use base64::Engine as _;
use openssl::{
    hash::MessageDigest,
    pkey::{Id, PKey, Private},
};
use ring::{rand::SystemRandom, signature::RsaKeyPair};

use crate::{
    certificate::ClientAssertionCertificate,
    error::{self, SigningError},
};

/// Computes the SHA-256 digest of `input`, encoded as standard padded base64
///
/// The input is hashed exactly as given; string input should be passed as its
/// UTF-8 bytes. The output must stay bit-for-bit compatible with other
/// implementations that hash the same content.
#[must_use]
pub fn hash(input: impl AsRef<[u8]>) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_ref());
    base64::engine::general_purpose::STANDARD.encode(digest.as_ref())
}

/// Signs messages with the key held by a client assertion certificate
pub trait CertificateSigner: fmt::Debug + Send + Sync {
    /// Checks that the certificate's key meets the minimum size requirement
    ///
    /// # Errors
    ///
    /// The certificate cannot be opened or its key is too small.
    fn ensure_key_size(&self, certificate: &ClientAssertionCertificate)
        -> Result<(), SigningError>;

    /// Signs `message` using RSA with SHA-256
    ///
    /// # Errors
    ///
    /// The certificate cannot be opened, its key is too small, or no provider
    /// is able to produce a SHA-256 signature with its key.
    fn sign(
        &self,
        message: &[u8],
        certificate: &ClientAssertionCertificate,
    ) -> Result<Vec<u8>, SigningError>;

    /// The URL-safe base64 encoded thumbprint of the certificate
    ///
    /// # Errors
    ///
    /// The certificate cannot be opened.
    fn thumbprint(&self, certificate: &ClientAssertionCertificate) -> Result<String, SigningError>;
}

/// The default certificate signer
///
/// Keys are acquired for the duration of a single call and released before
/// the call returns, on success and failure alike.
#[derive(Clone, Copy, Debug)]
pub struct CryptoSigner {
    minimum_key_size: u32,
}

impl Default for CryptoSigner {
    /// Requires keys of at least
    /// [`MIN_KEY_SIZE_IN_BITS`][ClientAssertionCertificate::MIN_KEY_SIZE_IN_BITS]
    fn default() -> Self {
        Self {
            minimum_key_size: ClientAssertionCertificate::MIN_KEY_SIZE_IN_BITS,
        }
    }
}

impl CryptoSigner {
    /// Constructs a signer with the default minimum key size
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the minimum acceptable key size in bits
    pub fn with_minimum_key_size(mut self, bits: u32) -> Self {
        self.minimum_key_size = bits;
        self
    }

    /// The minimum acceptable key size in bits
    #[must_use]
    pub fn minimum_key_size(&self) -> u32 {
        self.minimum_key_size
    }
}

impl CertificateSigner for CryptoSigner {
    fn ensure_key_size(
        &self,
        certificate: &ClientAssertionCertificate,
    ) -> Result<(), SigningError> {
        certificate.open()?.ensure_key_size(self.minimum_key_size)
    }

    #[tracing::instrument(level = "trace", skip_all, fields(message.len = message.len()))]
    fn sign(
        &self,
        message: &[u8],
        certificate: &ClientAssertionCertificate,
    ) -> Result<Vec<u8>, SigningError> {
        let opened = certificate.open()?;
        opened.ensure_key_size(self.minimum_key_size)?;

        let container = KeyContainer::acquire(&opened.key)?;
        container.sign(message)
    }

    fn thumbprint(&self, certificate: &ClientAssertionCertificate) -> Result<String, SigningError> {
        let opened = certificate.open()?;
        let digest = opened
            .certificate
            .digest(MessageDigest::sha1())
            .map_err(error::unexpected)?;

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&*digest))
    }
}

/// The provider backing an acquired key container
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Provider {
    Ring,
    OpenSsl,
}

enum ContainerKey {
    Ring(RsaKeyPair),
    OpenSsl(PKey<Private>),
}

/// A private key loaded into a provider capable of SHA-256 signatures
pub(crate) struct KeyContainer {
    provider: Provider,
    key: ContainerKey,
}

impl KeyContainer {
    pub(crate) fn acquire(key: &PKey<Private>) -> Result<Self, SigningError> {
        if key.id() != Id::RSA {
            tracing::debug!(key.id = ?key.id(), "key type cannot produce RS256 signatures");
            return Err(SigningError::NoCapableProvider);
        }

        let der = key
            .rsa()
            .and_then(|rsa| rsa.private_key_to_der())
            .map_err(error::unexpected)?;

        let container = match RsaKeyPair::from_der(&der) {
            Ok(pair) => Self {
                provider: Provider::Ring,
                key: ContainerKey::Ring(pair),
            },
            Err(rejected) => {
                tracing::debug!(
                    reason = %rejected,
                    "default key container cannot sign with SHA-256, switching providers"
                );
                Self {
                    provider: Provider::OpenSsl,
                    key: ContainerKey::OpenSsl(key.clone()),
                }
            }
        };

        tracing::trace!(provider = ?container.provider, "acquired key container");
        Ok(container)
    }

    #[cfg(test)]
    pub(crate) fn provider(&self) -> Provider {
        self.provider
    }

    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        match &self.key {
            ContainerKey::Ring(pair) => {
                let mut buf = vec![0; pair.public().modulus_len()];
                pair.sign(
                    &ring::signature::RSA_PKCS1_SHA256,
                    &SystemRandom::new(),
                    data,
                    &mut buf,
                )
                .map_err(|e| error::unexpected(e.to_string()))?;
                Ok(buf)
            }
            ContainerKey::OpenSsl(key) => {
                let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), key)
                    .map_err(|_| SigningError::NoCapableProvider)?;
                signer.update(data).map_err(error::unexpected)?;
                signer.sign_to_vec().map_err(error::unexpected)
            }
        }
    }
}

impl Drop for KeyContainer {
    fn drop(&mut self) {
        tracing::trace!(provider = ?self.provider, "released key container");
    }
}

impl fmt::Debug for KeyContainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyContainer")
            .field("provider", &self.provider)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use openssl::{bn::BigNum, rsa::Rsa, sign::Verifier};

    use super::*;
    use crate::test;

    #[test]
    fn hash_is_base64_sha256_of_utf8_bytes() {
        assert_eq!(hash("abc"), "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
        assert_eq!(hash(""), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn signature_verifies_with_certificate_public_key() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let cert = test::pkcs12_certificate(&key, "secret")?;

        let signature = CryptoSigner::new().sign(b"header.payload", &cert)?;

        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
        verifier.update(b"header.payload")?;
        assert!(verifier.verify(&signature)?);

        Ok(())
    }

    #[test]
    fn undersized_key_is_rejected_before_signing() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(1024)?)?;
        let cert = test::pkcs12_certificate(&key, "secret")?;

        let error = CryptoSigner::new()
            .sign(b"payload", &cert)
            .expect_err("1024-bit keys must be rejected");

        assert!(matches!(
            error,
            SigningError::KeyTooSmall {
                actual: 1024,
                minimum: 2048
            }
        ));

        Ok(())
    }

    #[test]
    fn minimum_key_size_is_configurable() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let cert = test::pkcs12_certificate(&key, "secret")?;

        let error = CryptoSigner::new()
            .with_minimum_key_size(3072)
            .ensure_key_size(&cert)
            .expect_err("2048-bit key is below a 3072-bit minimum");

        assert!(error.is_key_too_small());
        Ok(())
    }

    #[test]
    fn wrong_password_is_an_invalid_certificate() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let cert = test::pkcs12_certificate(&key, "secret")?;
        let wrong = ClientAssertionCertificate::new(cert.raw_data(), "not the password");

        let error = CryptoSigner::new()
            .sign(b"payload", &wrong)
            .expect_err("bundle must not open");

        assert!(matches!(error, SigningError::InvalidCertificate(_)));
        Ok(())
    }

    #[test]
    fn thumbprint_is_url_safe_sha1_of_certificate() -> Result<()> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let cert = test::pkcs12_certificate(&key, "secret")?;

        let opened = cert.open()?;
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(openssl::sha::sha1(&opened.certificate.to_der()?));

        let thumbprint = CryptoSigner::new().thumbprint(&cert)?;
        assert_eq!(thumbprint, expected);
        assert!(!thumbprint.contains(['+', '/', '=']));

        Ok(())
    }

    mod key_container {
        use super::*;

        #[test]
        fn uses_ring_for_standard_keys() -> Result<()> {
            let key = PKey::from_rsa(Rsa::generate(2048)?)?;
            let container = KeyContainer::acquire(&key)?;
            assert_eq!(container.provider(), Provider::Ring);
            Ok(())
        }

        #[test]
        fn switches_to_openssl_when_ring_rejects_the_key() -> Result<()> {
            let exponent = BigNum::from_u32(3)?;
            let key = PKey::from_rsa(Rsa::generate_with_e(2048, &exponent)?)?;

            let container = KeyContainer::acquire(&key)?;
            assert_eq!(container.provider(), Provider::OpenSsl);

            let signature = container.sign(b"data")?;
            let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
            verifier.update(b"data")?;
            assert!(verifier.verify(&signature)?);

            Ok(())
        }

        #[test]
        fn non_rsa_keys_have_no_capable_provider() -> Result<()> {
            use openssl::{ec::EcGroup, ec::EcKey, nid::Nid};

            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
            let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

            let error = KeyContainer::acquire(&key).expect_err("EC keys cannot sign RS256");
            assert!(matches!(error, SigningError::NoCapableProvider));
            Ok(())
        }
    }
}
