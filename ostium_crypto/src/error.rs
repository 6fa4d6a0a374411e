//! Errors raised while loading certificates or producing signatures

use std::error::Error as StdError;

use thiserror::Error;

/// An error occurring while working with a client assertion certificate
#[derive(Debug, Error)]
pub enum SigningError {
    /// The certificate bundle could not be decoded with the given password
    #[error("certificate bundle could not be loaded")]
    InvalidCertificate(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The certificate bundle does not carry a private key
    #[error("certificate bundle does not contain a private key")]
    MissingPrivateKey,

    /// The certificate bundle does not carry a certificate
    #[error("certificate bundle does not contain a certificate")]
    MissingCertificate,

    /// The certificate's key is smaller than the configured minimum
    #[error("certificate key size of {actual} bits is below the required minimum of {minimum} bits")]
    KeyTooSmall {
        /// The size of the certificate's key in bits
        actual: u32,
        /// The minimum acceptable key size in bits
        minimum: u32,
    },

    /// Neither the default key container nor any fallback can produce SHA-256 signatures
    #[error("no signing provider supports SHA-256 signatures with this key")]
    NoCapableProvider,

    /// An unexpected error (possibly a bug)
    #[error("unexpected signing failure")]
    Unexpected(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl SigningError {
    /// Whether the error is due to the certificate's key being too small
    #[must_use]
    pub fn is_key_too_small(&self) -> bool {
        matches!(self, Self::KeyTooSmall { .. })
    }
}

pub(crate) fn invalid_certificate(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> SigningError {
    SigningError::InvalidCertificate(source.into())
}

pub(crate) fn unexpected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> SigningError {
    SigningError::Unexpected(source.into())
}
