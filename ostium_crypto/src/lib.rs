//! Certificate-backed signing for confidential client assertions
//!
//! A confidential client may authenticate to a token endpoint with a signed
//! JWT instead of a shared secret. This crate provides the pieces needed to
//! produce such an assertion from a PKCS#12 certificate bundle:
//!
//! * [`hash()`]: SHA-256 digests encoded as standard base64
//! * [`CryptoSigner`]: RSA/SHA-256 signatures and certificate thumbprints,
//!   refusing keys below a configurable minimum size
//! * [`ClientAssertion`]: an RS256 JWT identifying the client, keyed by the
//!   certificate's thumbprint
//!
//! ```no_run
//! use ostium_clock::{Clock, System};
//! use ostium_crypto::{ClientAssertion, ClientAssertionCertificate, CryptoSigner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = std::fs::read("client.pfx")?;
//! let certificate = ClientAssertionCertificate::new(bundle, "password");
//!
//! let assertion = ClientAssertion::from_certificate(
//!     &CryptoSigner::new(),
//!     &certificate,
//!     "my-client-id",
//!     "https://login.example.com/contoso/oauth2/token",
//!     System.now(),
//! )?;
//! # let _ = assertion;
//! # Ok(())
//! # }
//! ```
//!
//! Private keys are loaded into a key container for the span of a single
//! signing call. If the default container cannot produce SHA-256 signatures
//! with a key, a second provider is tried before giving up.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod assertion;
mod certificate;
pub mod error;
mod signer;

#[cfg(test)]
pub(crate) mod test;

#[doc(inline)]
pub use assertion::ClientAssertion;
pub use certificate::ClientAssertionCertificate;
#[doc(inline)]
pub use error::SigningError;
pub use signer::{hash, CertificateSigner, CryptoSigner};
