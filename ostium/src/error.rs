//! Errors surfaced by authentication operations
//!
//! Every failure reaching a caller is an [`Error`], which sorts the cause into
//! one of a handful of categories. Each category is its own type so that code
//! handling one kind of failure can match on it directly.

use std::error::Error as StdError;

use ostium_crypto::SigningError;
use thiserror::Error;

pub use crate::http::TransportError;

/// An error raised by an authentication operation
#[derive(Debug, Error)]
pub enum Error {
    /// A caller supplied an argument that is missing or malformed
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// The authority rejected the request
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No response was received from the authority
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authorization UI did not complete successfully
    #[error(transparent)]
    Ui(#[from] UiError),

    /// The request cannot proceed with the current configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The token cache could not satisfy the request
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A token endpoint response could not be understood
    #[error(transparent)]
    TokenResponse(#[from] TokenResponseError),

    /// The redirect carrying the authorization response could not be understood
    #[error(transparent)]
    AuthorizationResponse(#[from] AuthorizationResponseError),

    /// A client assertion could not be produced
    #[error("client assertion could not be signed")]
    Signing(#[source] SigningError),

    /// An unexpected error (possibly a bug)
    #[error("unexpected error")]
    Unexpected(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl From<SigningError> for Error {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::KeyTooSmall { actual, minimum } => {
                ConfigurationError::CertificateKeyTooSmall { actual, minimum }.into()
            }
            other => Self::Signing(other),
        }
    }
}

impl Error {
    /// Whether the user dismissed the authorization UI
    #[must_use]
    pub fn is_user_cancel(&self) -> bool {
        matches!(self, Self::Ui(UiError::UserCancel))
    }

    /// Whether the operation needs an interactive prompt to succeed
    #[must_use]
    pub fn is_interaction_required(&self) -> bool {
        matches!(self, Self::Ui(UiError::UserInteractionRequired { .. }))
    }

    /// Whether no response was received from the authority
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the operation was rejected due to configuration
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// The OAuth2 error code returned by the authority, if any
    #[must_use]
    pub fn service_error_code(&self) -> Option<&str> {
        match self {
            Self::Service(err) => Some(err.code()),
            _ => None,
        }
    }
}

/// A caller-supplied argument is missing or malformed
#[derive(Debug, Error)]
pub enum ArgumentError {
    /// A required argument was empty
    #[error("argument `{0}` must not be empty")]
    Missing(&'static str),

    /// The authority is not a usable authority URL
    #[error("invalid authority `{authority}`: {reason}")]
    InvalidAuthority {
        /// The authority as supplied
        authority: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// A `WWW-Authenticate` value is not a well-formed bearer challenge
    #[error("invalid bearer challenge: {0}")]
    InvalidChallengeFormat(&'static str),

    /// An unauthorized response carried no `WWW-Authenticate` header
    #[error("unauthorized response is missing the WWW-Authenticate header")]
    MissingAuthenticateHeader,

    /// A response used for discovery was not `401 Unauthorized`
    #[error("expected a 401 Unauthorized response, received status {status}")]
    UnauthorizedResponseExpected {
        /// The status that was received
        status: u16,
    },
}

/// An error response from the authority
#[derive(Debug, Error)]
#[error("authority returned `{code}`{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct ServiceError {
    code: String,
    description: Option<String>,
    status: Option<u16>,
}

impl ServiceError {
    /// Constructs a new service error
    pub fn new(code: impl Into<String>, description: Option<String>, status: Option<u16>) -> Self {
        Self {
            code: code.into(),
            description,
            status,
        }
    }

    /// The OAuth2 error code, such as `invalid_grant`
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The human readable description, when the authority provided one
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The HTTP status of the response, when the error arrived over HTTP
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// The authorization UI did not produce an authorization response
#[derive(Debug, Error)]
pub enum UiError {
    /// The user dismissed the UI
    #[error("authentication was canceled by the user")]
    UserCancel,

    /// The UI reported an HTTP failure while navigating
    #[error("authorization UI reported an HTTP error{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    ErrorHttp {
        /// Details reported by the UI
        detail: Option<String>,
    },

    /// The UI finished in a state that could not be classified
    #[error("authorization UI finished with an unknown status")]
    UnknownError,

    /// The UI could not be displayed or failed while running
    #[error("authorization UI failed")]
    AuthenticationUiFailed(#[source] Option<Box<dyn StdError + Send + Sync + 'static>>),

    /// Prompting was forbidden but the request needs user interaction
    #[error("user interaction is required but prompting is not allowed")]
    UserInteractionRequired(#[source] Option<Box<dyn StdError + Send + Sync + 'static>>),
}

/// The request cannot be made with the current configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The client certificate's key is below the minimum size
    #[error("certificate key size of {actual} bits is below the required minimum of {minimum} bits")]
    CertificateKeyTooSmall {
        /// The size of the certificate's key in bits
        actual: u32,
        /// The minimum acceptable key size in bits
        minimum: u32,
    },

    /// Silent authorization requires an SSO or app-callback redirect URI
    #[error("redirect URI `{redirect_uri}` cannot be used when prompting is forbidden")]
    RedirectUriUnsupportedWithPromptBehaviorNever {
        /// The redirect URI that was supplied
        redirect_uri: String,
    },
}

/// The token cache could not satisfy an operation
#[derive(Debug, Error)]
pub enum CacheError {
    /// More than one user matched a lookup that did not name a user
    #[error("{users} distinct users match the lookup; a user must be specified")]
    Ambiguous {
        /// How many distinct users matched
        users: usize,
    },

    /// A serialized cache could not be produced or read back
    #[error("token cache serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// A serialized cache uses a format version this library does not know
    #[error("unsupported token cache format version {0}")]
    UnsupportedVersion(u32),

    /// The persistence hook failed to load or save the cache
    #[error("token cache persistence failed")]
    Persistence(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl CacheError {
    /// Whether the error is due to an ambiguous user match
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

/// A successful token endpoint response was missing required content
#[derive(Debug, Error)]
pub enum TokenResponseError {
    /// The response body was not a JSON token response
    #[error("token response body could not be parsed")]
    Malformed(#[source] serde_json::Error),

    /// The response carried no access token
    #[error("token response did not include an access token")]
    MissingAccessToken,

    /// The response carried no usable `expires_in`
    #[error("token response has a missing or invalid `expires_in`")]
    InvalidExpiresIn,

    /// The response carried an ID token that is not a well-formed JWT
    #[error("token response carried a malformed ID token: {0}")]
    MalformedIdToken(&'static str),
}

/// The redirect from the authorization endpoint could not be used
#[derive(Debug, Error)]
pub enum AuthorizationResponseError {
    /// The redirect carried neither a code nor an error
    #[error("authorization response did not include an authorization code")]
    MissingCode,

    /// The redirect's `state` does not match the one sent with the request
    #[error("authorization response state does not match the request")]
    StateMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undersized_key_maps_to_configuration_error() {
        let err = Error::from(SigningError::KeyTooSmall {
            actual: 1024,
            minimum: 2048,
        });

        assert!(err.is_configuration());
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::CertificateKeyTooSmall {
                actual: 1024,
                minimum: 2048
            })
        ));
    }

    #[test]
    fn other_signing_failures_stay_signing_errors() {
        let err = Error::from(SigningError::MissingPrivateKey);
        assert!(matches!(err, Error::Signing(SigningError::MissingPrivateKey)));
    }

    #[test]
    fn service_error_display_includes_description() {
        let err = ServiceError::new("invalid_grant", Some("refresh token expired".into()), Some(400));
        assert_eq!(
            err.to_string(),
            "authority returned `invalid_grant`: refresh token expired"
        );

        let bare = ServiceError::new("invalid_grant", None, None);
        assert_eq!(bare.to_string(), "authority returned `invalid_grant`");
    }

    #[test]
    fn service_error_code_is_exposed() {
        let err = Error::from(ServiceError::new("invalid_grant", None, Some(400)));
        assert_eq!(err.service_error_code(), Some("invalid_grant"));
        assert_eq!(Error::from(UiError::UserCancel).service_error_code(), None);
    }
}
