use ostium_crypto::{ClientAssertion, ClientAssertionCertificate};

use crate::braids::{ClientId, ClientIdRef, ClientSecret};

/// How a client proves its identity to the token endpoint
#[derive(Clone, Debug)]
pub enum ClientAuthentication {
    /// A public client; only the client ID is sent
    None,
    /// A shared secret
    Secret(ClientSecret),
    /// A certificate, used to sign a fresh assertion for every request
    Certificate(ClientAssertionCertificate),
    /// A pre-built assertion
    Assertion(ClientAssertion),
}

/// A client's identity and the means of authenticating it
#[derive(Clone, Debug)]
pub struct ClientCredential {
    client_id: ClientId,
    authentication: ClientAuthentication,
}

impl ClientCredential {
    /// A public client
    pub fn public(client_id: ClientId) -> Self {
        Self {
            client_id,
            authentication: ClientAuthentication::None,
        }
    }

    /// A confidential client authenticating with a shared secret
    pub fn with_secret(client_id: ClientId, secret: ClientSecret) -> Self {
        Self {
            client_id,
            authentication: ClientAuthentication::Secret(secret),
        }
    }

    /// A confidential client authenticating with a certificate
    pub fn with_certificate(client_id: ClientId, certificate: ClientAssertionCertificate) -> Self {
        Self {
            client_id,
            authentication: ClientAuthentication::Certificate(certificate),
        }
    }

    /// A confidential client authenticating with a pre-built assertion
    pub fn with_assertion(client_id: ClientId, assertion: ClientAssertion) -> Self {
        Self {
            client_id,
            authentication: ClientAuthentication::Assertion(assertion),
        }
    }

    /// The client ID
    #[must_use]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// How the client authenticates
    #[must_use]
    pub fn authentication(&self) -> &ClientAuthentication {
        &self.authentication
    }
}
