//! Wire types for the token endpoint

use ostium_crypto::ClientAssertion;
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::braids::{
    AccessToken, AuthorizationCodeRef, ClientIdRef, ClientSecretRef, IdToken, RefreshToken,
    RefreshTokenRef,
};

/// The grant being redeemed
#[derive(Debug)]
pub(super) enum Grant<'a> {
    AuthorizationCode {
        code: &'a AuthorizationCodeRef,
        redirect_uri: &'a Url,
    },
    RefreshToken {
        refresh_token: &'a RefreshTokenRef,
    },
    ClientCredentials,
}

impl Grant<'_> {
    pub(super) fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// Client authentication parameters sent with a request
#[derive(Debug)]
pub(super) enum ClientAuthParams<'a> {
    None,
    Secret(&'a ClientSecretRef),
    Assertion(&'a ClientAssertion),
}

#[derive(Debug)]
pub(super) struct TokenRequest<'a> {
    pub grant: Grant<'a>,
    pub client_id: &'a ClientIdRef,
    pub resource: &'a str,
    pub auth: ClientAuthParams<'a>,
}

impl Serialize for TokenRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("TokenRequest", 6)?;
        ser.serialize_field("grant_type", self.grant.grant_type())?;
        match &self.grant {
            Grant::AuthorizationCode { code, redirect_uri } => {
                ser.serialize_field("code", code)?;
                ser.serialize_field("redirect_uri", redirect_uri.as_str())?;
            }
            Grant::RefreshToken { refresh_token } => {
                ser.serialize_field("refresh_token", refresh_token)?;
            }
            Grant::ClientCredentials => {}
        }
        ser.serialize_field("client_id", self.client_id)?;
        ser.serialize_field("resource", self.resource)?;
        match &self.auth {
            ClientAuthParams::None => {}
            ClientAuthParams::Secret(secret) => {
                ser.serialize_field("client_secret", secret)?;
            }
            ClientAuthParams::Assertion(assertion) => {
                ser.serialize_field("client_assertion_type", assertion.assertion_type())?;
                ser.serialize_field("client_assertion", assertion.assertion())?;
            }
        }
        ser.end()
    }
}

/// `expires_in` as sent by authorities, which use both numbers and strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    pub(super) fn seconds(&self) -> Option<u64> {
        match self {
            Self::Seconds(s) => Some(*s),
            Self::Text(t) => t.trim().parse().ok(),
        }
    }
}

/// A token endpoint response body, successful or not
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<ExpiresIn>,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub id_token: Option<IdToken>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}
