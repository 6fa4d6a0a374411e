use ostium_clock::UnixTime;

use crate::{
    braids::{AccessToken, AccessTokenRef, IdToken, IdTokenRef, RefreshToken, RefreshTokenRef},
    user::UserInfo,
};

/// The outcome of a successful token acquisition
///
/// Debug output never reveals the tokens themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub(crate) access_token: AccessToken,
    pub(crate) token_type: String,
    pub(crate) expires_on: UnixTime,
    pub(crate) refresh_token: Option<RefreshToken>,
    pub(crate) id_token: Option<IdToken>,
    pub(crate) authority: String,
    pub(crate) resource: String,
    pub(crate) tenant_id: Option<String>,
    pub(crate) user_info: Option<UserInfo>,
    pub(crate) is_multiple_resource_refresh_token: bool,
    pub(crate) from_cache: bool,
}

impl AuthenticationResult {
    /// The access token
    #[must_use]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The token type, usually `Bearer`
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the access token expires
    #[must_use]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// The refresh token, if one was issued
    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The raw ID token, if one was issued
    #[must_use]
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// The authority that issued the token
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The resource the token grants access to
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The tenant that issued the token
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// The user the token was issued to
    #[must_use]
    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    /// Whether the refresh token can be redeemed for other resources
    #[must_use]
    pub fn is_multiple_resource_refresh_token(&self) -> bool {
        self.is_multiple_resource_refresh_token
    }

    /// Whether the result was served from the token cache
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// The value for an `Authorization` header carrying this token
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.as_str())
    }
}
