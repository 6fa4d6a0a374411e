//! Redeeming grants at the token endpoint
//!
//! Every successful exchange is written through to the token cache, so a
//! caller never holds a token the cache does not know about.

use std::sync::Arc;

use http::HeaderValue;
use ostium_clock::{Clock, DurationSecs, System, UnixTime};
use ostium_crypto::{CertificateSigner, ClientAssertion};
use url::Url;

use crate::{
    authority::Authority,
    braids::{AuthorizationCodeRef, RefreshTokenRef},
    cache::{TokenCache, TokenCacheEntry, TokenCacheItem, TokenCacheKey},
    call_state::CallState,
    credential::{ClientAuthentication, ClientCredential},
    error::{ArgumentError, Error, ServiceError, TokenResponseError},
    http::{HttpClient, HttpRequest, HttpResponse},
    id_token::IdTokenClaims,
    result::AuthenticationResult,
    user::UserInfo,
};

mod dto;

use dto::{ClientAuthParams, Grant, TokenRequest, TokenResponse};

const CLIENT_REQUEST_ID: &str = "client-request-id";
const RETURN_CLIENT_REQUEST_ID: &str = "return-client-request-id";

/// Values carried forward from a previous token when a response omits them
#[derive(Clone, Copy, Debug, Default)]
struct Carryover<'a> {
    refresh_token: Option<&'a RefreshTokenRef>,
    user: Option<&'a UserInfo>,
}

/// Exchanges grants for tokens and records the results in the cache
pub struct TokenRequestEngine<H, C = System> {
    http: H,
    cache: Arc<TokenCache>,
    signer: Arc<dyn CertificateSigner>,
    clock: C,
}

impl<H, C> std::fmt::Debug for TokenRequestEngine<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TokenRequestEngine")
            .field("cache", &self.cache)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl<H, C> TokenRequestEngine<H, C>
where
    H: HttpClient,
    C: Clock + Send + Sync,
{
    /// Constructs an engine over the given transport, cache, signer, and clock
    pub fn new(
        http: H,
        cache: Arc<TokenCache>,
        signer: Arc<dyn CertificateSigner>,
        clock: C,
    ) -> Self {
        Self {
            http,
            cache,
            signer,
            clock,
        }
    }

    /// The cache results are written to
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    pub(crate) fn now(&self) -> UnixTime {
        self.clock.now()
    }

    /// Redeems an authorization code
    ///
    /// # Errors
    ///
    /// The request could not be made, or the authority rejected it.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = %call_state.correlation_id(),
            authority = %authority,
            client_id = %credential.client_id(),
            resource = %resource,
        ),
    )]
    pub async fn exchange_authorization_code(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        code: &AuthorizationCodeRef,
        redirect_uri: &Url,
        resource: &str,
        call_state: &CallState,
    ) -> Result<AuthenticationResult, Error> {
        self.redeem(
            authority,
            credential,
            Grant::AuthorizationCode { code, redirect_uri },
            resource,
            Carryover::default(),
            call_state,
        )
        .await
    }

    /// Redeems a refresh token for `resource`
    ///
    /// If the response omits a refresh token or user information, the values
    /// from the previous token are kept.
    ///
    /// # Errors
    ///
    /// The request could not be made, or the authority rejected it.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = %call_state.correlation_id(),
            authority = %authority,
            client_id = %credential.client_id(),
            resource = %resource,
        ),
    )]
    pub async fn exchange_refresh_token(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        refresh_token: &RefreshTokenRef,
        resource: &str,
        previous_user: Option<&UserInfo>,
        call_state: &CallState,
    ) -> Result<AuthenticationResult, Error> {
        self.redeem(
            authority,
            credential,
            Grant::RefreshToken { refresh_token },
            resource,
            Carryover {
                refresh_token: Some(refresh_token),
                user: previous_user,
            },
            call_state,
        )
        .await
    }

    /// Obtains a token for the client itself
    ///
    /// # Errors
    ///
    /// The request could not be made, or the authority rejected it.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = %call_state.correlation_id(),
            authority = %authority,
            client_id = %credential.client_id(),
            resource = %resource,
        ),
    )]
    pub async fn exchange_client_credentials(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        resource: &str,
        call_state: &CallState,
    ) -> Result<AuthenticationResult, Error> {
        self.redeem(
            authority,
            credential,
            Grant::ClientCredentials,
            resource,
            Carryover::default(),
            call_state,
        )
        .await
    }

    async fn redeem(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        grant: Grant<'_>,
        resource: &str,
        carryover: Carryover<'_>,
        call_state: &CallState,
    ) -> Result<AuthenticationResult, Error> {
        if resource.trim().is_empty() {
            return Err(ArgumentError::Missing("resource").into());
        }

        let now = self.clock.now();
        let token_endpoint = authority.token_endpoint();

        let minted;
        let auth = match credential.authentication() {
            ClientAuthentication::None => ClientAuthParams::None,
            ClientAuthentication::Secret(secret) => ClientAuthParams::Secret(secret),
            ClientAuthentication::Certificate(certificate) => {
                minted = ClientAssertion::from_certificate(
                    &*self.signer,
                    certificate,
                    credential.client_id().as_str(),
                    token_endpoint.as_str(),
                    now,
                )?;
                ClientAuthParams::Assertion(&minted)
            }
            ClientAuthentication::Assertion(assertion) => ClientAuthParams::Assertion(assertion),
        };

        let grant_type = grant.grant_type();
        let body = serde_urlencoded::to_string(TokenRequest {
            grant,
            client_id: credential.client_id(),
            resource,
            auth,
        })
        .map_err(|e| Error::Unexpected(e.into()))?;

        let mut request = HttpRequest::post_form(token_endpoint.clone(), body);
        if let Ok(id) = HeaderValue::from_str(&call_state.to_string()) {
            request.headers.insert(CLIENT_REQUEST_ID, id);
        }
        request
            .headers
            .insert(RETURN_CLIENT_REQUEST_ID, HeaderValue::from_static("true"));

        tracing::trace!(grant_type, "requesting token from authority");
        let response = self.http.send(request).await?;
        tracing::debug!(
            response.status = response.status.as_u16(),
            "received token response from issuing authority"
        );

        let parsed = parse_response(&response)?;
        self.record(authority, credential, resource, parsed, carryover, now)
            .await
    }

    async fn record(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        resource: &str,
        response: TokenResponse,
        carryover: Carryover<'_>,
        now: UnixTime,
    ) -> Result<AuthenticationResult, Error> {
        let access_token = response
            .access_token
            .ok_or(TokenResponseError::MissingAccessToken)?;
        let expires_in = response
            .expires_in
            .as_ref()
            .and_then(dto::ExpiresIn::seconds)
            .ok_or(TokenResponseError::InvalidExpiresIn)?;

        let claims = response
            .id_token
            .as_deref()
            .map(IdTokenClaims::parse)
            .transpose()?;

        let user_info = claims
            .as_ref()
            .map(IdTokenClaims::user_info)
            .or_else(|| carryover.user.cloned());
        let tenant_id = claims.and_then(|c| c.tid);

        let authority = match &tenant_id {
            Some(tenant) if authority.is_common() => authority
                .with_tenant(tenant)
                .unwrap_or_else(|_| authority.clone()),
            _ => authority.clone(),
        };

        let refresh_token = response
            .refresh_token
            .or_else(|| carryover.refresh_token.map(ToOwned::to_owned));
        let is_mrrt = response.resource.is_some();
        let expires_on = now + DurationSecs(expires_in);

        tracing::info!(
            has_id_token = response.id_token.is_some(),
            has_refresh_token = refresh_token.is_some(),
            is_mrrt,
            lifetime = expires_in,
            expiry = expires_on.0,
            "received new tokens"
        );

        let key = TokenCacheKey::new(
            &authority,
            resource,
            credential.client_id(),
            user_info.as_ref(),
            is_mrrt,
        );
        let entry = TokenCacheEntry::new(access_token, expires_on)
            .with_token_type(response.token_type.unwrap_or_else(|| "Bearer".to_owned()))
            .with_refresh_token(refresh_token)
            .with_id_token(response.id_token)
            .with_tenant_id(tenant_id)
            .with_user_info(user_info);

        let mut result = TokenCacheItem::new(key.clone(), entry.clone()).to_result();
        result.from_cache = false;

        self.cache.store(key, entry);
        if let Err(err) = self.cache.persist().await {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "token cache could not be persisted");
        }

        Ok(result)
    }
}

fn parse_response(response: &HttpResponse) -> Result<TokenResponse, Error> {
    let status = response.status;

    match serde_json::from_slice::<TokenResponse>(&response.body) {
        Ok(mut parsed) => {
            if let Some(code) = parsed.error.take() {
                return Err(ServiceError::new(
                    code,
                    parsed.error_description,
                    Some(status.as_u16()),
                )
                .into());
            }

            if !status.is_success() {
                return Err(unclassified(response));
            }

            Ok(parsed)
        }
        Err(_) if !status.is_success() => Err(unclassified(response)),
        Err(err) => Err(TokenResponseError::Malformed(err).into()),
    }
}

fn unclassified(response: &HttpResponse) -> Error {
    let body = String::from_utf8_lossy(&response.body);
    let description = (!body.trim().is_empty()).then(|| body.chars().take(512).collect());
    ServiceError::new(
        "unknown_error",
        description,
        Some(response.status.as_u16()),
    )
    .into()
}
