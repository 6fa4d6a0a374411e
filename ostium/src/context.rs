//! The public entry point for acquiring tokens

use std::sync::Arc;

use ostium_clock::{Clock, DurationSecs, System};
use ostium_crypto::{CertificateSigner, CryptoSigner};
use url::Url;
use uuid::Uuid;

use crate::{
    authority::Authority,
    braids::{AuthorizationCode, AuthorizationCodeRef, ClientIdRef},
    cache::{CacheQuery, TokenCache},
    call_state::CallState,
    challenge::AuthenticationParameters,
    credential::ClientCredential,
    engine::TokenRequestEngine,
    error::{ArgumentError, Error, UiError},
    http::HttpClient,
    result::AuthenticationResult,
    ui::{AuthorizationAgent, AuthorizationGateway, PromptBehavior, UiConfig},
    user::UserIdentifier,
};

/// Tunables for an [`AuthenticationContext`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    /// How close to expiry a cached token may be before it is refreshed
    ///
    /// Default: 5 minutes
    pub expiration_margin: DurationSecs,

    /// Whether the authority must be an `https` URL
    ///
    /// Default: `true`
    pub validate_authority: bool,

    /// Authorization UI settings
    pub ui: UiConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            expiration_margin: DurationSecs(300),
            validate_authority: true,
            ui: UiConfig::default(),
        }
    }
}

/// Builds an [`AuthenticationContext`]
#[derive(Debug)]
#[must_use]
pub struct ContextBuilder<C = System> {
    authority: String,
    cache: Option<Arc<TokenCache>>,
    signer: Arc<dyn CertificateSigner>,
    config: ContextConfig,
    correlation_id: Option<Uuid>,
    clock: C,
}

impl ContextBuilder<System> {
    fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            cache: None,
            signer: Arc::new(CryptoSigner::new()),
            config: ContextConfig::default(),
            correlation_id: None,
            clock: System,
        }
    }
}

impl<C> ContextBuilder<C> {
    /// Shares an existing token cache
    ///
    /// Without this, the context gets a cache of its own.
    pub fn with_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the certificate signer
    pub fn with_signer(mut self, signer: Arc<dyn CertificateSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the configuration
    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a fixed correlation ID for every call instead of a fresh one
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Replaces the clock
    pub fn with_clock<D>(self, clock: D) -> ContextBuilder<D> {
        ContextBuilder {
            authority: self.authority,
            cache: self.cache,
            signer: self.signer,
            config: self.config,
            correlation_id: self.correlation_id,
            clock,
        }
    }

    /// Builds the context over the given HTTP client
    ///
    /// # Errors
    ///
    /// The authority is not valid.
    pub fn build<H>(self, http: H) -> Result<AuthenticationContext<H, C>, Error>
    where
        H: HttpClient,
        C: Clock + Send + Sync,
    {
        let authority =
            Authority::parse_with_validation(&self.authority, self.config.validate_authority)?;
        let cache = self.cache.unwrap_or_default();

        tracing::debug!(%authority, "created authentication context");

        Ok(AuthenticationContext {
            authority,
            config: self.config,
            correlation_id: self.correlation_id,
            engine: TokenRequestEngine::new(http, cache, self.signer, self.clock),
        })
    }
}

/// Acquires tokens from an authority, using the token cache where possible
///
/// Each context is bound to one authority. Contexts sharing a [`TokenCache`]
/// see each other's tokens.
#[derive(Debug)]
pub struct AuthenticationContext<H, C = System> {
    authority: Authority,
    config: ContextConfig,
    correlation_id: Option<Uuid>,
    engine: TokenRequestEngine<H, C>,
}

impl AuthenticationContext<(), System> {
    /// Starts building a context for `authority`
    pub fn builder(authority: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(authority)
    }

    /// Starts building a context for the authority named in a bearer challenge
    ///
    /// # Errors
    ///
    /// The challenge did not name an authority.
    pub fn builder_from_parameters(
        parameters: &AuthenticationParameters,
    ) -> Result<ContextBuilder, ArgumentError> {
        parameters
            .authority
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(ContextBuilder::new)
            .ok_or(ArgumentError::Missing("authorization_uri"))
    }
}

impl<H, C> AuthenticationContext<H, C>
where
    H: HttpClient,
    C: Clock + Send + Sync,
{
    /// The authority the context was created for
    #[must_use]
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// The token cache
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        self.engine.cache()
    }

    /// The context's configuration
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn call_state(&self) -> CallState {
        self.correlation_id
            .map_or_else(CallState::new, CallState::with_correlation_id)
    }

    /// The authority to use for one call
    ///
    /// A `common` authority is narrowed to the authority of a cached token, so
    /// that a user who has already signed in to a tenant stays in it.
    fn resolve_authority(&self) -> Authority {
        if !self.authority.is_common() {
            return self.authority.clone();
        }

        // With several tenants cached, which one wins is unspecified.
        let Some(item) = self.cache().read_items().into_iter().next() else {
            return self.authority.clone();
        };

        match Authority::parse_with_validation(item.authority(), false) {
            Ok(resolved) => {
                if resolved != self.authority {
                    tracing::debug!(authority = %resolved, "narrowed common authority from cache");
                }
                resolved
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "cached authority is invalid; keeping common authority");
                self.authority.clone()
            }
        }
    }

    /// Acquires a token for `resource` on behalf of any signed-in user
    ///
    /// See [`acquire_token_for_user`][Self::acquire_token_for_user].
    ///
    /// # Errors
    ///
    /// See [`acquire_token_for_user`][Self::acquire_token_for_user].
    pub async fn acquire_token<A>(
        &self,
        resource: &str,
        client_id: &ClientIdRef,
        redirect_uri: &Url,
        agent: &A,
        prompt: PromptBehavior,
    ) -> Result<AuthenticationResult, Error>
    where
        A: AuthorizationAgent + ?Sized,
    {
        self.acquire_token_for_user(
            resource,
            client_id,
            redirect_uri,
            agent,
            prompt,
            &UserIdentifier::Any,
        )
        .await
    }

    /// Acquires a token for `resource` on behalf of `user`
    ///
    /// Unless `prompt` is [`PromptBehavior::Always`], the cache is consulted
    /// first. A cached token that is not near expiry is returned as is; one
    /// that is near expiry is refreshed if it carries a refresh token. A
    /// multiple resource refresh token for the same user is tried next. Only
    /// then is the user prompted through `agent`.
    ///
    /// A failed refresh falls through to the next step, except with
    /// [`PromptBehavior::Never`], where the refresh error is returned.
    ///
    /// # Errors
    ///
    /// The cache is ambiguous for `user`, the authorization UI did not
    /// complete, or the authority rejected a request.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = tracing::field::Empty,
            resource = %resource,
            client_id = %client_id,
            prompt = ?prompt,
        ),
    )]
    pub async fn acquire_token_for_user<A>(
        &self,
        resource: &str,
        client_id: &ClientIdRef,
        redirect_uri: &Url,
        agent: &A,
        prompt: PromptBehavior,
        user: &UserIdentifier,
    ) -> Result<AuthenticationResult, Error>
    where
        A: AuthorizationAgent + ?Sized,
    {
        if resource.trim().is_empty() {
            return Err(ArgumentError::Missing("resource").into());
        }

        let call_state = self.call_state();
        tracing::Span::current().record("correlation_id", tracing::field::display(&call_state));

        let authority = self.resolve_authority();
        let credential = ClientCredential::public(client_id.to_owned());

        if prompt != PromptBehavior::Always {
            let surface_refresh_errors = prompt == PromptBehavior::Never;
            if let Some(result) = self
                .try_cache(
                    &authority,
                    &credential,
                    resource,
                    user,
                    surface_refresh_errors,
                    &call_state,
                )
                .await?
            {
                return Ok(result);
            }
        }

        let code = self
            .acquire_authorization_code(
                &authority,
                resource,
                client_id,
                redirect_uri,
                agent,
                prompt,
                user,
                &call_state,
            )
            .await?;

        self.engine
            .exchange_authorization_code(
                &authority,
                &credential,
                &code,
                redirect_uri,
                resource,
                &call_state,
            )
            .await
    }

    /// Acquires a token using only the cache and refresh tokens
    ///
    /// # Errors
    ///
    /// No usable token is cached ([`UiError::UserInteractionRequired`]), the
    /// cache is ambiguous for `user`, or a refresh was rejected.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = tracing::field::Empty,
            resource = %resource,
            client_id = %client_id,
        ),
    )]
    pub async fn acquire_token_silent(
        &self,
        resource: &str,
        client_id: &ClientIdRef,
        user: &UserIdentifier,
    ) -> Result<AuthenticationResult, Error> {
        if resource.trim().is_empty() {
            return Err(ArgumentError::Missing("resource").into());
        }

        let call_state = self.call_state();
        tracing::Span::current().record("correlation_id", tracing::field::display(&call_state));

        let authority = self.resolve_authority();
        let credential = ClientCredential::public(client_id.to_owned());

        self.try_cache(&authority, &credential, resource, user, true, &call_state)
            .await?
            .ok_or_else(|| UiError::UserInteractionRequired(None).into())
    }

    /// Acquires a token for the client itself
    ///
    /// A cached client token that is not near expiry is reused.
    ///
    /// # Errors
    ///
    /// The credential could not be used, or the authority rejected the request.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = tracing::field::Empty,
            resource = %resource,
            client_id = %credential.client_id(),
        ),
    )]
    pub async fn acquire_token_for_client(
        &self,
        resource: &str,
        credential: &ClientCredential,
    ) -> Result<AuthenticationResult, Error> {
        if resource.trim().is_empty() {
            return Err(ArgumentError::Missing("resource").into());
        }

        let call_state = self.call_state();
        tracing::Span::current().record("correlation_id", tracing::field::display(&call_state));

        let query = CacheQuery::new(&self.authority, credential.client_id())
            .resource(resource)
            .without_user();

        if let Some(item) = self.cache().lookup(&query)? {
            if !item
                .entry()
                .is_near_expiry(self.engine.now(), self.config.expiration_margin)
            {
                tracing::debug!("using cached client token");
                return Ok(item.to_result());
            }
        }

        self.engine
            .exchange_client_credentials(&self.authority, credential, resource, &call_state)
            .await
    }

    /// Redeems an authorization code obtained outside the library
    ///
    /// # Errors
    ///
    /// The credential could not be used, or the authority rejected the code.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            correlation_id = tracing::field::Empty,
            resource = %resource,
            client_id = %credential.client_id(),
        ),
    )]
    pub async fn acquire_token_by_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &Url,
        credential: &ClientCredential,
        resource: &str,
    ) -> Result<AuthenticationResult, Error> {
        if code.as_str().is_empty() {
            return Err(ArgumentError::Missing("authorization_code").into());
        }

        let call_state = self.call_state();
        tracing::Span::current().record("correlation_id", tracing::field::display(&call_state));

        self.engine
            .exchange_authorization_code(
                &self.authority,
                credential,
                code,
                redirect_uri,
                resource,
                &call_state,
            )
            .await
    }

    async fn try_cache(
        &self,
        authority: &Authority,
        credential: &ClientCredential,
        resource: &str,
        user: &UserIdentifier,
        surface_refresh_errors: bool,
        call_state: &CallState,
    ) -> Result<Option<AuthenticationResult>, Error> {
        let query = CacheQuery::new(authority, credential.client_id())
            .resource(resource)
            .user(user);

        if let Some(item) = self.cache().lookup(&query)? {
            let now = self.engine.now();
            if !item.entry().is_near_expiry(now, self.config.expiration_margin) {
                tracing::debug!("using cached token");
                return Ok(Some(item.to_result()));
            }

            if let Some(refresh_token) = item.entry().refresh_token() {
                tracing::debug!("cached token is near expiry; refreshing");
                let refreshed = self
                    .engine
                    .exchange_refresh_token(
                        authority,
                        credential,
                        refresh_token,
                        resource,
                        item.entry().user_info(),
                        call_state,
                    )
                    .await;

                match refreshed {
                    Ok(result) => return Ok(Some(result)),
                    Err(err) if surface_refresh_errors => return Err(err),
                    Err(err) => {
                        // A rejected refresh token is not retried as a multiple resource token.
                        let error: &dyn std::error::Error = &err;
                        tracing::warn!(error, "refresh failed; falling back to authorization UI");
                        return Ok(None);
                    }
                }
            } else {
                tracing::debug!("cached token is near expiry and cannot be refreshed");
            }
        }

        let mrrt_query = CacheQuery::new(authority, credential.client_id())
            .user(user)
            .multiple_resource_only();

        let Some(item) = self.cache().lookup(&mrrt_query)? else {
            return Ok(None);
        };
        let Some(refresh_token) = item.entry().refresh_token() else {
            return Ok(None);
        };

        tracing::debug!(
            from_resource = item.key().resource(),
            "redeeming multiple resource refresh token"
        );
        let refreshed = self
            .engine
            .exchange_refresh_token(
                authority,
                credential,
                refresh_token,
                resource,
                item.entry().user_info(),
                call_state,
            )
            .await;

        match refreshed {
            Ok(result) => Ok(Some(result)),
            Err(err) if surface_refresh_errors => Err(err),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(
                    error,
                    "multiple resource refresh failed; falling back to authorization UI"
                );
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn acquire_authorization_code<A>(
        &self,
        authority: &Authority,
        resource: &str,
        client_id: &ClientIdRef,
        redirect_uri: &Url,
        agent: &A,
        prompt: PromptBehavior,
        user: &UserIdentifier,
        call_state: &CallState,
    ) -> Result<AuthorizationCode, Error>
    where
        A: AuthorizationAgent + ?Sized,
    {
        let state = Uuid::new_v4().to_string();

        let mut authorization_uri = authority.authorize_endpoint().clone();
        {
            let mut query = authorization_uri.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", client_id.as_str())
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("resource", resource)
                .append_pair("state", &state)
                .append_pair("client-request-id", &call_state.to_string());

            if prompt == PromptBehavior::Always {
                query.append_pair("prompt", "login");
            }

            if let Some(hint) = user.login_hint() {
                query.append_pair("login_hint", hint);
            }
        }

        let mut gateway = AuthorizationGateway::new(agent, prompt, &self.config.ui);
        let result = gateway
            .acquire_authorization(&authorization_uri, redirect_uri, call_state)
            .await?;

        result.into_authorization_code(&state)
    }
}
