//! The interactive authorization step
//!
//! Displaying a browser or web view is platform specific, so the platform
//! supplies an [`AuthorizationAgent`]. The [`AuthorizationGateway`] wraps an
//! agent for one authorization attempt: it validates the redirect URI against
//! the prompt behavior, drives the agent, and classifies the outcome.

use std::{error, fmt};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::{
    braids::AuthorizationCode,
    call_state::CallState,
    error::{AuthorizationResponseError, ConfigurationError, Error, ServiceError, UiError},
};

/// Whether the user may be shown a prompt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PromptBehavior {
    /// Always prompt, skipping the token cache entirely
    Always,
    /// Prompt only when no usable token is cached
    #[default]
    Auto,
    /// Never prompt; fail if user interaction would be required
    Never,
}

/// Configuration for the authorization UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UiConfig {
    /// The URI scheme of redirects handled by the app's own callback
    ///
    /// Redirect URIs with this scheme may be used without prompting.
    ///
    /// Default: `ms-app`
    pub app_callback_scheme: String,

    /// The redirect URI standing for the platform's single sign-on callback
    ///
    /// When this URI is supplied as the redirect, the agent is given no redirect
    /// URI and uses the platform's own.
    ///
    /// Default: `https://sso/`
    pub sso_placeholder: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            app_callback_scheme: "ms-app".to_owned(),
            sso_placeholder: "https://sso/".to_owned(),
        }
    }
}

impl UiConfig {
    fn is_sso_placeholder(&self, redirect_uri: &Url) -> bool {
        redirect_uri.as_str().trim_end_matches('/') == self.sso_placeholder.trim_end_matches('/')
    }
}

/// What the agent is asked to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRequest {
    /// The authorization URL to navigate to
    pub authorization_uri: Url,
    /// Where navigation ends; `None` asks for the platform's SSO callback
    pub redirect_uri: Option<Url>,
    /// Whether the agent must finish without showing anything to the user
    pub silent: bool,
}

/// How an agent's navigation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentResponse {
    /// Navigation reached the redirect URI
    Success {
        /// The full redirect URI, including its query or fragment
        response_data: String,
    },
    /// Navigation failed with an HTTP error
    ErrorHttp {
        /// Details reported by the platform
        detail: String,
    },
    /// The user dismissed the UI
    UserCancel,
    /// Navigation ended for a reason the platform did not classify
    Unknown,
}

/// The agent could not run
#[derive(Debug, Error)]
pub enum AgentError {
    /// A resource the UI needs could not be found
    #[error("authorization UI is unavailable")]
    Unavailable(#[source] Box<dyn error::Error + Send + Sync + 'static>),

    /// The UI failed while running
    #[error("authorization UI failed")]
    Failed(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A platform's means of showing the authorization UI
#[async_trait]
pub trait AuthorizationAgent: Send + Sync {
    /// Navigates to the authorization URL and reports where navigation ended
    async fn authenticate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// The terminal outcome of an authorization attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthorizationStatus {
    /// A redirect was received
    Success,
    /// Navigation failed with an HTTP error
    ErrorHttp,
    /// The user dismissed the UI
    UserCancel,
    /// The attempt ended any other way
    UnknownError,
}

/// The progress of an authorization attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayState {
    /// Not yet started
    NotStarted,
    /// The agent is running
    Pending,
    /// The attempt has finished
    Completed(AuthorizationStatus),
}

/// The result of an authorization attempt
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    status: AuthorizationStatus,
    response_data: Option<String>,
    error_detail: Option<String>,
}

impl fmt::Debug for AuthorizationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthorizationResult")
            .field("status", &self.status)
            .field(
                "response_data",
                &self.response_data.as_ref().map(|_| "<redacted>"),
            )
            .field("error_detail", &self.error_detail)
            .finish()
    }
}

impl AuthorizationResult {
    fn from_agent(response: AgentResponse) -> Self {
        match response {
            AgentResponse::Success { response_data } => Self {
                status: AuthorizationStatus::Success,
                response_data: Some(response_data),
                error_detail: None,
            },
            AgentResponse::ErrorHttp { detail } => Self {
                status: AuthorizationStatus::ErrorHttp,
                response_data: None,
                error_detail: Some(detail),
            },
            AgentResponse::UserCancel => Self {
                status: AuthorizationStatus::UserCancel,
                response_data: None,
                error_detail: None,
            },
            AgentResponse::Unknown => Self {
                status: AuthorizationStatus::UnknownError,
                response_data: None,
                error_detail: None,
            },
        }
    }

    /// The status of the attempt
    #[must_use]
    pub fn status(&self) -> AuthorizationStatus {
        self.status
    }

    /// The redirect URI navigation ended at, on success
    #[must_use]
    pub fn response_data(&self) -> Option<&str> {
        self.response_data.as_deref()
    }

    /// Error details from the agent, on an HTTP error
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Extracts the authorization code from a successful attempt
    ///
    /// # Errors
    ///
    /// The attempt did not succeed, the authority returned an error, the
    /// `state` does not match `expected_state`, or no code was returned.
    pub fn into_authorization_code(self, expected_state: &str) -> Result<AuthorizationCode, Error> {
        let data = match self.status {
            AuthorizationStatus::Success => self.response_data.unwrap_or_default(),
            AuthorizationStatus::ErrorHttp => {
                return Err(UiError::ErrorHttp {
                    detail: self.error_detail,
                }
                .into())
            }
            AuthorizationStatus::UserCancel => return Err(UiError::UserCancel.into()),
            AuthorizationStatus::UnknownError => return Err(UiError::UnknownError.into()),
        };

        let params = redirect_parameters(&data);
        let find = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        if let Some(code) = find("error") {
            let description = find("error_description").map(str::to_owned);
            return Err(ServiceError::new(code, description, None).into());
        }

        if find("state") != Some(expected_state) {
            return Err(AuthorizationResponseError::StateMismatch.into());
        }

        find("code")
            .filter(|c| !c.is_empty())
            .map(|c| AuthorizationCode::new(c.to_owned()))
            .ok_or_else(|| AuthorizationResponseError::MissingCode.into())
    }
}

/// Parameters from both the query and the fragment of a redirect
///
/// Query parameters come first, so they win when a name appears in both.
fn redirect_parameters(data: &str) -> Vec<(String, String)> {
    let (rest, fragment) = data.split_once('#').unwrap_or((data, ""));
    let query = rest.split_once('?').map_or("", |(_, q)| q);

    url::form_urlencoded::parse(query.as_bytes())
        .chain(url::form_urlencoded::parse(fragment.as_bytes()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Drives an [`AuthorizationAgent`] through a single authorization attempt
pub struct AuthorizationGateway<'a, A: ?Sized> {
    agent: &'a A,
    prompt: PromptBehavior,
    config: &'a UiConfig,
    state: GatewayState,
}

impl<'a, A: ?Sized> fmt::Debug for AuthorizationGateway<'a, A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthorizationGateway")
            .field("prompt", &self.prompt)
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, A> AuthorizationGateway<'a, A>
where
    A: AuthorizationAgent + ?Sized,
{
    /// Prepares an attempt with the given agent and prompt behavior
    pub fn new(agent: &'a A, prompt: PromptBehavior, config: &'a UiConfig) -> Self {
        Self {
            agent,
            prompt,
            config,
            state: GatewayState::NotStarted,
        }
    }

    /// The progress of the attempt
    #[must_use]
    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Runs the attempt
    ///
    /// With [`PromptBehavior::Never`], the redirect URI must be the SSO
    /// placeholder or use the app callback scheme, and the agent is asked to
    /// run silently. An attempt can only be run once.
    ///
    /// # Errors
    ///
    /// The redirect URI cannot be used silently, the attempt was already run,
    /// or the agent could not run.
    #[tracing::instrument(
        skip_all,
        fields(
            correlation_id = %call_state.correlation_id(),
            prompt = ?self.prompt,
            status = tracing::field::Empty,
        ),
    )]
    pub async fn acquire_authorization(
        &mut self,
        authorization_uri: &Url,
        redirect_uri: &Url,
        call_state: &CallState,
    ) -> Result<AuthorizationResult, Error> {
        if self.state != GatewayState::NotStarted {
            return Err(UiError::AuthenticationUiFailed(Some(
                "authorization attempt has already been run".into(),
            ))
            .into());
        }

        let sso_mode = self.config.is_sso_placeholder(redirect_uri);
        let silent = self.prompt == PromptBehavior::Never;

        if silent && !sso_mode && redirect_uri.scheme() != self.config.app_callback_scheme {
            tracing::debug!(%redirect_uri, "redirect URI cannot complete without prompting");
            return Err(ConfigurationError::RedirectUriUnsupportedWithPromptBehaviorNever {
                redirect_uri: redirect_uri.to_string(),
            }
            .into());
        }

        let request = AgentRequest {
            authorization_uri: authorization_uri.clone(),
            redirect_uri: (!sso_mode).then(|| redirect_uri.clone()),
            silent,
        };

        self.state = GatewayState::Pending;
        tracing::debug!(sso_mode, silent, "starting authorization agent");

        let outcome = self.agent.authenticate(&request).await;

        let result = match outcome {
            Ok(response) => Ok(AuthorizationResult::from_agent(response)),
            Err(AgentError::Unavailable(source)) => {
                let error: &dyn error::Error = &*source;
                tracing::warn!(error, "authorization UI resources are unavailable");
                Err(UiError::AuthenticationUiFailed(Some(source)).into())
            }
            Err(AgentError::Failed(source)) if silent => {
                Err(UiError::UserInteractionRequired(Some(source)).into())
            }
            Err(AgentError::Failed(source)) => {
                let error: &dyn error::Error = &*source;
                tracing::warn!(error, "authorization UI failed");
                Err(UiError::AuthenticationUiFailed(Some(source)).into())
            }
        };

        let status = match &result {
            Ok(r) => r.status,
            Err(_) => AuthorizationStatus::UnknownError,
        };
        self.state = GatewayState::Completed(status);
        tracing::Span::current().record("status", tracing::field::debug(status));

        result
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test::ScriptedAgent;

    fn auth_url() -> Url {
        Url::parse("https://login.example.com/common/oauth2/authorize?state=s1")
            .expect("valid url")
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("valid url")
    }

    mod when_prompting_is_forbidden {
        use super::*;

        #[tokio::test]
        async fn ordinary_redirect_fails_without_invoking_agent() {
            let agent = ScriptedAgent::returning_code("code-1");
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Never, &config);

            let err = gateway
                .acquire_authorization(&auth_url(), &url("https://app.example.com/callback"), &CallState::new())
                .await
                .expect_err("https redirect cannot be silent");

            assert!(matches!(
                err,
                Error::Configuration(ConfigurationError::RedirectUriUnsupportedWithPromptBehaviorNever { .. })
            ));
            assert_eq!(gateway.state(), GatewayState::NotStarted);
            assert!(agent.requests().is_empty());
        }

        #[tokio::test]
        async fn sso_placeholder_runs_silently_without_redirect() -> Result<()> {
            let agent = ScriptedAgent::returning_code("code-1");
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Never, &config);

            gateway
                .acquire_authorization(&auth_url(), &url("https://sso"), &CallState::new())
                .await?;

            let requests = agent.requests();
            assert_eq!(requests.len(), 1);
            assert!(requests[0].silent);
            assert_eq!(requests[0].redirect_uri, None);
            Ok(())
        }

        #[tokio::test]
        async fn app_callback_scheme_is_allowed() -> Result<()> {
            let agent = ScriptedAgent::returning_code("code-1");
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Never, &config);

            gateway
                .acquire_authorization(&auth_url(), &url("ms-app://s-1-15-2-1234/"), &CallState::new())
                .await?;

            assert_eq!(gateway.state(), GatewayState::Completed(AuthorizationStatus::Success));
            assert!(agent.requests()[0].redirect_uri.is_some());
            Ok(())
        }

        #[tokio::test]
        async fn agent_failure_requires_interaction() {
            let agent = ScriptedAgent::failing(AgentError::Failed("boom".into()));
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Never, &config);

            let err = gateway
                .acquire_authorization(&auth_url(), &url("https://sso"), &CallState::new())
                .await
                .expect_err("agent failed");

            assert!(err.is_interaction_required());
            assert_eq!(gateway.state(), GatewayState::Completed(AuthorizationStatus::UnknownError));
        }
    }

    mod when_prompting_is_allowed {
        use super::*;

        #[tokio::test]
        async fn agent_failure_is_a_ui_failure() {
            let agent = ScriptedAgent::failing(AgentError::Failed("boom".into()));
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Auto, &config);

            let err = gateway
                .acquire_authorization(&auth_url(), &url("https://app.example.com/cb"), &CallState::new())
                .await
                .expect_err("agent failed");

            assert!(matches!(err, Error::Ui(UiError::AuthenticationUiFailed(_))));
        }

        #[tokio::test]
        async fn missing_ui_resources_are_a_ui_failure() {
            let agent = ScriptedAgent::failing(AgentError::Unavailable("no web view".into()));
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Always, &config);

            let err = gateway
                .acquire_authorization(&auth_url(), &url("https://app.example.com/cb"), &CallState::new())
                .await
                .expect_err("agent unavailable");

            assert!(matches!(err, Error::Ui(UiError::AuthenticationUiFailed(_))));
        }

        #[tokio::test]
        async fn each_agent_outcome_maps_to_one_status() -> Result<()> {
            let cases = [
                (AgentResponse::UserCancel, AuthorizationStatus::UserCancel),
                (
                    AgentResponse::ErrorHttp { detail: "404".into() },
                    AuthorizationStatus::ErrorHttp,
                ),
                (AgentResponse::Unknown, AuthorizationStatus::UnknownError),
                (
                    AgentResponse::Success { response_data: "https://app/cb?code=c".into() },
                    AuthorizationStatus::Success,
                ),
            ];

            for (response, expected) in cases {
                let agent = ScriptedAgent::responding(response);
                let config = UiConfig::default();
                let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Auto, &config);

                let result = gateway
                    .acquire_authorization(&auth_url(), &url("https://app/cb"), &CallState::new())
                    .await?;

                assert_eq!(result.status(), expected);
                assert_eq!(gateway.state(), GatewayState::Completed(expected));
                assert!(!agent.requests()[0].silent);
            }
            Ok(())
        }

        #[tokio::test]
        async fn attempt_runs_only_once() -> Result<()> {
            let agent = ScriptedAgent::returning_code("code-1");
            let config = UiConfig::default();
            let mut gateway = AuthorizationGateway::new(&agent, PromptBehavior::Auto, &config);
            let redirect = url("https://app/cb");

            gateway
                .acquire_authorization(&auth_url(), &redirect, &CallState::new())
                .await?;
            let second = gateway
                .acquire_authorization(&auth_url(), &redirect, &CallState::new())
                .await;

            assert!(second.is_err());
            assert_eq!(agent.requests().len(), 1);
            Ok(())
        }
    }

    mod when_reading_the_redirect {
        use super::*;

        fn success(data: &str) -> AuthorizationResult {
            AuthorizationResult::from_agent(AgentResponse::Success {
                response_data: data.to_owned(),
            })
        }

        #[test]
        fn code_is_taken_from_query() -> Result<()> {
            let code = success("https://app/cb?code=abc%2B1&state=s1").into_authorization_code("s1")?;
            assert_eq!(code.as_str(), "abc+1");
            Ok(())
        }

        #[test]
        fn code_is_taken_from_fragment() -> Result<()> {
            let code = success("https://app/cb#code=abc&state=s1").into_authorization_code("s1")?;
            assert_eq!(code.as_str(), "abc");
            Ok(())
        }

        #[test]
        fn query_and_fragment_are_both_read() -> Result<()> {
            let code = success("https://app/cb?session=x1#code=abc&state=s1")
                .into_authorization_code("s1")?;
            assert_eq!(code.as_str(), "abc");
            Ok(())
        }

        #[test]
        fn query_wins_over_fragment() -> Result<()> {
            let code = success("https://app/cb?code=from-query&state=s1#code=from-fragment")
                .into_authorization_code("s1")?;
            assert_eq!(code.as_str(), "from-query");
            Ok(())
        }

        #[test]
        fn authority_errors_become_service_errors() {
            let err = success("https://app/cb?error=access_denied&error_description=nope&state=s1")
                .into_authorization_code("s1")
                .expect_err("authority denied access");
            assert_eq!(err.service_error_code(), Some("access_denied"));
        }

        #[test]
        fn state_must_match() {
            let err = success("https://app/cb?code=abc&state=other")
                .into_authorization_code("s1")
                .expect_err("state differs");
            assert!(matches!(
                err,
                Error::AuthorizationResponse(AuthorizationResponseError::StateMismatch)
            ));
        }

        #[test]
        fn code_must_be_present() {
            let err = success("https://app/cb?state=s1")
                .into_authorization_code("s1")
                .expect_err("no code");
            assert!(matches!(
                err,
                Error::AuthorizationResponse(AuthorizationResponseError::MissingCode)
            ));
        }

        #[test]
        fn non_success_statuses_map_to_ui_errors() {
            let cancel = AuthorizationResult::from_agent(AgentResponse::UserCancel)
                .into_authorization_code("s1")
                .expect_err("canceled");
            assert!(cancel.is_user_cancel());

            let http = AuthorizationResult::from_agent(AgentResponse::ErrorHttp {
                detail: "502".into(),
            })
            .into_authorization_code("s1")
            .expect_err("http error");
            assert!(matches!(
                http,
                Error::Ui(UiError::ErrorHttp { detail: Some(d) }) if d == "502"
            ));
        }
    }
}
