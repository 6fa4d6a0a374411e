use std::{io::BufRead, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Parser;
use ostium::{
    ui::{AgentError, AgentRequest, AgentResponse},
    AuthenticationContext, AuthorizationAgent, ClientCredential, ClientId, ClientSecret,
    FilePersistence, PromptBehavior, ReqwestHttpClient, TokenCache, UserIdentifier,
};
use url::Url;

#[derive(Debug, Parser)]
struct Opts {
    /// The authority to acquire tokens from
    #[clap(short, long, env, default_value = "https://login.microsoftonline.com/common")]
    authority: String,

    /// The client ID of the application
    #[clap(short, long, env)]
    client_id: ClientId,

    /// The resource to request a token for
    #[clap(short, long, env)]
    resource: String,

    /// The redirect URI registered for the application
    #[clap(long, env, default_value = "https://login.microsoftonline.com/common/oauth2/nativeclient")]
    redirect_uri: Url,

    /// Acquire a token for the client itself using this secret
    #[clap(short = 's', long, env, hide_env_values = true)]
    client_secret: Option<ClientSecret>,

    /// The user to acquire a token for
    #[clap(short, long, env)]
    user: Option<String>,

    /// Always show the sign-in prompt
    #[clap(long)]
    force_prompt: bool,

    /// The local file used to cache tokens
    #[clap(short = 'f', long, env, default_value = ".tokens.json")]
    cache_file: PathBuf,
}

/// Prints the authorization URL and reads the final redirect from the console
#[derive(Debug)]
struct ConsoleAgent;

#[async_trait]
impl AuthorizationAgent for ConsoleAgent {
    async fn authenticate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        if request.silent {
            return Ok(AgentResponse::Unknown);
        }

        println!("Open this URL in a browser and sign in:\n\n{}\n", request.authorization_uri);
        println!("Then paste the address the browser was redirected to (empty to cancel):");

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| AgentError::Failed(e.into()))?
        .map_err(|e| AgentError::Unavailable(e.into()))?;

        let line = line.trim();
        if line.is_empty() {
            Ok(AgentResponse::UserCancel)
        } else {
            Ok(AgentResponse::Success {
                response_data: line.to_owned(),
            })
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let cache = Arc::new(
        TokenCache::new().with_persistence(Arc::new(FilePersistence::new(opts.cache_file))),
    );
    if cache.restore().await? {
        tracing::info!(tokens = cache.count(), "restored token cache");
    }

    let context = AuthenticationContext::builder(opts.authority)
        .with_cache(cache)
        .build(ReqwestHttpClient::new())?;

    let result = if let Some(secret) = opts.client_secret {
        let credential = ClientCredential::with_secret(opts.client_id, secret);
        context
            .acquire_token_for_client(&opts.resource, &credential)
            .await?
    } else {
        let user = opts
            .user
            .map_or(UserIdentifier::Any, UserIdentifier::DisplayableId);
        let prompt = if opts.force_prompt {
            PromptBehavior::Always
        } else {
            PromptBehavior::Auto
        };

        context
            .acquire_token_for_user(
                &opts.resource,
                &opts.client_id,
                &opts.redirect_uri,
                &ConsoleAgent,
                prompt,
                &user,
            )
            .await?
    };

    tracing::info!(
        access_token = %format_args!("{:#?}", result.access_token()),
        expires_on = result.expires_on().0,
        from_cache = result.from_cache(),
        user = ?result.user_info().and_then(|u| u.displayable_id.as_deref()),
        "acquired token"
    );

    Ok(())
}
