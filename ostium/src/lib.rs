//! Token acquisition for OAuth2 clients of a multi-tenant authority
//!
//! An [`AuthenticationContext`] is bound to one authority and acquires access
//! tokens for protected resources, either on behalf of a user through an
//! interactive authorization step or on behalf of the client itself. Tokens
//! are kept in a [`TokenCache`] and refreshed as they near expiry.
//!
//! ```no_run
//! use ostium::{
//!     AuthenticationContext, ClientId, PromptBehavior, ReqwestHttpClient,
//!     ui::{AgentError, AgentRequest, AgentResponse, AuthorizationAgent},
//! };
//!
//! #[derive(Debug)]
//! struct Browser;
//!
//! #[async_trait::async_trait]
//! impl AuthorizationAgent for Browser {
//!     async fn authenticate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
//!         // Show `request.authorization_uri` and wait for the redirect
//! #       unimplemented!()
//!     }
//! }
//!
//! # async fn run() -> Result<(), ostium::Error> {
//! let context = AuthenticationContext::builder("https://login.example.com/common")
//!     .build(ReqwestHttpClient::new())?;
//!
//! let redirect_uri = url::Url::parse("https://app.example.com/callback").unwrap();
//! let result = context
//!     .acquire_token(
//!         "https://service.example.com",
//!         &ClientId::from_static("my-client-id"),
//!         &redirect_uri,
//!         &Browser,
//!         PromptBehavior::Auto,
//!     )
//!     .await?;
//!
//! println!("Authorization: {}", result.authorization_header());
//! # Ok(())
//! # }
//! ```
//!
//! Every network call goes through an [`HttpClient`]; the `reqwest` feature
//! supplies one. The `file` feature adds [`FilePersistence`] for keeping the
//! cache on disk between runs.
//!
//! Secrets and tokens are redacted when formatted with `{:?}` or `{}`. Use
//! the alternate flag (`{:#?}`) to reveal a short prefix.

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

pub mod authority;
mod braids;
pub mod cache;
mod call_state;
pub mod challenge;
pub mod context;
pub mod credential;
pub mod engine;
pub mod error;
pub mod http;
mod id_token;
mod result;
pub mod ui;
mod user;


pub use authority::Authority;
pub use braids::*;
#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub use cache::FilePersistence;
#[doc(inline)]
pub use cache::{CachePersistence, TokenCache};
pub use call_state::CallState;
#[doc(inline)]
pub use challenge::AuthenticationParameters;
#[doc(inline)]
pub use context::{AuthenticationContext, ContextConfig};
pub use credential::{ClientAuthentication, ClientCredential};
#[doc(inline)]
pub use error::Error;
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use http::ReqwestHttpClient;
#[doc(inline)]
pub use http::{HttpClient, HttpRequest, HttpResponse};
pub use ostium_crypto::{ClientAssertion, ClientAssertionCertificate};
pub use result::AuthenticationResult;
#[doc(inline)]
pub use ui::{AuthorizationAgent, PromptBehavior};
pub use user::{UserIdentifier, UserInfo};
