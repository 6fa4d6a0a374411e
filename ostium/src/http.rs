//! The HTTP transport used to reach the authority
//!
//! All network access goes through [`HttpClient`], so tests and embedders can
//! substitute their own transport. With the `reqwest` feature enabled,
//! [`ReqwestHttpClient`] provides an implementation over [`reqwest`].

use std::{error::Error as StdError, sync::Arc};

use async_trait::async_trait;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

/// An outgoing HTTP request
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// The request method
    pub method: Method,
    /// The target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// The request body, if any
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// A `GET` request with no body
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A `POST` request carrying a URL-encoded form body
    pub fn post_form(url: Url, body: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        Self {
            method: Method::POST,
            url,
            headers,
            body: Some(body.into_bytes()),
        }
    }

    /// The body as UTF-8 text, if present and valid
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// A received HTTP response
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// The response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// The response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with the given status and no headers or body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header to the response
    ///
    /// Values that are not valid header values are dropped.
    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replaces the response body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The first value of a header, if present and valid text
    #[must_use]
    pub fn header_str(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// No response was received for a request
#[derive(Debug, Error)]
#[error("no response received from {url}")]
pub struct TransportError {
    url: String,
    #[source]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl TransportError {
    /// Wraps the underlying transport failure for a request to `url`
    pub fn new(url: &Url, source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            url: url.to_string(),
            source: source.into(),
        }
    }

    /// The URL that could not be reached
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Sends HTTP requests on behalf of the library
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits for the full response
    ///
    /// Any response received, whatever its status, is returned as `Ok`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for &T {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_client::ReqwestHttpClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use async_trait::async_trait;

    use super::{HttpClient, HttpRequest, HttpResponse, TransportError};

    /// An [`HttpClient`] backed by [`reqwest`]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[derive(Clone, Debug, Default)]
    pub struct ReqwestHttpClient {
        client: reqwest::Client,
    }

    impl ReqwestHttpClient {
        /// Constructs a client with default settings
        pub fn new() -> Self {
            Self::default()
        }

        /// Wraps an existing `reqwest` client
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestHttpClient {
        #[tracing::instrument(
            level = "debug",
            skip_all,
            fields(method = %request.method, url = %request.url),
        )]
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let HttpRequest {
                method,
                url,
                headers,
                body,
            } = request;

            let mut builder = self.client.request(method, url.clone()).headers(headers);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::new(&url, e))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::new(&url, e))?;

            tracing::debug!(%status, body.len = body.len(), "received response");

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        }
    }
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
    use color_eyre::Result;
    use wiremock::{
        matchers::{body_string_contains, header as header_is, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[tokio::test]
    async fn reqwest_client_round_trips_form_posts() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/token"))
            .and(header_is("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("x-trace", "abc")
                    .set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/tenant/oauth2/token", server.uri()))?;
        let response = ReqwestHttpClient::new()
            .send(HttpRequest::post_form(url, "grant_type=refresh_token".into()))
            .await?;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.header_str(header::HeaderName::from_static("x-trace")), Some("abc"));
        assert_eq!(response.body, br#"{"error":"invalid_grant"}"#);

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() -> Result<()> {
        let url = Url::parse("http://127.0.0.1:9/unreachable")?;
        let err = ReqwestHttpClient::new()
            .send(HttpRequest::get(url))
            .await
            .expect_err("nothing listens on the discard port");

        assert_eq!(err.url(), "http://127.0.0.1:9/unreachable");
        Ok(())
    }
}
