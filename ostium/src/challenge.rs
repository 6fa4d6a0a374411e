//! Discovery of authentication parameters from bearer challenges
//!
//! A protected resource answers unauthenticated requests with
//! `401 Unauthorized` and a `WWW-Authenticate: Bearer ...` challenge naming
//! the authority to use and, optionally, its own resource identifier.

use std::collections::HashMap;

use http::{header, StatusCode};
use url::Url;

use crate::{
    error::{ArgumentError, Error},
    http::{HttpClient, HttpRequest, HttpResponse},
};

const BEARER: &str = "bearer";
const AUTHORITY_KEY: &str = "authorization_uri";
const RESOURCE_KEY: &str = "resource_id";

/// Parameters extracted from a bearer challenge
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthenticationParameters {
    /// The authority the resource trusts, from `authorization_uri`
    pub authority: Option<String>,
    /// The resource's identifier, from `resource_id`
    pub resource: Option<String>,
}

impl AuthenticationParameters {
    /// Parses the value of a `WWW-Authenticate` header
    ///
    /// The scheme must be `Bearer` (in any case), followed by whitespace and a
    /// comma-separated list of `key=value` pairs. Keys are matched without
    /// regard to case; values may be quoted. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// The header is empty, uses a different scheme, or its parameters cannot
    /// be split into key-value pairs.
    pub fn from_authenticate_header(header: &str) -> Result<Self, ArgumentError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(ArgumentError::Missing("authenticate_header"));
        }

        let params = strip_bearer_scheme(header)
            .ok_or(ArgumentError::InvalidChallengeFormat("scheme must be Bearer"))?;

        let mut pairs = parse_parameters(params)?;

        Ok(Self {
            authority: pairs.remove(AUTHORITY_KEY),
            resource: pairs.remove(RESOURCE_KEY),
        })
    }

    /// Extracts parameters from a `401 Unauthorized` response
    ///
    /// # Errors
    ///
    /// The response is not a 401, has no `WWW-Authenticate` header, or the
    /// header is not a valid bearer challenge.
    pub fn from_unauthorized_response(response: &HttpResponse) -> Result<Self, ArgumentError> {
        if response.status != StatusCode::UNAUTHORIZED {
            return Err(ArgumentError::UnauthorizedResponseExpected {
                status: response.status.as_u16(),
            });
        }

        let header = response
            .header_str(header::WWW_AUTHENTICATE)
            .ok_or(ArgumentError::MissingAuthenticateHeader)?;

        Self::from_authenticate_header(header)
    }

    /// Calls a resource without credentials and parses its challenge
    ///
    /// # Errors
    ///
    /// The resource could not be reached or did not answer with a usable
    /// bearer challenge.
    #[tracing::instrument(err, skip(http), fields(resource_url = %resource_url))]
    pub async fn from_resource_url<H>(http: &H, resource_url: &Url) -> Result<Self, Error>
    where
        H: HttpClient + ?Sized,
    {
        let response = http.send(HttpRequest::get(resource_url.clone())).await?;
        tracing::debug!(status = %response.status, "received unauthenticated challenge response");

        Ok(Self::from_unauthorized_response(&response)?)
    }
}

fn strip_bearer_scheme(header: &str) -> Option<&str> {
    let scheme = header.get(..BEARER.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return None;
    }

    let rest = &header[BEARER.len()..];

    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_whitespace() && !chars.as_str().trim().is_empty() => Some(rest),
        _ => None,
    }
}

fn parse_parameters(input: &str) -> Result<HashMap<String, String>, ArgumentError> {
    let mut pairs = HashMap::new();

    for item in split_outside_quotes(input, ',')? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let (key, value) = item
            .split_once('=')
            .ok_or(ArgumentError::InvalidChallengeFormat("expected key=value pairs"))?;

        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ArgumentError::InvalidChallengeFormat("parameter name is empty"));
        }

        pairs.entry(key).or_insert_with(|| unquote(value.trim()));
    }

    Ok(pairs)
}

fn split_outside_quotes(input: &str, delimiter: char) -> Result<Vec<&str>, ArgumentError> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                items.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(ArgumentError::InvalidChallengeFormat("unterminated quoted value"));
    }

    items.push(&input[start..]);
    Ok(items)
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_owned(),
    }
}
