use std::fmt;

use url::Url;

use crate::error::ArgumentError;

const COMMON_TENANT: &str = "common";

/// The token-issuing authority, identified by a tenant-scoped URL
///
/// Authorities are held in a canonical form: lowercase, without query or
/// fragment, and ending in a single `/`. Two authorities that differ only in
/// case or a trailing slash are the same authority.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    canonical: String,
    tenant: String,
    authorize_endpoint: Url,
    token_endpoint: Url,
}

impl Authority {
    /// Parses and validates an authority URL
    ///
    /// The authority must be an absolute `https` URL whose first path segment
    /// names the tenant.
    ///
    /// # Errors
    ///
    /// The authority is empty, not a URL, not `https`, carries a query or
    /// fragment, or does not name a tenant.
    pub fn parse(authority: &str) -> Result<Self, ArgumentError> {
        Self::parse_with_validation(authority, true)
    }

    /// Parses an authority URL, optionally skipping the `https` requirement
    ///
    /// # Errors
    ///
    /// See [`Authority::parse`].
    pub fn parse_with_validation(authority: &str, validate: bool) -> Result<Self, ArgumentError> {
        let trimmed = authority.trim();
        if trimmed.is_empty() {
            return Err(ArgumentError::Missing("authority"));
        }

        let invalid = |reason| ArgumentError::InvalidAuthority {
            authority: trimmed.to_owned(),
            reason,
        };

        let mut url =
            Url::parse(&trimmed.to_ascii_lowercase()).map_err(|_| invalid("not an absolute URL"))?;

        if validate && url.scheme() != "https" {
            return Err(invalid("authority must use https"));
        }

        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("authority must not carry a query or fragment"));
        }

        let tenant = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .map(str::to_owned)
            .ok_or_else(|| invalid("authority must name a tenant"))?;

        url.set_path(&format!("{tenant}/"));

        let authorize_endpoint = url
            .join("oauth2/authorize")
            .map_err(|_| invalid("not an absolute URL"))?;
        let token_endpoint = url
            .join("oauth2/token")
            .map_err(|_| invalid("not an absolute URL"))?;

        Ok(Self {
            canonical: url.into(),
            tenant,
            authorize_endpoint,
            token_endpoint,
        })
    }

    /// The canonical authority URL
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// The tenant named by the authority
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether this is the tenant-less `common` authority
    #[must_use]
    pub fn is_common(&self) -> bool {
        self.tenant == COMMON_TENANT
    }

    /// The same authority host, scoped to a different tenant
    ///
    /// # Errors
    ///
    /// The tenant is not a valid path segment.
    pub fn with_tenant(&self, tenant: &str) -> Result<Self, ArgumentError> {
        let base = self
            .canonical
            .strip_suffix(&format!("{}/", self.tenant))
            .unwrap_or(&self.canonical);

        Self::parse_with_validation(&format!("{base}{tenant}/"), false)
    }

    /// The endpoint at which users authorize the client
    #[must_use]
    pub fn authorize_endpoint(&self) -> &Url {
        &self.authorize_endpoint
    }

    /// The endpoint at which grants are exchanged for tokens
    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Authority").field(&self.canonical).finish()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
