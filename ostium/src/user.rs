use serde::{Deserialize, Serialize};

/// Identifies which user a token request is for
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UserIdentifier {
    /// Any user, provided only one user matches
    #[default]
    Any,
    /// A user identified by the authority's immutable unique identifier
    UniqueId(String),
    /// A user identified by a displayable name, such as a UPN or email
    ///
    /// Matched without regard to case. Also passed to the authorization UI as
    /// a login hint.
    DisplayableId(String),
}

impl UserIdentifier {
    pub(crate) fn login_hint(&self) -> Option<&str> {
        match self {
            Self::DisplayableId(id) => Some(id),
            _ => None,
        }
    }
}

/// Information about the user a token was issued to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// The authority's immutable identifier for the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// A name suitable for display, such as a UPN or email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayable_id: Option<String>,

    /// The user's given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// The user's family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// The identity provider that authenticated the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
}

impl UserInfo {
    pub(crate) fn matches(&self, user: &UserIdentifier) -> bool {
        match user {
            UserIdentifier::Any => true,
            UserIdentifier::UniqueId(id) => self.unique_id.as_deref() == Some(id.as_str()),
            UserIdentifier::DisplayableId(id) => self
                .displayable_id
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case(id)),
        }
    }
}
