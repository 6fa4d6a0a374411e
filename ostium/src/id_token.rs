//! Structural decoding of ID tokens
//!
//! ID tokens arrive over a direct TLS channel from the token endpoint, so
//! only their shape is checked here. Signatures are not verified.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use serde::Deserialize;

use crate::{braids::IdTokenRef, error::TokenResponseError, user::UserInfo};

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    upn: Option<String>,
    email: Option<String>,
    unique_name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    idp: Option<String>,
    iss: Option<String>,
    pub(crate) tid: Option<String>,
}

impl IdTokenClaims {
    pub(crate) fn parse(token: &IdTokenRef) -> Result<Self, TokenResponseError> {
        let mut segments = token.as_str().split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenResponseError::MalformedIdToken(
                "expected three dot-separated segments",
            ));
        };

        decode_segment::<serde_json::Map<String, serde_json::Value>>(header)?;
        decode_segment(payload)
    }

    pub(crate) fn user_info(&self) -> UserInfo {
        UserInfo {
            unique_id: self.oid.clone().or_else(|| self.sub.clone()),
            displayable_id: self
                .upn
                .clone()
                .or_else(|| self.email.clone())
                .or_else(|| self.unique_name.clone()),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
            identity_provider: self.idp.clone().or_else(|| self.iss.clone()),
        }
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenResponseError> {
    if segment.is_empty() {
        return Err(TokenResponseError::MalformedIdToken("empty segment"));
    }

    let raw = URL_SAFE_LENIENT
        .decode(segment)
        .map_err(|_| TokenResponseError::MalformedIdToken("segment is not base64url"))?;

    serde_json::from_slice(&raw)
        .map_err(|_| TokenResponseError::MalformedIdToken("segment is not a JSON object"))
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;
    use crate::{braids::IdToken, test};

    #[test]
    fn prefers_oid_and_upn() -> Result<()> {
        let token = IdToken::new(test::id_token(json!({
            "oid": "object-1",
            "sub": "subject-1",
            "upn": "alice@contoso.com",
            "email": "alice@mail.example",
            "tid": "tenant-1",
            "given_name": "Alice",
            "iss": "https://sts.example.com/tenant-1/",
        })));

        let claims = IdTokenClaims::parse(&token)?;
        let user = claims.user_info();

        assert_eq!(user.unique_id.as_deref(), Some("object-1"));
        assert_eq!(user.displayable_id.as_deref(), Some("alice@contoso.com"));
        assert_eq!(user.given_name.as_deref(), Some("Alice"));
        assert_eq!(user.identity_provider.as_deref(), Some("https://sts.example.com/tenant-1/"));
        assert_eq!(claims.tid.as_deref(), Some("tenant-1"));
        Ok(())
    }

    #[test]
    fn falls_back_to_sub_and_email() -> Result<()> {
        let token = IdToken::new(test::id_token(json!({
            "sub": "subject-1",
            "email": "bob@mail.example",
        })));

        let user = IdTokenClaims::parse(&token)?.user_info();
        assert_eq!(user.unique_id.as_deref(), Some("subject-1"));
        assert_eq!(user.displayable_id.as_deref(), Some("bob@mail.example"));
        Ok(())
    }

    #[test]
    fn padded_segments_are_accepted() -> Result<()> {
        let header = base64::engine::general_purpose::URL_SAFE.encode(br#"{"alg":"none"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sub":"s"}"#);
        let token = IdToken::new(format!("{header}.{payload}."));

        let user = IdTokenClaims::parse(&token)?.user_info();
        assert_eq!(user.unique_id.as_deref(), Some("s"));
        Ok(())
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for raw in ["", "abc", "a.b", "a.b.c.d", ".e30.", "e30.!!!.", "e30.bm90LWpzb24."] {
            let token = IdToken::new(raw.to_owned());
            assert!(
                matches!(
                    IdTokenClaims::parse(&token),
                    Err(TokenResponseError::MalformedIdToken(_))
                ),
                "accepted {raw:?}"
            );
        }
    }
}
