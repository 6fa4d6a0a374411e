use aliri_braid::braid;
use std::fmt;

/// Redacts a secret unless formatted with the alternate flag
///
/// `{:#?}` reveals up to the given number of characters (the formatter's width
/// wins when supplied), ending in an ellipsis when the value was cut short.
/// `{:#}` reveals the whole value.
macro_rules! redacted {
    ($ty:ty, $label:literal, $prefix:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                let shown = f.width().unwrap_or($prefix);
                write!(f, "\"{}\"", Prefix(self.as_str(), shown))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str(self.as_str())
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }
    };
}

/// At most `.1` characters of `.0`, the last of which becomes `…` if cut
struct Prefix<'a>(&'a str, usize);

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self(value, shown) = *self;
        if value.chars().count() <= shown {
            return f.write_str(value);
        }

        let kept: String = value.chars().take(shown.saturating_sub(1)).collect();
        write!(f, "{kept}…")
    }
}

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef, "CLIENT SECRET", 5);

/// An OAuth2 authorization code, redeemable once at the token endpoint
#[braid(serde, debug = "owned", display = "owned")]
pub struct AuthorizationCode;

redacted!(AuthorizationCodeRef, "AUTHORIZATION CODE", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, "ACCESS TOKEN", 15);

/// An OpenID Connect ID token
#[braid(serde)]
pub struct IdToken;

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef, "REFRESH TOKEN", 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let token = AccessToken::from_static("eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.payload");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_bounded_prefix() {
        let secret = ClientSecret::from_static("super-secret-value");
        assert_eq!(format!("{:#?}", secret), "\"supe…\"");
        assert_eq!(format!("{:#8?}", secret), "\"super-s…\"");
        assert_eq!(format!("{:#40?}", secret), "\"super-secret-value\"");
        assert_eq!(format!("{:#}", secret), "super-secret-value");
    }
}
