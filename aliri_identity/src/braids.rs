use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(self.as_str(), &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(self.as_str(), &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A client ID, identifying an application registered with the identity provider
#[braid(serde)]
pub struct ClientId;

/// An account identifier that is stable across tenants, usually `uid.utid`
#[braid(serde)]
pub struct HomeAccountId;

/// The host of the identity provider that issued a credential
#[braid(serde)]
pub struct Environment;

/// A tenant (or realm) within an identity provider
#[braid(serde)]
pub struct TenantId;

/// The identifier of a family of client IDs that share refresh tokens
#[braid(serde)]
pub struct FamilyId;

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// An OpenID Connect ID token, in its raw JWT form
#[braid(serde, debug = "owned", display = "owned")]
pub struct IdToken;

limited_reveal!(IdTokenRef: "ID TOKEN", 10);

impl HomeAccountIdRef {
    /// Compares two account identifiers, ignoring ASCII case
    pub fn matches(&self, other: &HomeAccountIdRef) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl EnvironmentRef {
    /// Compares two environments, ignoring ASCII case
    pub fn matches(&self, other: &EnvironmentRef) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl ClientIdRef {
    /// Compares two client IDs, ignoring ASCII case
    pub fn matches(&self, other: &ClientIdRef) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted_by_default() {
        let token = AccessToken::from_static("eyJ0eXAiOiJKV1QiLCJhbGciOiJub25lIn0");

        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = RefreshToken::from_static("0.ARwA6WgJJ9X2qk");

        assert_eq!(format!("{:#?}", token), "\"0.AR…\"");
        assert_eq!(format!("{:#}", token), "0.ARwA6WgJJ9X2qk");
    }

    #[test]
    fn environment_matching_ignores_case() {
        let a = Environment::from_static("Login.Example.COM");
        let b = Environment::from_static("login.example.com");

        assert!(a.matches(&b));
    }
}
