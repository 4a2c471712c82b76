//! Canonical cache keys
//!
//! Keys are hyphen-joined and lowercased, so host and account identifiers
//! compare case-insensitively. Scopes are normalized before they reach a key.

use crate::{
    scopes::ScopeSet, ClientIdRef, EnvironmentRef, FamilyIdRef, HomeAccountIdRef, TenantIdRef,
};

use super::items::CredentialType;

fn join(parts: &[&str]) -> String {
    parts.join("-").to_lowercase()
}

/// Key of an access token
pub fn access_token(
    home_account_id: &HomeAccountIdRef,
    environment: &EnvironmentRef,
    client_id: &ClientIdRef,
    tenant: Option<&TenantIdRef>,
    scopes: &ScopeSet,
    token_type: &str,
) -> String {
    join(&[
        home_account_id.as_str(),
        environment.as_str(),
        CredentialType::AccessToken.key_segment(),
        client_id.as_str(),
        tenant.map_or("", |t| t.as_str()),
        &scopes.normalized(),
        token_type,
    ])
}

/// Key of a refresh token
///
/// Family tokens are keyed by family rather than by client so that every member
/// of the family resolves the same entry.
pub fn refresh_token(
    home_account_id: &HomeAccountIdRef,
    environment: &EnvironmentRef,
    client_id: &ClientIdRef,
    family_id: Option<&FamilyIdRef>,
) -> String {
    let owner = match family_id {
        Some(family) => format!("foci-{}", family),
        None => client_id.as_str().to_owned(),
    };

    join(&[
        home_account_id.as_str(),
        environment.as_str(),
        CredentialType::RefreshToken.key_segment(),
        &owner,
        "",
    ])
}

/// Key of an ID token
pub fn id_token(
    home_account_id: &HomeAccountIdRef,
    environment: &EnvironmentRef,
    client_id: &ClientIdRef,
    tenant: Option<&TenantIdRef>,
) -> String {
    join(&[
        home_account_id.as_str(),
        environment.as_str(),
        CredentialType::IdToken.key_segment(),
        client_id.as_str(),
        tenant.map_or("", |t| t.as_str()),
    ])
}

/// Key of an account
pub fn account(home_account_id: &HomeAccountIdRef, environment: &EnvironmentRef) -> String {
    join(&[home_account_id.as_str(), environment.as_str()])
}

/// Key of an application's metadata
pub fn app_metadata(environment: &EnvironmentRef, client_id: &ClientIdRef) -> String {
    join(&["appmetadata", environment.as_str(), client_id.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientId, Environment, FamilyId, HomeAccountId, TenantId};

    #[test]
    fn access_token_key_ignores_scope_order_and_case() {
        let hai = HomeAccountId::from_static("uid.utid");
        let env = Environment::from_static("login.example.com");
        let client = ClientId::from_static("client");
        let tenant = TenantId::from_static("utid");

        let a = access_token(
            &hai,
            &env,
            &client,
            Some(&*tenant),
            &ScopeSet::parse("a b"),
            "Bearer",
        );
        let b = access_token(
            &hai,
            &env,
            &client,
            Some(&*tenant),
            &ScopeSet::parse("B A"),
            "bearer",
        );

        assert_eq!(a, b);
        assert_eq!(a, "uid.utid-login.example.com-accesstoken-client-utid-a b-bearer");
    }

    #[test]
    fn host_and_account_are_case_insensitive() {
        let lower = account(
            &HomeAccountId::from_static("uid.utid"),
            &Environment::from_static("login.example.com"),
        );
        let upper = account(
            &HomeAccountId::from_static("UID.UTID"),
            &Environment::from_static("LOGIN.example.COM"),
        );

        assert_eq!(lower, upper);
    }

    #[test]
    fn family_refresh_tokens_share_a_key_across_clients() {
        let hai = HomeAccountId::from_static("uid.utid");
        let env = Environment::from_static("login.example.com");
        let family = FamilyId::from_static("1");

        let one = refresh_token(&hai, &env, &ClientId::from_static("one"), Some(&*family));
        let two = refresh_token(&hai, &env, &ClientId::from_static("two"), Some(&*family));
        let app = refresh_token(&hai, &env, &ClientId::from_static("one"), None);

        assert_eq!(one, two);
        assert_ne!(one, app);
    }
}
