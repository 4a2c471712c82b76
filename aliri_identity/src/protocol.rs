//! The boundary to the identity provider's token endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    authority::Authority, error::ServiceError, scopes::ScopeSet, AccessToken, ClientId, FamilyId,
    IdToken, RefreshToken,
};

#[cfg(feature = "oauth2")]
pub mod oauth2;

/// A refresh-token grant to be exchanged for new tokens
#[derive(Clone, Debug)]
pub struct TokenRequest {
    /// The authority to send the request to, already tenanted
    pub authority: Authority,
    /// The requesting client
    pub client_id: ClientId,
    /// The scopes being requested
    pub scopes: ScopeSet,
    /// The refresh token being redeemed
    pub refresh_token: RefreshToken,
    /// A claims challenge to forward, if any
    pub claims: Option<String>,
}

/// The tokens issued in response to a successful exchange
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The new access token
    pub access_token: AccessToken,
    /// A rotated refresh token, if the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// An ID token, if the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
    /// Lifetime of the access token, in seconds
    #[serde(with = "seconds")]
    pub expires_in: u64,
    /// Extended lifetime of the access token, in seconds
    #[serde(
        default,
        with = "seconds::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub ext_expires_in: Option<u64>,
    /// How long until the token should be proactively refreshed, in seconds
    #[serde(
        default,
        with = "seconds::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_in: Option<u64>,
    /// The scopes actually granted
    #[serde(default)]
    pub scope: ScopeSet,
    /// The token type
    #[serde(default = "bearer")]
    pub token_type: String,
    /// The base64url-encoded client info blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
    /// The family the refresh token belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foci: Option<FamilyId>,
}

fn bearer() -> String {
    String::from("Bearer")
}

impl TokenResponse {
    /// A bearer response carrying only an access token
    pub fn new(access_token: AccessToken, expires_in: u64) -> Self {
        Self {
            access_token,
            refresh_token: None,
            id_token: None,
            expires_in,
            ext_expires_in: None,
            refresh_in: None,
            scope: ScopeSet::empty(),
            token_type: bearer(),
            client_info: None,
            foci: None,
        }
    }
}

/// Some servers send durations as strings
mod seconds {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    fn parse<E: de::Error>(raw: Raw) -> Result<u64, E> {
        match raw {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.trim().parse().map_err(E::custom),
        }
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        parse(Raw::deserialize(deserializer)?)
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_u64(*v),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(parse)
                .transpose()
        }
    }
}

/// Exchanges refresh tokens at the identity provider
///
/// Implementations classify failures into [`ServiceError`]s so that the silent
/// flow can choose a recovery path from the error code and sub-error.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Redeems a refresh token for new tokens
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError>;
}

#[async_trait]
impl<T: TokenExchange + ?Sized> TokenExchange for std::sync::Arc<T> {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError> {
        (**self).exchange(request).await
    }
}
