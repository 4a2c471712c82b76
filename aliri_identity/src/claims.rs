//! Identity claims carried by token responses
//!
//! Neither the client info blob nor the ID token is verified here. Both arrive
//! over the same TLS channel as the tokens themselves and are only used to
//! label cache entries.

use aliri_base64::Base64Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{malformed_client_info, malformed_id_token, MalformedClientInfo, MalformedIdToken},
    HomeAccountId, IdTokenRef,
};

fn decode_segment<T: DeserializeOwned>(
    segment: &str,
) -> Result<T, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let raw = Base64Url::from_encoded(segment.trim_end_matches('='))?;
    Ok(serde_json::from_slice(raw.as_slice())?)
}

/// The `client_info` blob: the user's object ID and home tenant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Unique identifier of the user within the home tenant
    #[serde(rename = "uid", default)]
    pub unique_id: String,
    /// Unique identifier of the user's home tenant
    #[serde(rename = "utid", default)]
    pub unique_tenant_id: String,
}

impl ClientInfo {
    /// Decodes a base64url-encoded client info blob
    pub fn parse(raw: &str) -> Result<Self, MalformedClientInfo> {
        decode_segment(raw).map_err(malformed_client_info)
    }

    /// The account identifier formed from this blob, `uid.utid`
    pub fn to_account_identifier(&self) -> HomeAccountId {
        HomeAccountId::new(format!("{}.{}", self.unique_id, self.unique_tenant_id))
    }
}

/// The subset of OpenID Connect ID token claims used by the cache
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Object ID of the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    /// Tenant the token was issued in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Preferred username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// User principal name, issued by some older endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Middle name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
}

impl IdTokenClaims {
    /// Decodes the payload section of an ID token without verifying its signature
    pub fn parse(id_token: &IdTokenRef) -> Result<Self, MalformedIdToken> {
        let mut sections = id_token.as_str().split('.');
        let payload = match (sections.next(), sections.next()) {
            (Some(_), Some(payload)) => payload,
            _ => return Err(malformed_id_token("expected header and payload sections")),
        };

        decode_segment(payload).map_err(malformed_id_token)
    }

    /// The user's object ID, falling back to the subject
    pub fn object_id(&self) -> Option<&str> {
        self.oid.as_deref().or(self.sub.as_deref())
    }

    /// The username shown to the user, from the first claim that carries one
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.upn.as_deref())
            .or(self.email.as_deref())
    }
}
