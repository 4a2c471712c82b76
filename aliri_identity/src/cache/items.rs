//! Typed records stored in the token cache
//!
//! Every credential shares a [`CredentialHeader`] carrying the account, issuer
//! host, client, discriminator and secret. Fields that this crate does not
//! understand are kept in the header's `additional_fields` so that they survive a
//! read-modify-write cycle unchanged.

use aliri_clock::{DurationSecs, UnixTime};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::keys;
use crate::{
    authority::authority_for, claims::IdTokenClaims, scopes::ScopeSet, AccessToken, ClientId,
    Environment, FamilyId, FamilyIdRef, HomeAccountId, HomeAccountIdRef, IdToken, RefreshToken,
    TenantId, TenantIdRef,
};

/// Access tokens expiring within this window are not served from the cache
pub const ACCESS_TOKEN_EXPIRY_BUFFER: DurationSecs = DurationSecs(300);

/// Unknown JSON fields carried through unchanged
pub type AdditionalFields = serde_json::Map<String, serde_json::Value>;

/// The discriminator stored with each credential
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    /// An access token
    AccessToken,
    /// A refresh token, possibly shared by a family of clients
    RefreshToken,
    /// An OpenID Connect ID token
    IdToken,
}

impl CredentialType {
    /// The lowercase name used inside canonical keys
    pub const fn key_segment(self) -> &'static str {
        match self {
            Self::AccessToken => "accesstoken",
            Self::RefreshToken => "refreshtoken",
            Self::IdToken => "idtoken",
        }
    }
}

/// Fields common to every cached credential
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialHeader<S> {
    /// The account that owns the credential
    pub home_account_id: HomeAccountId,
    /// The host that issued the credential
    pub environment: Environment,
    /// The client the credential was issued to
    pub client_id: ClientId,
    /// The kind of credential
    pub credential_type: CredentialType,
    /// The credential itself
    pub secret: S,
    /// Fields not modeled by this crate
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl<S> CredentialHeader<S> {
    /// Constructs a header with no additional fields
    pub fn new(
        credential_type: CredentialType,
        home_account_id: HomeAccountId,
        environment: Environment,
        client_id: ClientId,
        secret: S,
    ) -> Self {
        Self {
            home_account_id,
            environment,
            client_id,
            credential_type,
            secret,
            additional_fields: AdditionalFields::new(),
        }
    }
}

/// Timestamps are persisted as decimal strings but numbers are accepted on read
pub(crate) mod timestamp {
    use aliri_clock::UnixTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    impl Raw {
        fn into_time<E: de::Error>(self) -> Result<UnixTime, E> {
            match self {
                Raw::Number(n) => Ok(UnixTime(n)),
                Raw::Text(s) => s.trim().parse().map(UnixTime).map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(time: &UnixTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UnixTime, D::Error> {
        Raw::deserialize(deserializer)?.into_time()
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(
            time: &Option<UnixTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<UnixTime>, D::Error> {
            match Option::<Raw>::deserialize(deserializer)? {
                // A zero timestamp is how older writers marked a missing value
                Some(Raw::Text(s)) if s.trim().is_empty() || s.trim() == "0" => Ok(None),
                Some(Raw::Number(0)) | None => Ok(None),
                Some(raw) => raw.into_time().map(Some),
            }
        }
    }
}

/// A cached access token
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenItem {
    /// Shared credential fields
    #[serde(flatten)]
    pub header: CredentialHeader<AccessToken>,
    /// The tenant the token was issued in
    #[serde(rename = "realm", default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    /// The scopes granted
    #[serde(rename = "target", default)]
    pub scopes: ScopeSet,
    /// When the token was written to the cache
    #[serde(with = "timestamp")]
    pub cached_at: UnixTime,
    /// When the token expires
    #[serde(with = "timestamp")]
    pub expires_on: UnixTime,
    #[serde(
        default,
        with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    extended_expires_on: Option<UnixTime>,
    #[serde(
        default,
        with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    ext_expires_on: Option<UnixTime>,
    /// When the token should be proactively refreshed
    #[serde(
        default,
        with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_on: Option<UnixTime>,
    /// Key binding for proof-of-possession tokens
    #[serde(rename = "keyid", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// The token type, `Bearer` unless otherwise specified
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    String::from("Bearer")
}

impl AccessTokenItem {
    /// Constructs an access token item
    pub fn new(
        header: CredentialHeader<AccessToken>,
        tenant: Option<TenantId>,
        scopes: ScopeSet,
        cached_at: UnixTime,
        expires_on: UnixTime,
    ) -> Self {
        Self {
            header,
            tenant,
            scopes,
            cached_at,
            expires_on,
            extended_expires_on: None,
            ext_expires_on: None,
            refresh_on: None,
            key_id: None,
            token_type: default_token_type(),
        }
    }

    /// Sets the extended expiry, written under both the current and legacy field names
    pub fn with_extended_expires_on(mut self, extended_expires_on: UnixTime) -> Self {
        self.extended_expires_on = Some(extended_expires_on);
        self.ext_expires_on = Some(extended_expires_on);
        self
    }

    /// Sets the proactive refresh time, clamped to the expiry
    pub fn with_refresh_on(mut self, refresh_on: UnixTime) -> Self {
        self.refresh_on = Some(refresh_on.min(self.expires_on));
        self
    }

    /// Sets the token type
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Binds the token to a proof-of-possession key
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// The extended expiry, falling back to the legacy field name
    pub fn extended_expires_on(&self) -> Option<UnixTime> {
        self.extended_expires_on.or(self.ext_expires_on)
    }

    /// Whether the token is expired, or expires within the safety buffer
    pub fn is_expired(&self, now: UnixTime) -> bool {
        self.expires_on <= now + ACCESS_TOKEN_EXPIRY_BUFFER
    }

    /// Whether the proactive refresh time has passed
    pub fn needs_refresh(&self, now: UnixTime) -> bool {
        self.refresh_on.map_or(false, |r| r < now)
    }

    /// The authority the token was issued by
    pub fn authority(&self) -> String {
        authority_for(&self.header.environment, self.tenant.as_deref())
    }

    /// The canonical cache key
    pub fn cache_key(&self) -> String {
        keys::access_token(
            &self.header.home_account_id,
            &self.header.environment,
            &self.header.client_id,
            self.tenant.as_deref(),
            &self.scopes,
            &self.token_type,
        )
    }
}

/// A cached refresh token
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenItem {
    /// Shared credential fields
    #[serde(flatten)]
    pub header: CredentialHeader<RefreshToken>,
    /// The family this token belongs to, if it is shared across clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<FamilyId>,
}

impl RefreshTokenItem {
    /// Constructs a refresh token item
    pub fn new(header: CredentialHeader<RefreshToken>, family_id: Option<FamilyId>) -> Self {
        Self {
            header,
            family_id: family_id.filter(|f| !f.as_str().is_empty()),
        }
    }

    /// Whether this is a family refresh token
    pub fn is_family_token(&self) -> bool {
        self.family_id.is_some()
    }

    /// The canonical cache key
    pub fn cache_key(&self) -> String {
        keys::refresh_token(
            &self.header.home_account_id,
            &self.header.environment,
            &self.header.client_id,
            self.family_id.as_deref(),
        )
    }
}

/// A cached ID token
///
/// Claims are decoded from the raw token on first use and remembered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdTokenItem {
    /// Shared credential fields
    #[serde(flatten)]
    pub header: CredentialHeader<IdToken>,
    /// The tenant the token was issued in
    #[serde(rename = "realm", default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    #[serde(skip)]
    claims: OnceCell<Option<IdTokenClaims>>,
}

impl IdTokenItem {
    /// Constructs an ID token item
    pub fn new(header: CredentialHeader<IdToken>, tenant: Option<TenantId>) -> Self {
        Self {
            header,
            tenant,
            claims: OnceCell::new(),
        }
    }

    /// The decoded claims, or `None` if the token cannot be decoded
    pub fn claims(&self) -> Option<&IdTokenClaims> {
        self.claims
            .get_or_init(|| match IdTokenClaims::parse(&self.header.secret) {
                Ok(claims) => Some(claims),
                Err(error) => {
                    tracing::debug!(
                        error = (&error as &dyn std::error::Error),
                        "unable to decode cached id token"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// The authority the token was issued by
    pub fn authority(&self) -> String {
        authority_for(&self.header.environment, self.tenant.as_deref())
    }

    /// The canonical cache key
    pub fn cache_key(&self) -> String {
        keys::id_token(
            &self.header.home_account_id,
            &self.header.environment,
            &self.header.client_id,
            self.tenant.as_deref(),
        )
    }
}

impl PartialEq for IdTokenItem {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.tenant == other.tenant
    }
}

/// A cached account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountItem {
    /// The account identifier, stable across tenants
    pub home_account_id: HomeAccountId,
    /// The host the account was seen on
    pub environment: Environment,
    /// The tenant the account was last seen in
    #[serde(rename = "realm", default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    /// The object ID of the user in that tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_account_id: Option<String>,
    /// The username shown to the user
    #[serde(default)]
    pub username: String,
    /// The kind of authority that issued the account
    #[serde(default = "default_authority_type")]
    pub authority_type: String,
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
    /// The raw client info blob the account was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
    /// Fields not modeled by this crate
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

fn default_authority_type() -> String {
    String::from("MSSTS")
}

impl AccountItem {
    /// Constructs an account with only its identifying fields set
    pub fn new(
        home_account_id: HomeAccountId,
        environment: Environment,
        username: impl Into<String>,
    ) -> Self {
        Self {
            home_account_id,
            environment,
            tenant: None,
            local_account_id: None,
            username: username.into(),
            authority_type: default_authority_type(),
            name: None,
            given_name: None,
            family_name: None,
            middle_name: None,
            client_info: None,
            additional_fields: AdditionalFields::new(),
        }
    }

    /// Fills the profile fields from ID token claims
    pub fn with_claims(mut self, claims: &IdTokenClaims) -> Self {
        self.local_account_id = claims.object_id().map(String::from);
        self.tenant = claims.tid.clone().map(TenantId::new);
        self.name = claims.name.clone();
        self.given_name = claims.given_name.clone();
        self.family_name = claims.family_name.clone();
        self.middle_name = claims.middle_name.clone();
        if let Some(username) = claims.username() {
            self.username = username.to_owned();
        }
        self
    }

    /// The canonical cache key
    pub fn cache_key(&self) -> String {
        keys::account(&self.home_account_id, &self.environment)
    }

    /// The account's home tenant, from the `uid.utid` identifier when present
    pub fn home_tenant(&self) -> Option<&TenantIdRef> {
        home_tenant_of(&self.home_account_id)
    }
}

/// Extracts the tenant half of a `uid.utid` account identifier
pub fn home_tenant_of(home_account_id: &HomeAccountIdRef) -> Option<&TenantIdRef> {
    home_account_id
        .as_str()
        .split_once('.')
        .map(|(_, utid)| utid)
        .filter(|utid| !utid.is_empty())
        .map(TenantIdRef::from_str)
}

/// What has been learned about an application's family membership
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppMetadataItem {
    /// The application
    pub client_id: ClientId,
    /// The host the membership was observed on
    pub environment: Environment,
    /// The family the application belongs to, empty when it is known not to be a member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<FamilyId>,
    /// Fields not modeled by this crate
    #[serde(flatten)]
    pub additional_fields: AdditionalFields,
}

impl AppMetadataItem {
    /// Constructs an app metadata record
    pub fn new(client_id: ClientId, environment: Environment, family_id: Option<FamilyId>) -> Self {
        Self {
            client_id,
            environment,
            family_id,
            additional_fields: AdditionalFields::new(),
        }
    }

    /// Whether the application belongs to the given family
    pub fn is_member_of(&self, family_id: &FamilyIdRef) -> bool {
        self.family_id
            .as_deref()
            .map_or(false, |f| f.as_str() == family_id.as_str())
    }

    /// The canonical cache key
    pub fn cache_key(&self) -> String {
        keys::app_metadata(&self.environment, &self.client_id)
    }
}
