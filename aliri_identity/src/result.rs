//! Accounts and the outcome of a token request

use aliri_clock::UnixTime;

use crate::{
    cache::items::{home_tenant_of, AccessTokenItem, AccountItem, IdTokenItem},
    scopes::ScopeSet,
    AccessTokenRef, Environment, HomeAccountId, IdTokenRef, TenantIdRef,
};

/// A signed-in account known to the cache
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Account {
    /// The account identifier, stable across tenants
    pub home_account_id: HomeAccountId,
    /// The host the account signed in on
    pub environment: Environment,
    /// The username shown to the user
    pub username: String,
}

impl Account {
    /// Constructs an account
    pub fn new(
        home_account_id: HomeAccountId,
        environment: Environment,
        username: impl Into<String>,
    ) -> Self {
        Self {
            home_account_id,
            environment,
            username: username.into(),
        }
    }

    /// The account's home tenant, taken from a `uid.utid` identifier
    pub fn home_tenant(&self) -> Option<&TenantIdRef> {
        home_tenant_of(&self.home_account_id)
    }
}

impl From<&AccountItem> for Account {
    fn from(item: &AccountItem) -> Self {
        Self::new(
            item.home_account_id.clone(),
            item.environment.clone(),
            item.username.clone(),
        )
    }
}

/// Where the returned access token came from
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenSource {
    /// Served from the token cache without a network call
    Cache,
    /// Freshly issued by the identity provider
    IdentityProvider,
}

/// A successfully acquired token and what is known about it
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
    access_token: AccessTokenItem,
    id_token: Option<IdTokenItem>,
    account: Option<Account>,
    source: TokenSource,
}

impl AuthenticationResult {
    pub(crate) fn new(
        access_token: AccessTokenItem,
        id_token: Option<IdTokenItem>,
        account: Option<Account>,
        source: TokenSource,
    ) -> Self {
        Self {
            access_token,
            id_token,
            account,
            source,
        }
    }

    /// The access token
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token.header.secret
    }

    /// When the access token expires
    pub fn expires_on(&self) -> UnixTime {
        self.access_token.expires_on
    }

    /// When the access token stops being usable during an outage, if known
    pub fn extended_expires_on(&self) -> Option<UnixTime> {
        self.access_token.extended_expires_on()
    }

    /// The scopes granted to the access token
    pub fn scopes(&self) -> &ScopeSet {
        &self.access_token.scopes
    }

    /// The tenant the token was issued in
    pub fn tenant(&self) -> Option<&TenantIdRef> {
        self.access_token.tenant.as_deref()
    }

    /// The token type, usually `Bearer`
    pub fn token_type(&self) -> &str {
        &self.access_token.token_type
    }

    /// The raw ID token, if one is cached for the account
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_ref().map(|t| &*t.header.secret)
    }

    /// The account the token was issued to
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Whether the token came from the cache or the identity provider
    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// The unique ID of the user in the tenant, from the ID token
    pub fn unique_id(&self) -> Option<&str> {
        self.id_token
            .as_ref()
            .and_then(IdTokenItem::claims)
            .and_then(|c| c.object_id())
    }
}
