//! Interoperability with the previous generation's token cache
//!
//! The legacy cache is a single blob holding refresh tokens keyed by authority,
//! resource, client and user. While applications migrate, refresh tokens are
//! mirrored into it and read back from it. Nothing here is allowed to fail the
//! primary flow: every error is logged and swallowed.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    cache::items::{CredentialHeader, CredentialType, IdTokenItem, RefreshTokenItem},
    claims::ClientInfo,
    error::BoxError,
    result::Account,
    ClientId, ClientIdRef, EnvironmentRef, HomeAccountId, HomeAccountIdRef, RefreshToken,
};

pub(crate) const DIFFERENT_ENV_ERROR: &str =
    "refresh token and ID token have different environments";
pub(crate) const DIFFERENT_AUTHORITY_ERROR: &str =
    "authority has a different environment than the tokens";
pub(crate) const EMPTY_USERNAME_ERROR: &str =
    "cannot remove legacy entries by username: the username is empty";

/// Durable storage for the legacy cache blob
#[async_trait]
pub trait LegacyCachePersistence: Send + Sync {
    /// Loads the blob, or `None` if nothing has been written yet
    async fn load(&self) -> Result<Option<Vec<u8>>, BoxError>;

    /// Replaces the blob
    async fn write(&self, data: &[u8]) -> Result<(), BoxError>;
}

/// Legacy persistence kept in memory
#[derive(Debug, Default)]
pub struct InMemoryLegacyPersistence {
    data: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryLegacyPersistence {
    /// Constructs an empty in-memory legacy store
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, or succeed again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The raw blob currently stored
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LegacyCachePersistence for InMemoryLegacyPersistence {
    async fn load(&self) -> Result<Option<Vec<u8>>, BoxError> {
        Ok(self.contents())
    }

    async fn write(&self, data: &[u8]) -> Result<(), BoxError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err("legacy cache is not writable".into());
        }

        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data.to_vec());
        Ok(())
    }
}

/// Whether a legacy token was issued to a user or to the application itself
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSubjectType {
    /// Issued to a user
    User,
    /// Issued to the client application
    Client,
}

/// The composite key of a legacy entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyKey {
    /// The full authority URL
    pub authority: String,
    /// The resource (here, the normalized scopes) the token was issued for
    pub resource: String,
    /// The client
    pub client_id: ClientId,
    /// Whether the token belongs to a user
    pub token_subject_type: TokenSubjectType,
    /// The user's unique ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// The username shown to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayable_id: Option<String>,
}

fn same(a: Option<&str>, b: Option<&str>) -> bool {
    a.unwrap_or_default()
        .eq_ignore_ascii_case(b.unwrap_or_default())
}

impl LegacyKey {
    /// Legacy keys compare case-insensitively
    pub fn matches(&self, other: &LegacyKey) -> bool {
        self.authority.eq_ignore_ascii_case(&other.authority)
            && self.resource.eq_ignore_ascii_case(&other.resource)
            && self.client_id.matches(&other.client_id)
            && self.token_subject_type == other.token_subject_type
            && same(self.unique_id.as_deref(), other.unique_id.as_deref())
            && same(
                self.displayable_id.as_deref(),
                other.displayable_id.as_deref(),
            )
    }

    /// The host of the authority
    pub fn environment(&self) -> Option<&EnvironmentRef> {
        host_of(&self.authority)
    }
}

/// The user a legacy entry belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUserInfo {
    /// The user's unique ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// The username shown to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayable_id: Option<String>,
}

/// The value of a legacy entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntry {
    /// The user the token was issued to
    #[serde(default)]
    pub user_info: LegacyUserInfo,
    /// The refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// The client info blob, missing from entries written by older writers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_client_info: Option<String>,
    /// The resource the token was issued for, marking it as usable for any resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_in_response: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct LegacyRecord {
    key: LegacyKey,
    value: LegacyEntry,
}

/// The decoded legacy cache
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCache {
    #[serde(default)]
    entries: Vec<LegacyRecord>,
}

impl LegacyCache {
    /// Decodes a blob, treating a missing or unreadable blob as an empty cache
    pub fn from_blob(blob: Option<&[u8]>) -> Self {
        match blob {
            Some(data) if !data.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice(data).unwrap_or_else(|error| {
                    tracing::warn!(
                        error = (&error as &dyn std::error::Error),
                        "unable to decode legacy cache, treating it as empty"
                    );
                    Self::default()
                })
            }
            _ => Self::default(),
        }
    }

    /// Encodes the cache into a blob
    pub fn to_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Inserts an entry, replacing any entry with a matching key
    pub fn insert(&mut self, key: LegacyKey, value: LegacyEntry) {
        self.entries.retain(|r| !r.key.matches(&key));
        self.entries.push(LegacyRecord { key, value });
    }

    /// Iterates over every entry
    pub fn iter(&self) -> impl Iterator<Item = (&LegacyKey, &LegacyEntry)> {
        self.entries.iter().map(|r| (&r.key, &r.value))
    }

    /// The number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn retain(&mut self, mut keep: impl FnMut(&LegacyKey, &LegacyEntry) -> bool) {
        self.entries.retain(|r| keep(&r.key, &r.value));
    }
}

fn host_of(authority: &str) -> Option<&EnvironmentRef> {
    let rest = authority
        .strip_prefix("https://")
        .or_else(|| authority.strip_prefix("http://"))?;
    let host = rest.split('/').next().filter(|h| !h.is_empty())?;
    Some(EnvironmentRef::from_str(host))
}

fn account_id_from_client_info(raw: &str) -> Option<HomeAccountId> {
    ClientInfo::parse(raw)
        .map(|info| info.to_account_identifier())
        .ok()
}

/// A user found in the legacy cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyUser {
    /// The authority the user signed in with
    pub authority: String,
    /// The client the entry belongs to
    pub client_id: ClientId,
    /// The client info blob, if the entry carries one
    pub client_info: Option<String>,
    /// The user
    pub user_info: LegacyUserInfo,
}

impl LegacyUser {
    /// Converts the user into an account, if it carries a usable client info blob
    pub fn to_account(&self) -> Option<Account> {
        let home_account_id = account_id_from_client_info(self.client_info.as_deref()?)?;
        let environment = host_of(&self.authority)?.to_owned();
        let username = self.user_info.displayable_id.clone().unwrap_or_default();
        Some(Account::new(home_account_id, environment, username))
    }
}

/// Reads and writes the legacy cache on behalf of the token cache
#[derive(Clone)]
pub struct LegacyCacheBridge {
    persistence: Arc<dyn LegacyCachePersistence>,
}

impl fmt::Debug for LegacyCacheBridge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LegacyCacheBridge").finish_non_exhaustive()
    }
}

impl LegacyCacheBridge {
    /// Constructs a bridge over the given persistence
    pub fn new(persistence: Arc<dyn LegacyCachePersistence>) -> Self {
        Self { persistence }
    }

    async fn load(&self) -> Result<LegacyCache, BoxError> {
        let blob = self.persistence.load().await?;
        Ok(LegacyCache::from_blob(blob.as_deref()))
    }

    async fn store(&self, cache: &LegacyCache) -> Result<(), BoxError> {
        self.persistence.write(&cache.to_blob()?).await
    }

    /// Mirrors a refresh token into the legacy cache
    ///
    /// Family refresh tokens are never written. Failures are logged.
    pub async fn write_refresh_token(
        &self,
        refresh_token: Option<&RefreshTokenItem>,
        id_token: Option<&IdTokenItem>,
        raw_client_info: Option<&str>,
        authority: &str,
        unique_id: Option<&str>,
        scope: &str,
    ) {
        let rt = match refresh_token {
            Some(rt) => rt,
            None => {
                tracing::info!("no refresh token available, skipping legacy cache write");
                return;
            }
        };

        if rt.is_family_token() {
            tracing::info!("not writing family refresh token to legacy cache");
            return;
        }

        if let Err(error) = self
            .try_write_refresh_token(rt, id_token, raw_client_info, authority, unique_id, scope)
            .await
        {
            let id_env = id_token.map(|t| &*t.header.environment);
            if !id_env.map_or(false, |env| env.matches(&rt.header.environment)) {
                tracing::error!("{}", DIFFERENT_ENV_ERROR);
            }
            if !host_of(authority).map_or(false, |host| host.matches(&rt.header.environment)) {
                tracing::error!("{}", DIFFERENT_AUTHORITY_ERROR);
            }
            tracing::warn!(
                error = (&*error as &dyn std::error::Error),
                "unable to write refresh token to legacy cache"
            );
        }
    }

    async fn try_write_refresh_token(
        &self,
        rt: &RefreshTokenItem,
        id_token: Option<&IdTokenItem>,
        raw_client_info: Option<&str>,
        authority: &str,
        unique_id: Option<&str>,
        scope: &str,
    ) -> Result<(), BoxError> {
        let id_token = id_token.ok_or("an ID token is required to write a legacy entry")?;
        let displayable_id = id_token
            .claims()
            .and_then(|c| c.preferred_username.clone());
        let unique_id = unique_id.map(String::from);

        let key = LegacyKey {
            authority: authority.to_owned(),
            resource: scope.to_owned(),
            client_id: rt.header.client_id.clone(),
            token_subject_type: TokenSubjectType::User,
            unique_id: unique_id.clone(),
            displayable_id: displayable_id.clone(),
        };

        let value = LegacyEntry {
            user_info: LegacyUserInfo {
                unique_id,
                displayable_id,
            },
            refresh_token: Some(rt.header.secret.clone()),
            raw_client_info: raw_client_info.map(String::from),
            resource_in_response: Some(scope.to_owned()),
        };

        let mut cache = self.load().await?;
        cache.insert(key, value);
        self.store(&cache).await
    }

    /// Lists the users in the legacy cache for a client
    pub async fn get_all_users(&self, client_id: &ClientIdRef) -> Vec<LegacyUser> {
        match self.load().await {
            Ok(cache) => cache
                .iter()
                .filter(|(k, _)| k.client_id.matches(client_id) && !k.authority.is_empty())
                .map(|(k, v)| LegacyUser {
                    authority: k.authority.clone(),
                    client_id: client_id.to_owned(),
                    client_info: v.raw_client_info.clone(),
                    user_info: v.user_info.clone(),
                })
                .collect(),
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn std::error::Error),
                    "unable to read users from legacy cache"
                );
                Vec::new()
            }
        }
    }

    /// Finds legacy refresh tokens for a client on the given environments
    ///
    /// The username and unique ID narrow the result only when they match at
    /// least one entry.
    pub async fn get_entries_for_client(
        &self,
        environments: &[&EnvironmentRef],
        client_id: &ClientIdRef,
        username: Option<&str>,
        unique_id: Option<&str>,
    ) -> Vec<RefreshTokenItem> {
        let cache = match self.load().await {
            Ok(cache) => cache,
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn std::error::Error),
                    "unable to search legacy cache for refresh tokens"
                );
                return Vec::new();
            }
        };

        let mut entries: Vec<_> = cache
            .iter()
            .filter(|(k, _)| {
                k.client_id.matches(client_id)
                    && k
                        .environment()
                        .map_or(false, |host| environments.iter().any(|e| e.matches(host)))
            })
            .collect();

        if let Some(username) = username.filter(|u| !u.is_empty()) {
            let narrowed: Vec<_> = entries
                .iter()
                .copied()
                .filter(|(k, _)| same(k.displayable_id.as_deref(), Some(username)))
                .collect();
            if !narrowed.is_empty() {
                entries = narrowed;
            }
        }

        if let Some(unique_id) = unique_id.filter(|u| !u.is_empty()) {
            let narrowed: Vec<_> = entries
                .iter()
                .copied()
                .filter(|(k, _)| same(k.unique_id.as_deref(), Some(unique_id)))
                .collect();
            if !narrowed.is_empty() {
                entries = narrowed;
            }
        }

        entries
            .into_iter()
            .filter_map(|(k, v)| {
                let secret = v.refresh_token.clone()?;
                let environment = k.environment()?.to_owned();
                let home_account_id = v
                    .raw_client_info
                    .as_deref()
                    .and_then(account_id_from_client_info)
                    .unwrap_or_else(|| HomeAccountId::new(String::new()));
                let header = CredentialHeader::new(
                    CredentialType::RefreshToken,
                    home_account_id,
                    environment,
                    k.client_id.clone(),
                    secret,
                );
                Some(RefreshTokenItem::new(header, None))
            })
            .collect()
    }

    /// Finds a single legacy refresh token, preferring the given environment
    pub async fn get_entry_for_client(
        &self,
        preferred_environment: &EnvironmentRef,
        environments: &[&EnvironmentRef],
        client_id: &ClientIdRef,
        username: Option<&str>,
        unique_id: Option<&str>,
    ) -> Option<RefreshTokenItem> {
        let entries = self
            .get_entries_for_client(environments, client_id, username, unique_id)
            .await;

        let preferred = entries
            .iter()
            .position(|rt| rt.header.environment.matches(preferred_environment));

        match preferred {
            Some(idx) => entries.into_iter().nth(idx),
            None => entries.into_iter().next(),
        }
    }

    /// Removes a user's legacy entries for a client
    ///
    /// Entries are removed when their client info yields `account_id`, and
    /// separately when their username matches `displayable_id`. Older entries
    /// may lack client info, so both passes always run.
    pub async fn remove_user(
        &self,
        client_id: &ClientIdRef,
        displayable_id: Option<&str>,
        account_id: Option<&HomeAccountIdRef>,
    ) {
        if let Err(error) = self
            .try_remove_user(client_id, displayable_id, account_id)
            .await
        {
            tracing::warn!(
                error = (&*error as &dyn std::error::Error),
                "unable to remove account from legacy cache"
            );
        }
    }

    async fn try_remove_user(
        &self,
        client_id: &ClientIdRef,
        displayable_id: Option<&str>,
        account_id: Option<&HomeAccountIdRef>,
    ) -> Result<(), BoxError> {
        let mut cache = self.load().await?;

        if let Some(account_id) = account_id.filter(|a| !a.as_str().is_empty()) {
            cache.retain(|k, v| {
                let cached = v
                    .raw_client_info
                    .as_deref()
                    .filter(|raw| !raw.is_empty())
                    .and_then(account_id_from_client_info);
                !(cached.map_or(false, |id| id.matches(account_id))
                    && k.client_id.matches(client_id))
            });
        }

        match displayable_id.filter(|d| !d.is_empty()) {
            Some(displayable_id) => cache.retain(|k, _| {
                !(same(k.displayable_id.as_deref(), Some(displayable_id))
                    && k.client_id.matches(client_id))
            }),
            None => tracing::error!("{}", EMPTY_USERNAME_ERROR),
        }

        self.store(&cache).await
    }
}
